use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

/// A named conversation owned by the backend.
///
/// The client only ever holds a cached copy; the server assigns the id and
/// both timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Server-assigned identifier.
    pub id: String,

    /// Human-readable title.
    pub title: String,

    /// Whether deep-think mode is enabled for this session.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub deep_think: bool,

    /// When the session was created, if the server reports it.
    #[serde(default, with = "crate::utils::time::option")]
    pub created_at: Option<OffsetDateTime>,

    /// When the session last changed.
    #[serde(with = "crate::utils::time")]
    pub updated_at: OffsetDateTime,
}

/// Accepts a JSON boolean or the 0/1 integer SQLite stores booleans as.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(value)) => Ok(value),
        Some(Flag::Int(value)) => Ok(value != 0),
        None => Ok(false),
    }
}

/// Request body of `POST /api/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionParams {
    /// Title of the new session.
    pub title: String,

    /// Initial deep-think flag.
    pub deep_think: bool,
}

impl CreateSessionParams {
    /// Creates a new set of creation parameters.
    pub fn new(title: impl Into<String>, deep_think: bool) -> Self {
        Self {
            title: title.into(),
            deep_think,
        }
    }
}

/// Partial update for `PATCH /api/sessions/{id}`.
///
/// Only the fields that are set are sent; the server leaves the rest alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPatch {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// New deep-think flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_think: Option<bool>,
}

impl SessionPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the deep-think flag.
    pub fn with_deep_think(mut self, deep_think: bool) -> Self {
        self.deep_think = Some(deep_think);
        self
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.deep_think.is_none()
    }

    /// Applies the patch to a cached session.
    pub fn apply(&self, session: &mut Session) {
        if let Some(title) = &self.title {
            session.title = title.clone();
        }
        if let Some(deep_think) = self.deep_think {
            session.deep_think = deep_think;
        }
    }
}

/// Response body of `GET /api/sessions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionList {
    /// Sessions in server order (most recently updated first).
    #[serde(default)]
    pub sessions: Vec<Session>,
}
