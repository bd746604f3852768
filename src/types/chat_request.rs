use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Request body of `POST /api/chat_stream_v2`.
///
/// The server keeps the history; the client only names the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatStreamRequest {
    /// The session the message belongs to.
    pub session_id: String,

    /// The user's message.
    pub message: String,
}

impl ChatStreamRequest {
    /// Creates a new streaming chat request.
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
        }
    }
}

/// Request body of the single-session `POST /api/chat` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyChatRequest {
    /// The user's message.
    pub message: String,

    /// The conversation so far, including `message` as its last entry.
    pub history: Vec<Message>,

    /// Whether deep-think mode is enabled.
    pub deep_think: bool,
}

/// Response body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyChatReply {
    /// The assistant's reply.
    #[serde(default)]
    pub reply: String,
}
