//! An in-memory backend for driving the applications without a server.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use deepchat::text_stream::TextStream;
use deepchat::{ChatBackend, Error, LegacyChatRequest, Message, Result, Session, SessionPatch};
use futures::stream::{self, StreamExt};
use time::OffsetDateTime;
use time::macros::datetime;

/// How the next `chat_stream` call behaves.
pub enum StreamScript {
    /// The reply arrives in these chunks.
    Chunks(Vec<&'static str>),
    /// The request fails with this status and description.
    Status(u16, &'static str),
    /// Some chunks arrive, then the connection drops.
    ChunksThenError(Vec<&'static str>, &'static str),
    /// Some chunks arrive, then nothing more ever does.
    Stall(Vec<&'static str>),
}

#[derive(Default)]
struct State {
    sessions: Vec<Session>,
    messages: HashMap<String, Vec<Message>>,
    next_id: u64,
    tick: i64,
    calls: Vec<String>,
    streams: VecDeque<StreamScript>,
    replies: VecDeque<Result<String>>,
    legacy_requests: Vec<LegacyChatRequest>,
    fail_lists: bool,
}

/// Sessions and messages kept in memory; every call is recorded.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

const EPOCH: OffsetDateTime = datetime!(2025-03-01 09:00:00 UTC);

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session; later additions are more recently updated.
    pub fn with_session(self, id: &str, title: &str, deep_think: bool) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let updated_at = state.now();
            state.sessions.push(Session {
                id: id.to_string(),
                title: title.to_string(),
                deep_think,
                created_at: Some(updated_at),
                updated_at,
            });
        }
        self
    }

    pub fn with_messages(self, id: &str, messages: Vec<Message>) -> Self {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(id.to_string(), messages);
        self
    }

    pub fn script_stream(&self, script: StreamScript) {
        self.state.lock().unwrap().streams.push_back(script);
    }

    pub fn script_reply(&self, reply: Result<String>) {
        self.state.lock().unwrap().replies.push_back(reply);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.state.lock().unwrap().fail_lists = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.state.lock().unwrap().ordered()
    }

    pub fn legacy_requests(&self) -> Vec<LegacyChatRequest> {
        self.state.lock().unwrap().legacy_requests.clone()
    }
}

impl State {
    fn now(&mut self) -> OffsetDateTime {
        self.tick += 1;
        EPOCH + time::Duration::minutes(self.tick)
    }

    fn ordered(&self) -> Vec<Session> {
        let mut sessions = self.sessions.clone();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| {
                Error::not_found(
                    "session not found",
                    Some("session".to_string()),
                    Some(id.to_string()),
                )
            })
    }
}

#[async_trait::async_trait]
impl ChatBackend for FakeBackend {
    async fn create_session(&self, title: &str, deep_think: bool) -> Result<Session> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_session {title} {deep_think}"));
        state.next_id += 1;
        let updated_at = state.now();
        let session = Session {
            id: format!("new{}", state.next_id),
            title: title.to_string(),
            deep_think,
            created_at: Some(updated_at),
            updated_at,
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list_sessions".to_string());
        if state.fail_lists {
            return Err(Error::from_status(503, "maintenance"));
        }
        Ok(state.ordered())
    }

    async fn get_session(&self, id: &str) -> Result<Session> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get_session {id}"));
        state.find_mut(id).map(|s| s.clone())
    }

    async fn update_session(&self, id: &str, patch: &SessionPatch) -> Result<Session> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update_session {id}"));
        let updated_at = state.now();
        let session = state.find_mut(id)?;
        patch.apply(session);
        session.updated_at = updated_at;
        Ok(session.clone())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_session {id}"));
        state.sessions.retain(|s| s.id != id);
        state.messages.remove(id);
        Ok(())
    }

    async fn list_messages(&self, id: &str) -> Result<Vec<Message>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_messages {id}"));
        Ok(state.messages.get(id).cloned().unwrap_or_default())
    }

    async fn chat_stream(&self, session_id: &str, message: &str) -> Result<TextStream> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("chat_stream {session_id} {message}"));
        let script = state
            .streams
            .pop_front()
            .unwrap_or(StreamScript::Chunks(vec!["ok"]));
        let updated_at = state.now();
        state.find_mut(session_id)?.updated_at = updated_at;
        let chunks = |parts: Vec<&'static str>| -> Vec<Result<String>> {
            parts.into_iter().map(|p| Ok(p.to_string())).collect()
        };
        let stream: TextStream = match script {
            StreamScript::Chunks(parts) => {
                let reply = parts.concat();
                let log = state.messages.entry(session_id.to_string()).or_default();
                log.push(Message::user(message));
                log.push(Message::assistant(reply));
                Box::pin(stream::iter(chunks(parts)))
            }
            StreamScript::Status(code, description) => {
                return Err(Error::from_status(code, description));
            }
            StreamScript::ChunksThenError(parts, description) => {
                let mut items = chunks(parts);
                items.push(Err(Error::streaming(description, None)));
                Box::pin(stream::iter(items))
            }
            StreamScript::Stall(parts) => {
                Box::pin(stream::iter(chunks(parts)).chain(stream::pending::<Result<String>>()))
            }
        };
        Ok(stream)
    }

    async fn chat(&self, request: &LegacyChatRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("chat {}", request.message));
        state.legacy_requests.push(request.clone());
        state
            .replies
            .pop_front()
            .unwrap_or_else(|| Ok(format!("echo: {}", request.message)))
    }
}
