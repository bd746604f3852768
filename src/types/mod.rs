// Public modules
pub mod chat_request;
pub mod message;
pub mod session;

// Re-exports
pub use chat_request::{ChatStreamRequest, LegacyChatReply, LegacyChatRequest};
pub use message::{Message, MessageList, MessageRole};
pub use session::{CreateSessionParams, Session, SessionList, SessionPatch};
