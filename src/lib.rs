// Public modules
pub mod app;
pub mod client;
pub mod client_logger;
pub mod commands;
pub mod config;
pub mod directory;
pub mod error;
pub mod legacy;
pub mod observability;
pub mod persistence;
pub mod render;
pub mod text_stream;
pub mod transcript;
pub mod types;
pub mod utils;

// Re-exports
pub use app::{ChatApp, ChatAppBuilder, CommandOutcome, Confirm, Controls, SubmitOutcome};
pub use client::{ChatBackend, ChatClient};
pub use client_logger::{ClientLogger, WriterLogger};
pub use commands::{ChatCommand, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use directory::SessionDirectory;
pub use error::{Error, Result};
pub use legacy::LegacyChat;
pub use observability::register_biometrics;
pub use persistence::{FileStore, HistoryStore, KeyValueStore, LoadStatus, MemoryStore};
pub use render::{PlainTextRenderer, RecordingRenderer, Renderer};
pub use text_stream::TextStream;
pub use transcript::{BubbleHandle, Transcript};
pub use types::*;
