//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! configuration the binary runs with.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::client::BASE_URL_ENV;

/// Default server when neither a flag nor the environment names one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default directory for legacy-mode local state.
const DEFAULT_STATE_DIR: &str = ".deepchat";

/// Command-line arguments for the deepchat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Server to talk to.
    #[arrrg(
        optional,
        "Server base URL (default: $DEEPCHAT_BASE_URL or http://localhost:3000/)",
        "URL"
    )]
    pub base_url: Option<String>,

    /// Seconds to wait for a connection and the first response byte.
    #[arrrg(optional, "Request timeout in seconds (default: 60)", "SECONDS")]
    pub timeout: Option<u64>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Run the single-session client with locally stored history.
    #[arrrg(flag, "Single-session mode with local history (uses /api/chat)")]
    pub legacy: bool,

    /// Where legacy mode keeps its history.
    #[arrrg(optional, "Directory for local history (default: .deepchat)", "DIR")]
    pub state_dir: Option<String>,

    /// Append one line per HTTP request to this file.
    #[arrrg(optional, "Append a request log to FILE", "FILE")]
    pub log_file: Option<String>,
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Base URL every endpoint is resolved against.
    pub base_url: String,

    /// Connect and first-byte timeout.
    pub timeout: Duration,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Whether to run the single-session legacy client.
    pub legacy: bool,

    /// Directory holding the legacy client's history.
    pub state_dir: PathBuf,

    /// Where to log requests, if anywhere.
    pub log_file: Option<PathBuf>,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Base URL: http://localhost:3000/
    /// - Timeout: 60 seconds
    /// - Color: enabled
    /// - Legacy: disabled
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            use_color: true,
            legacy: false,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            log_file: None,
        }
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Selects the legacy single-session client.
    pub fn with_legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    /// Sets the local state directory.
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    /// Sets the request log file.
    pub fn with_log_file(mut self, log_file: Option<PathBuf>) -> Self {
        self.log_file = log_file;
        self
    }

    /// Resolves arguments against an explicit environment value for the base URL.
    pub fn from_args_and_env(args: ChatArgs, env_base_url: Option<String>) -> Self {
        let base_url = args
            .base_url
            .or(env_base_url.filter(|url| !url.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        ChatConfig {
            base_url,
            timeout: Duration::from_secs(args.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1)),
            use_color: !args.no_color,
            legacy: args.legacy,
            state_dir: args
                .state_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            log_file: args.log_file.map(PathBuf::from),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        Self::from_args_and_env(args, env::var(BASE_URL_ENV).ok())
    }
}
