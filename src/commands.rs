//! Slash command parsing.
//!
//! Input that starts with `/` controls the client and is never sent to the
//! backend as a chat message.

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Create a new session, optionally with a title.
    New(Option<String>),

    /// Delete the active session after confirmation.
    Delete,

    /// Toggle deep-think, or set it when an argument is given.
    DeepThink(Option<bool>),

    /// Rename the active session.
    Rename(String),

    /// List all sessions.
    Sessions,

    /// Switch to the session named by a position or id.
    Switch(String),

    /// Re-render the active session's transcript from the server.
    History,

    /// Clear the local history (legacy mode).
    Clear,

    /// Display help information.
    Help,

    /// Exit the application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

impl ChatCommand {
    /// Returns true if the command changes which session is active or what it holds.
    pub fn mutates_sessions(&self) -> bool {
        matches!(
            self,
            ChatCommand::New(_)
                | ChatCommand::Delete
                | ChatCommand::DeepThink(_)
                | ChatCommand::Rename(_)
                | ChatCommand::Switch(_)
                | ChatCommand::History
                | ChatCommand::Clear
        )
    }
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use deepchat::commands::{parse_command, ChatCommand};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert!(parse_command("/switch 2").is_some());
/// assert!(parse_command("Hello there").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ChatCommand::New(argument.map(str::to_string)),
        "delete" | "del" => ChatCommand::Delete,
        "deepthink" | "deep" => match argument {
            None => ChatCommand::DeepThink(None),
            Some(arg) => match parse_on_off(arg) {
                Some(value) => ChatCommand::DeepThink(Some(value)),
                None => ChatCommand::Invalid("/deepthink expects 'on' or 'off'".to_string()),
            },
        },
        "rename" | "title" => match argument {
            Some(title) => ChatCommand::Rename(title.to_string()),
            None => ChatCommand::Invalid("/rename requires a title".to_string()),
        },
        "sessions" | "ls" => ChatCommand::Sessions,
        "switch" | "sw" => match argument {
            Some(selector) => ChatCommand::Switch(selector.to_string()),
            None => ChatCommand::Invalid("/switch requires a session number or id".to_string()),
        },
        "history" => ChatCommand::History,
        "clear" => ChatCommand::Clear,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new [title]           Start a new session (default title: New chat)
  /delete                Delete the current session
  /deepthink [on|off]    Toggle or set deep-think for the current session
  /rename <title>        Rename the current session
  /sessions              List sessions
  /switch <n|id>         Switch to another session
  /history               Reload the current session's messages
  /help                  Show this help message
  /quit                  Exit the chat

Press Ctrl+C while a reply is streaming to stop it."#
}

/// Returns help text for the single-session legacy mode.
pub fn legacy_help_text() -> &'static str {
    r#"Available commands:
  /deepthink [on|off]    Toggle or set deep-think
  /clear                 Clear the saved history
  /help                  Show this help message
  /quit                  Exit the chat"#
}
