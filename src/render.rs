//! Output rendering for the chat application.
//!
//! The [`Renderer`] trait is the only place output happens.  The transcript
//! and the application decide *what* to show; a renderer decides *how*.

use std::io::{self, Stdout, Write};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;

use crate::types::{MessageRole, Session};
use crate::utils::time::relative;

/// ANSI escape code for dim text (used for metadata).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for bold text (used for the active session).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the user label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the assistant label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for yellow text (used for notices).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI sequence that clears the screen and homes the cursor.
const ANSI_CLEAR: &str = "\x1b[2J\x1b[H";

/// Trait for rendering chat output.
///
/// Message output comes in two shapes: whole messages via [`print_message`],
/// and a streamed message opened with [`begin_message`], grown with
/// [`print_text`] and closed with [`finish_message`].
///
/// [`print_message`]: Renderer::print_message
/// [`begin_message`]: Renderer::begin_message
/// [`print_text`]: Renderer::print_text
/// [`finish_message`]: Renderer::finish_message
pub trait Renderer: Send {
    /// Remove every rendered message.
    fn clear(&mut self);

    /// Render one complete message.
    fn print_message(&mut self, role: MessageRole, text: &str);

    /// Render a message the user just submitted.
    ///
    /// Line-editing front ends already show what was typed and may skip it.
    fn print_submitted(&mut self, text: &str) {
        self.print_message(MessageRole::User, text);
    }

    /// Open a message whose text will arrive incrementally.
    fn begin_message(&mut self, role: MessageRole);

    /// Append text to the open message.
    fn print_text(&mut self, text: &str);

    /// Replace the whole text of the open message.
    ///
    /// Only used when the new text does not extend what is already shown.
    fn rewrite_message(&mut self, role: MessageRole, text: &str);

    /// Close the open message.
    fn finish_message(&mut self);

    /// Bring the newest content into view.
    fn scroll_to_end(&mut self) {}

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Show a notice the user must see before continuing.
    fn print_notice(&mut self, notice: &str);

    /// Show the title and mode of the session now in view.
    fn print_session_header(&mut self, session: &Session);

    /// Show the session list with the active one marked.
    fn print_session_list(&mut self, sessions: &[Session], active: Option<&str>);

    /// Called when input is disabled or re-enabled around a request.
    fn set_pending(&mut self, pending: bool) {
        _ = pending;
    }

    /// Called when the user interrupts a streamed reply.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    echo_submitted: bool,
    open: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            echo_submitted: false,
            open: false,
        }
    }

    /// Also print submitted messages, for input that is not echoed by a line editor.
    pub fn echo_submitted(mut self, echo: bool) -> Self {
        self.echo_submitted = echo;
        self
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn label(&self, role: MessageRole) -> String {
        let (color, name) = match role {
            MessageRole::User => (ANSI_CYAN, "You"),
            MessageRole::Assistant => (ANSI_GREEN, "Assistant"),
        };
        if self.use_color {
            format!("{color}{name}:{ANSI_RESET}")
        } else {
            format!("{name}:")
        }
    }

    fn close_open(&mut self) {
        if self.open {
            println!();
            self.open = false;
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn clear(&mut self) {
        self.open = false;
        if self.use_color {
            print!("{ANSI_CLEAR}");
        } else {
            println!("\n----------------------------------------");
        }
        self.flush();
    }

    fn print_message(&mut self, role: MessageRole, text: &str) {
        self.close_open();
        println!("{}\n{text}\n", self.label(role));
        self.flush();
    }

    fn print_submitted(&mut self, text: &str) {
        if self.echo_submitted {
            self.print_message(MessageRole::User, text);
        }
    }

    fn begin_message(&mut self, role: MessageRole) {
        self.close_open();
        println!("{}", self.label(role));
        self.open = true;
        self.flush();
    }

    fn print_text(&mut self, text: &str) {
        print!("{text}");
        self.flush();
    }

    fn rewrite_message(&mut self, role: MessageRole, text: &str) {
        // A terminal cannot take back streamed output; restart the message below.
        self.close_open();
        println!("{}", self.label(role));
        print!("{text}");
        self.open = true;
        self.flush();
    }

    fn finish_message(&mut self) {
        if self.open {
            println!("\n");
            self.open = false;
        }
        self.flush();
    }

    fn scroll_to_end(&mut self) {
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.close_open();
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        self.close_open();
        println!("{info}");
        self.flush();
    }

    fn print_notice(&mut self, notice: &str) {
        self.close_open();
        if self.use_color {
            println!("{ANSI_YELLOW}! {notice}{ANSI_RESET}");
        } else {
            println!("! {notice}");
        }
        self.flush();
    }

    fn print_session_header(&mut self, session: &Session) {
        self.close_open();
        let mode = if session.deep_think {
            "deep-think: on"
        } else {
            "deep-think: off"
        };
        if self.use_color {
            println!("{ANSI_BOLD}{}{ANSI_RESET} {ANSI_DIM}[{mode}]{ANSI_RESET}\n", session.title);
        } else {
            println!("{} [{mode}]\n", session.title);
        }
        self.flush();
    }

    fn print_session_list(&mut self, sessions: &[Session], active: Option<&str>) {
        self.close_open();
        if sessions.is_empty() {
            println!("    (no sessions)");
            return;
        }
        let now = OffsetDateTime::now_utc();
        for (index, session) in sessions.iter().enumerate() {
            let is_active = active == Some(session.id.as_str());
            let marker = if is_active { '*' } else { ' ' };
            let when = relative(session.updated_at, now);
            let deep = if session.deep_think { " [deep]" } else { "" };
            if self.use_color && is_active {
                println!(
                    "  {marker} {:>2}. {ANSI_BOLD}{}{ANSI_RESET}{deep} {ANSI_DIM}{when}{ANSI_RESET}",
                    index + 1,
                    session.title
                );
            } else if self.use_color {
                println!(
                    "  {marker} {:>2}. {}{deep} {ANSI_DIM}{when}{ANSI_RESET}",
                    index + 1,
                    session.title
                );
            } else {
                println!("  {marker} {:>2}. {}{deep} ({when})", index + 1, session.title);
            }
        }
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.close_open();
        println!("[interrupted]\n");
        self.flush();
    }
}

/// Everything a [`RecordingRenderer`] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// [`Renderer::clear`]
    Clear,
    /// [`Renderer::print_message`]
    Message(MessageRole, String),
    /// [`Renderer::print_submitted`]
    Submitted(String),
    /// [`Renderer::begin_message`]
    Begin(MessageRole),
    /// [`Renderer::print_text`]
    Text(String),
    /// [`Renderer::rewrite_message`]
    Rewrite(MessageRole, String),
    /// [`Renderer::finish_message`]
    Finish,
    /// [`Renderer::print_error`]
    Error(String),
    /// [`Renderer::print_info`]
    Info(String),
    /// [`Renderer::print_notice`]
    Notice(String),
    /// [`Renderer::print_session_header`]
    Header {
        /// Session title.
        title: String,
        /// Session deep-think flag.
        deep_think: bool,
    },
    /// [`Renderer::print_session_list`]
    SessionList {
        /// Session ids in display order.
        ids: Vec<String>,
        /// The id marked active.
        active: Option<String>,
    },
    /// [`Renderer::set_pending`]
    Pending(bool),
    /// [`Renderer::print_interrupted`]
    Interrupted,
}

/// A renderer that records calls instead of printing them.
///
/// Clones share the same log, so a test can keep one clone and hand the other
/// to the application.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    events: Arc<Mutex<Vec<RenderEvent>>>,
}

impl RecordingRenderer {
    /// Creates a renderer with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<RenderEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// The notices shown so far.
    pub fn notices(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RenderEvent::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    fn push(&mut self, event: RenderEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Renderer for RecordingRenderer {
    fn clear(&mut self) {
        self.push(RenderEvent::Clear);
    }

    fn print_message(&mut self, role: MessageRole, text: &str) {
        self.push(RenderEvent::Message(role, text.to_string()));
    }

    fn print_submitted(&mut self, text: &str) {
        self.push(RenderEvent::Submitted(text.to_string()));
    }

    fn begin_message(&mut self, role: MessageRole) {
        self.push(RenderEvent::Begin(role));
    }

    fn print_text(&mut self, text: &str) {
        self.push(RenderEvent::Text(text.to_string()));
    }

    fn rewrite_message(&mut self, role: MessageRole, text: &str) {
        self.push(RenderEvent::Rewrite(role, text.to_string()));
    }

    fn finish_message(&mut self) {
        self.push(RenderEvent::Finish);
    }

    fn print_error(&mut self, error: &str) {
        self.push(RenderEvent::Error(error.to_string()));
    }

    fn print_info(&mut self, info: &str) {
        self.push(RenderEvent::Info(info.to_string()));
    }

    fn print_notice(&mut self, notice: &str) {
        self.push(RenderEvent::Notice(notice.to_string()));
    }

    fn print_session_header(&mut self, session: &Session) {
        self.push(RenderEvent::Header {
            title: session.title.clone(),
            deep_think: session.deep_think,
        });
    }

    fn print_session_list(&mut self, sessions: &[Session], active: Option<&str>) {
        self.push(RenderEvent::SessionList {
            ids: sessions.iter().map(|s| s.id.clone()).collect(),
            active: active.map(str::to_string),
        });
    }

    fn set_pending(&mut self, pending: bool) {
        self.push(RenderEvent::Pending(pending));
    }

    fn print_interrupted(&mut self) {
        self.push(RenderEvent::Interrupted);
    }
}
