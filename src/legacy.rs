//! The single-session client.
//!
//! History lives on this machine rather than on the server: it is loaded from
//! a [`HistoryStore`] at start, sent in full with every message, and saved
//! again after every change.

use std::sync::Arc;

use crate::app::{CommandOutcome, Confirm, Controls, SubmitOutcome};
use crate::client::ChatBackend;
use crate::commands::{ChatCommand, legacy_help_text};
use crate::error::{Error, Result};
use crate::observability::{SUBMISSIONS, SUBMISSIONS_FAILED, SUBMISSIONS_REJECTED};
use crate::persistence::{HistoryStore, KeyValueStore, LoadStatus};
use crate::render::Renderer;
use crate::transcript::Transcript;
use crate::types::{LegacyChatRequest, Message, MessageRole};

/// Stored in history when the server answers with an empty reply.
pub const EMPTY_REPLY: &str = "(no reply)";

/// Single-session chat backed by local history.
pub struct LegacyChat<S: KeyValueStore> {
    backend: Arc<dyn ChatBackend>,
    store: HistoryStore<S>,
    renderer: Box<dyn Renderer>,
    confirm: Box<dyn Confirm>,
    controls: Controls,
    transcript: Transcript,
    history: Vec<Message>,
    deep_think: bool,
}

impl<S: KeyValueStore> LegacyChat<S> {
    /// Creates a client; nothing is loaded until [`LegacyChat::start`].
    ///
    /// Destructive actions are declined unless a confirmation hook is given
    /// with [`LegacyChat::with_confirm`].
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: HistoryStore<S>,
        renderer: impl Renderer + 'static,
    ) -> Self {
        Self {
            backend,
            store,
            renderer: Box::new(renderer),
            confirm: Box::new(|_: &str| false),
            controls: Controls::new(),
            transcript: Transcript::new(),
            history: Vec::new(),
            deep_think: false,
        }
    }

    /// Sets how destructive actions are confirmed.
    pub fn with_confirm(mut self, confirm: impl Confirm + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    /// Shares existing controls.
    pub fn with_controls(mut self, controls: Controls) -> Self {
        self.controls = controls;
        self
    }

    /// A handle on the shared input controls.
    pub fn controls(&self) -> Controls {
        self.controls.clone()
    }

    /// The conversation so far.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// The transcript on screen.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The deep-think flag sent with each message.
    pub fn deep_think(&self) -> bool {
        self.deep_think
    }

    /// Restores the saved conversation and flag and renders them below the welcome greeting.
    pub fn start(&mut self) -> LoadStatus {
        let loaded = self.store.load();
        self.history = loaded.messages;
        self.deep_think = self.store.load_flag();

        let renderer = self.renderer.as_mut();
        self.transcript.reset(renderer);
        self.transcript.render_welcome(renderer);
        for message in &self.history {
            self.transcript.append(message.role, &message.content, renderer);
        }
        if loaded.status == LoadStatus::Corrupt {
            renderer.print_info("Saved history could not be read and was ignored.");
        }
        renderer.print_info(deep_think_label(self.deep_think));
        loaded.status
    }

    /// Flips, or sets, the deep-think flag and saves it.
    pub fn toggle_deep_think(&mut self, value: Option<bool>) -> bool {
        self.deep_think = value.unwrap_or(!self.deep_think);
        self.store.save_flag(self.deep_think);
        self.renderer.print_info(deep_think_label(self.deep_think));
        self.deep_think
    }

    /// Clears the conversation after confirmation.  Returns false if the user declined.
    pub fn clear(&mut self) -> Result<bool> {
        if self.controls.is_pending() {
            return Err(Error::Busy);
        }
        if !self
            .confirm
            .confirm("Clear the local conversation? This cannot be undone.")
        {
            return Ok(false);
        }
        self.history.clear();
        self.store.clear();
        let renderer = self.renderer.as_mut();
        self.transcript.reset(renderer);
        self.transcript.render_welcome(renderer);
        Ok(true)
    }

    /// Sends one message with the full history and shows the reply.
    ///
    /// The user message is saved before the request goes out and stays in
    /// history when the request fails.
    pub async fn submit(&mut self, text: &str) -> Result<SubmitOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }
        let _guard = self.controls.begin().inspect_err(|_| SUBMISSIONS_REJECTED.click())?;
        SUBMISSIONS.click();
        self.renderer.set_pending(true);

        self.transcript.append_submitted(text, self.renderer.as_mut());
        self.history.push(Message::user(text));
        self.store.save(&self.history);

        let request = LegacyChatRequest {
            message: text.to_string(),
            history: self.history.clone(),
            deep_think: self.deep_think,
        };
        let outcome = match self.backend.chat(&request).await {
            Ok(reply) => {
                let reply = if reply.is_empty() {
                    EMPTY_REPLY.to_string()
                } else {
                    reply
                };
                self.transcript
                    .append(MessageRole::Assistant, &reply, self.renderer.as_mut());
                self.history.push(Message::assistant(reply.clone()));
                self.store.save(&self.history);
                SubmitOutcome::Completed { reply, chunks: 1 }
            }
            Err(err) => {
                SUBMISSIONS_FAILED.click();
                let bubble = format!("Error: {}", err.description());
                self.transcript
                    .append(MessageRole::Assistant, &bubble, self.renderer.as_mut());
                SubmitOutcome::Failed(err)
            }
        };
        self.renderer.set_pending(false);
        Ok(outcome)
    }

    /// Runs one parsed slash command.
    pub fn handle_command(&mut self, command: ChatCommand) -> CommandOutcome {
        if command.mutates_sessions() && self.controls.is_pending() {
            self.notify("Command unavailable", &Error::Busy);
            return CommandOutcome::Continue;
        }
        match command {
            ChatCommand::DeepThink(value) => {
                self.toggle_deep_think(value);
            }
            ChatCommand::Clear => {
                if let Err(err) = self.clear() {
                    self.notify("Failed to clear history", &err);
                }
            }
            ChatCommand::History => {
                let renderer = self.renderer.as_mut();
                self.transcript.reset(renderer);
                self.transcript.render_welcome(renderer);
                for message in &self.history {
                    self.transcript.append(message.role, &message.content, renderer);
                }
            }
            ChatCommand::Help => self.renderer.print_info(legacy_help_text()),
            ChatCommand::Quit => return CommandOutcome::Quit,
            ChatCommand::Invalid(message) => self.renderer.print_error(&message),
            ChatCommand::New(_)
            | ChatCommand::Delete
            | ChatCommand::Rename(_)
            | ChatCommand::Sessions
            | ChatCommand::Switch(_) => {
                self.renderer
                    .print_info("Sessions are not available with --legacy");
            }
        }
        CommandOutcome::Continue
    }

    /// Shows an operation failure as a notice.
    pub fn notify(&mut self, context: &str, err: &Error) {
        self.renderer
            .print_notice(&format!("{context}: {}", err.description()));
    }
}

fn deep_think_label(deep_think: bool) -> &'static str {
    if deep_think {
        "Deep-think: on"
    } else {
        "Deep-think: off"
    }
}
