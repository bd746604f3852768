//! The session-aware chat application.
//!
//! [`ChatApp`] owns the session directory, the transcript and the input
//! controls, and wires them to a [`ChatBackend`] and a [`Renderer`].  Every
//! user action enters through one of its operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;

use crate::client::ChatBackend;
use crate::commands::{ChatCommand, help_text};
use crate::directory::SessionDirectory;
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_SWITCHES, SUBMISSIONS, SUBMISSIONS_FAILED, SUBMISSIONS_REJECTED,
};
use crate::render::Renderer;
use crate::transcript::{BubbleHandle, Transcript};
use crate::types::{MessageRole, Session, SessionPatch};

/// Title given to sessions created without one.
pub const DEFAULT_SESSION_TITLE: &str = "New chat";

/// How often a streaming reply checks for an interrupt while waiting on the network.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

////////////////////////////////////////////// Confirm /////////////////////////////////////////////

/// Asks the user a yes/no question before a destructive action.
pub trait Confirm: Send {
    /// Returns true if the user agreed.
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F: FnMut(&str) -> bool + Send> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

///////////////////////////////////////////// Controls /////////////////////////////////////////////

/// Input controls shared between the application, the binder and signal handlers.
///
/// Clones share the same flags.
#[derive(Debug, Clone, Default)]
pub struct Controls {
    pending: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
}

impl Controls {
    /// Creates controls with input enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables input until the returned guard is dropped.
    ///
    /// Fails with [`Error::Busy`] if input is already disabled.
    pub fn begin(&self) -> Result<PendingGuard> {
        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(PendingGuard {
            pending: Arc::clone(&self.pending),
        })
    }

    /// Returns true while a request is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Asks the reply being streamed to stop.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    /// Returns true if an interrupt was requested and not yet consumed.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    /// The raw interrupt flag, for signal handlers.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Release);
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_pending() {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }
}

/// Re-enables input when dropped, however the request ended.
#[derive(Debug)]
pub struct PendingGuard {
    pending: Arc<AtomicBool>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.store(false, Ordering::Release);
    }
}

async fn wait_for_interrupt(flag: &AtomicBool) {
    while !flag.load(Ordering::Acquire) {
        tokio::time::sleep(INTERRUPT_POLL).await;
    }
}

////////////////////////////////////////////// Outcomes ////////////////////////////////////////////

/// Where a submission is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitState {
    /// Waiting for input.
    Idle,
    /// The request is out; no reply bytes yet.
    Sending,
    /// Reply chunks are arriving.
    Streaming,
}

/// How one submission ended.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The input was blank; nothing happened.
    Ignored,
    /// The reply streamed to completion.
    Completed {
        /// The full reply text.
        reply: String,
        /// The number of non-empty chunks it arrived in.
        chunks: usize,
    },
    /// The user stopped the reply.
    Interrupted {
        /// What arrived before the interrupt.
        partial: String,
    },
    /// The request or the stream failed; an error bubble was shown.
    Failed(Error),
}

/// What the input loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Keep reading input.
    Continue,
    /// Exit.
    Quit,
}

////////////////////////////////////////////// Builder /////////////////////////////////////////////

/// Wires a [`ChatApp`] together.  Bindings are fixed once built.
#[derive(Default)]
pub struct ChatAppBuilder {
    backend: Option<Arc<dyn ChatBackend>>,
    renderer: Option<Box<dyn Renderer>>,
    confirm: Option<Box<dyn Confirm>>,
    controls: Option<Controls>,
}

impl ChatAppBuilder {
    /// The remote API.
    pub fn backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Where output goes.
    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    /// How destructive actions are confirmed.  Without one they are declined.
    pub fn confirm(mut self, confirm: impl Confirm + 'static) -> Self {
        self.confirm = Some(Box::new(confirm));
        self
    }

    /// Share existing controls, e.g. ones a signal handler already holds.
    pub fn controls(mut self, controls: Controls) -> Self {
        self.controls = Some(controls);
        self
    }

    /// Builds the application.
    pub fn build(self) -> Result<ChatApp> {
        let backend = self.backend.ok_or_else(|| {
            Error::validation("a backend is required", Some("backend".to_string()))
        })?;
        let renderer = self.renderer.ok_or_else(|| {
            Error::validation("a renderer is required", Some("renderer".to_string()))
        })?;
        let confirm = self
            .confirm
            .unwrap_or_else(|| Box::new(|_: &str| false) as Box<dyn Confirm>);
        Ok(ChatApp {
            backend,
            renderer,
            confirm,
            controls: self.controls.unwrap_or_default(),
            directory: SessionDirectory::new(),
            transcript: Transcript::new(),
            state: SubmitState::Idle,
        })
    }
}

////////////////////////////////////////////// ChatApp /////////////////////////////////////////////

/// The multi-session chat client.
pub struct ChatApp {
    backend: Arc<dyn ChatBackend>,
    renderer: Box<dyn Renderer>,
    confirm: Box<dyn Confirm>,
    controls: Controls,
    directory: SessionDirectory,
    transcript: Transcript,
    state: SubmitState,
}

impl ChatApp {
    /// Starts building an application.
    pub fn builder() -> ChatAppBuilder {
        ChatAppBuilder::default()
    }

    /// The cached sessions and the active one.
    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    /// The transcript of the active session.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// A handle on the shared input controls.
    pub fn controls(&self) -> Controls {
        self.controls.clone()
    }

    /// The submission state.
    pub fn state(&self) -> SubmitState {
        self.state
    }

    /// Loads the session list and shows the most recent session, creating one if none exist.
    pub async fn init(&mut self) -> Result<()> {
        self.load_sessions().await?;
        match self.directory.latest().map(|s| s.id.clone()) {
            Some(id) => {
                self.switch_session(&id).await?;
            }
            None => {
                self.create_new_session(None).await?;
            }
        }
        Ok(())
    }

    /// Replaces the cached session list with the server's.
    pub async fn load_sessions(&mut self) -> Result<()> {
        let sessions = self.backend.list_sessions().await?;
        self.directory.replace(sessions);
        Ok(())
    }

    /// Makes `id` the active session and renders its transcript.
    ///
    /// Returns false without touching the network if `id` is already active.
    pub async fn switch_session(&mut self, id: &str) -> Result<bool> {
        self.controls.ensure_idle()?;
        if self.directory.active_id() == Some(id) {
            return Ok(false);
        }
        self.show_session(id).await?;
        SESSION_SWITCHES.click();
        Ok(true)
    }

    /// Fetches the active session's messages again and re-renders them.
    pub async fn reload_transcript(&mut self) -> Result<()> {
        self.controls.ensure_idle()?;
        let id = self.active_id()?;
        self.show_session(&id).await
    }

    /// Creates a session and switches to it.
    ///
    /// The new session inherits the active session's deep-think flag.
    pub async fn create_new_session(&mut self, title: Option<&str>) -> Result<Session> {
        self.controls.ensure_idle()?;
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE);
        let deep_think = self.directory.active().is_some_and(|s| s.deep_think);
        let session = self.backend.create_session(title, deep_think).await?;
        self.refresh_sessions().await;
        self.switch_session(&session.id).await?;
        Ok(self.directory.active().cloned().unwrap_or(session))
    }

    /// Deletes the active session after confirmation.
    ///
    /// Afterwards the most recent remaining session becomes active, or a new
    /// one is created.  Returns false if there was nothing to delete or the
    /// user declined.
    pub async fn delete_current_session(&mut self) -> Result<bool> {
        self.controls.ensure_idle()?;
        let Some(id) = self.directory.active_id().map(str::to_string) else {
            return Ok(false);
        };
        if !self
            .confirm
            .confirm("Delete the current session? This cannot be undone.")
        {
            return Ok(false);
        }
        self.backend.delete_session(&id).await?;
        self.directory.deactivate();
        self.load_sessions().await?;
        match self.directory.latest().map(|s| s.id.clone()) {
            Some(next) => {
                self.switch_session(&next).await?;
            }
            None => {
                self.create_new_session(None).await?;
            }
        }
        Ok(true)
    }

    /// Flips, or sets, deep-think on the active session.  Returns the new value.
    pub async fn toggle_deep_think(&mut self, value: Option<bool>) -> Result<bool> {
        self.controls.ensure_idle()?;
        let Some(active) = self.directory.active() else {
            return Err(Error::NoActiveSession);
        };
        let id = active.id.clone();
        let deep_think = value.unwrap_or(!active.deep_think);
        let patch = SessionPatch::new().with_deep_think(deep_think);
        let updated = self.backend.update_session(&id, &patch).await?;
        self.directory.activate(updated);
        self.directory.set_active_deep_think(deep_think);
        self.renderer
            .print_info(if deep_think { "Deep-think: on" } else { "Deep-think: off" });
        Ok(deep_think)
    }

    /// Renames the active session.
    pub async fn rename_session(&mut self, title: &str) -> Result<Session> {
        self.controls.ensure_idle()?;
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("title must not be empty", Some("title".to_string())));
        }
        let id = self.active_id()?;
        let patch = SessionPatch::new().with_title(title);
        let mut updated = self.backend.update_session(&id, &patch).await?;
        patch.apply(&mut updated);
        self.directory.activate(updated.clone());
        self.renderer.print_session_header(&updated);
        Ok(updated)
    }

    /// Sends one message to the active session and streams the reply into the transcript.
    ///
    /// Blank input is ignored.  Without an active session, or while another
    /// request is outstanding, nothing is sent and an error is returned.
    /// Failures after the request went out are shown as an error bubble and
    /// reported through [`SubmitOutcome::Failed`].
    pub async fn submit(&mut self, text: &str) -> Result<SubmitOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }
        let Some(session_id) = self.directory.active_id().map(str::to_string) else {
            SUBMISSIONS_REJECTED.click();
            self.renderer.print_notice(&Error::NoActiveSession.to_string());
            return Err(Error::NoActiveSession);
        };
        let _guard = self.controls.begin().inspect_err(|_| SUBMISSIONS_REJECTED.click())?;
        SUBMISSIONS.click();
        self.controls.clear_interrupt();
        self.renderer.set_pending(true);

        self.state = SubmitState::Sending;
        self.transcript.append_submitted(text, self.renderer.as_mut());
        let handle = self.transcript.open(MessageRole::Assistant, self.renderer.as_mut());
        let outcome = self.stream_reply(&session_id, text, handle).await;
        self.transcript.close(handle, self.renderer.as_mut());

        match &outcome {
            SubmitOutcome::Failed(err) => {
                SUBMISSIONS_FAILED.click();
                let bubble = format!("Error: {}", err.description());
                self.transcript
                    .append(MessageRole::Assistant, &bubble, self.renderer.as_mut());
            }
            SubmitOutcome::Interrupted { .. } => {
                self.renderer.print_interrupted();
                self.refresh_sessions().await;
            }
            _ => {
                self.refresh_sessions().await;
            }
        }
        self.controls.clear_interrupt();
        self.state = SubmitState::Idle;
        self.renderer.set_pending(false);
        Ok(outcome)
    }

    /// Runs one parsed slash command.  Failures are shown as notices.
    ///
    /// Commands that change sessions are refused while a request is pending.
    pub async fn handle_command(&mut self, command: ChatCommand) -> CommandOutcome {
        if command.mutates_sessions() && self.controls.is_pending() {
            self.notify("Command unavailable", &Error::Busy);
            return CommandOutcome::Continue;
        }
        match command {
            ChatCommand::New(title) => {
                if let Err(err) = self.create_new_session(title.as_deref()).await {
                    self.notify("Failed to create session", &err);
                }
            }
            ChatCommand::Delete => {
                if let Err(err) = self.delete_current_session().await {
                    self.notify("Failed to delete session", &err);
                }
            }
            ChatCommand::DeepThink(value) => {
                if let Err(err) = self.toggle_deep_think(value).await {
                    self.notify("Failed to update deep-think", &err);
                }
            }
            ChatCommand::Rename(title) => {
                if let Err(err) = self.rename_session(&title).await {
                    self.notify("Failed to rename session", &err);
                }
            }
            ChatCommand::Sessions => {
                if let Err(err) = self.load_sessions().await {
                    self.notify("Failed to load sessions", &err);
                }
                self.renderer
                    .print_session_list(self.directory.sessions(), self.directory.active_id());
            }
            ChatCommand::Switch(selector) => match self.directory.resolve(&selector) {
                Some(id) => {
                    let id = id.to_string();
                    if let Err(err) = self.switch_session(&id).await {
                        self.notify("Failed to switch session", &err);
                    }
                }
                None => self
                    .renderer
                    .print_error(&format!("No session matches '{selector}'; try /sessions")),
            },
            ChatCommand::History => {
                if let Err(err) = self.reload_transcript().await {
                    self.notify("Failed to load messages", &err);
                }
            }
            ChatCommand::Clear => {
                self.renderer
                    .print_info("/clear is only available with --legacy; use /delete instead");
            }
            ChatCommand::Help => self.renderer.print_info(help_text()),
            ChatCommand::Quit => return CommandOutcome::Quit,
            ChatCommand::Invalid(message) => self.renderer.print_error(&message),
        }
        CommandOutcome::Continue
    }

    /// Shows an operation failure as a notice.
    pub fn notify(&mut self, context: &str, err: &Error) {
        self.renderer.print_notice(&format!("{context}: {}", err.description()));
    }

    fn active_id(&self) -> Result<String> {
        self.directory
            .active_id()
            .map(str::to_string)
            .ok_or(Error::NoActiveSession)
    }

    async fn show_session(&mut self, id: &str) -> Result<()> {
        let session = self.backend.get_session(id).await?;
        let messages = self.backend.list_messages(id).await?;
        let renderer = self.renderer.as_mut();
        self.transcript.reset(renderer);
        renderer.print_session_header(&session);
        self.transcript.show(&messages, renderer);
        self.directory.activate(session);
        Ok(())
    }

    async fn refresh_sessions(&mut self) {
        if let Err(err) = self.load_sessions().await {
            self.renderer
                .print_error(&format!("Failed to refresh sessions: {}", err.description()));
        }
    }

    async fn stream_reply(
        &mut self,
        session_id: &str,
        text: &str,
        handle: BubbleHandle,
    ) -> SubmitOutcome {
        let backend = Arc::clone(&self.backend);
        let interrupt = self.controls.interrupt_flag();

        let opened = tokio::select! {
            opened = backend.chat_stream(session_id, text) => opened,
            _ = wait_for_interrupt(&interrupt) => {
                return SubmitOutcome::Interrupted { partial: String::new() };
            }
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return SubmitOutcome::Failed(err),
        };

        self.state = SubmitState::Streaming;
        let mut reply = String::new();
        let mut chunks = 0;
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = wait_for_interrupt(&interrupt) => {
                    return SubmitOutcome::Interrupted { partial: reply };
                }
            };
            match next {
                Some(Ok(chunk)) => {
                    chunks += 1;
                    reply.push_str(&chunk);
                    self.transcript
                        .replace(handle, &reply, self.renderer.as_mut());
                }
                Some(Err(err)) => return SubmitOutcome::Failed(err),
                None => return SubmitOutcome::Completed { reply, chunks },
            }
        }
    }
}
