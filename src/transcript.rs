//! The rendered view of one session's messages.
//!
//! Rendering is purely additive: bubbles are appended and the text of a bubble
//! can be replaced through its handle, but nothing is ever removed except by
//! [`Transcript::reset`].  A reset bumps the generation, so handles taken
//! before it can no longer write into the new transcript.

use crate::render::Renderer;
use crate::types::{Message, MessageRole};

/// The assistant greeting shown in an empty transcript.  It is never persisted.
pub const WELCOME_MESSAGE: &str =
    "👋 Hi, I'm your AI assistant.\n\nAsk me anything and I'll do my best to help!";

/// Opaque reference to one bubble of one transcript generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BubbleHandle {
    index: usize,
    generation: u64,
}

/// One rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble {
    /// Who the bubble belongs to.
    pub role: MessageRole,
    /// What it currently shows.
    pub text: String,
}

/// Ordered bubbles plus the generation they belong to.
#[derive(Debug, Default)]
pub struct Transcript {
    bubbles: Vec<Bubble>,
    generation: u64,
    streaming: Option<usize>,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all bubbles.
    pub fn reset(&mut self, renderer: &mut dyn Renderer) {
        self.bubbles.clear();
        self.streaming = None;
        self.generation += 1;
        renderer.clear();
    }

    /// Appends the welcome greeting.
    pub fn render_welcome(&mut self, renderer: &mut dyn Renderer) -> BubbleHandle {
        self.append(MessageRole::Assistant, WELCOME_MESSAGE, renderer)
    }

    /// Appends one bubble after the last and scrolls to it.
    pub fn append(
        &mut self,
        role: MessageRole,
        content: &str,
        renderer: &mut dyn Renderer,
    ) -> BubbleHandle {
        self.close_stream(renderer);
        renderer.print_message(role, content);
        renderer.scroll_to_end();
        self.push(role, content)
    }

    /// Appends the user's own just-submitted message.
    pub fn append_submitted(&mut self, content: &str, renderer: &mut dyn Renderer) -> BubbleHandle {
        self.close_stream(renderer);
        renderer.print_submitted(content);
        renderer.scroll_to_end();
        self.push(MessageRole::User, content)
    }

    /// Opens an empty bubble whose text will be replaced as a reply streams in.
    pub fn open(&mut self, role: MessageRole, renderer: &mut dyn Renderer) -> BubbleHandle {
        self.close_stream(renderer);
        renderer.begin_message(role);
        renderer.scroll_to_end();
        let handle = self.push(role, "");
        self.streaming = Some(handle.index);
        handle
    }

    /// Replaces the visible text of a bubble.
    ///
    /// Returns false, rendering nothing, when the handle is from an earlier
    /// generation.  When the new text extends the old only the new suffix is
    /// rendered.
    pub fn replace(
        &mut self,
        handle: BubbleHandle,
        text: &str,
        renderer: &mut dyn Renderer,
    ) -> bool {
        if handle.generation != self.generation {
            return false;
        }
        let Some(bubble) = self.bubbles.get_mut(handle.index) else {
            return false;
        };
        if bubble.text == text {
            return true;
        }
        let is_open = self.streaming == Some(handle.index);
        match text.strip_prefix(bubble.text.as_str()) {
            Some(suffix) if is_open => renderer.print_text(suffix),
            _ => {
                renderer.rewrite_message(bubble.role, text);
                self.streaming = Some(handle.index);
            }
        }
        bubble.text = text.to_string();
        renderer.scroll_to_end();
        true
    }

    /// Closes a bubble opened with [`Transcript::open`].
    pub fn close(&mut self, handle: BubbleHandle, renderer: &mut dyn Renderer) {
        if handle.generation == self.generation && self.streaming == Some(handle.index) {
            self.close_stream(renderer);
        }
    }

    /// Appends every message in order, or the welcome greeting if there are none.
    pub fn show(&mut self, messages: &[Message], renderer: &mut dyn Renderer) {
        if messages.is_empty() {
            self.render_welcome(renderer);
        } else {
            for message in messages {
                self.append(message.role, &message.content, renderer);
            }
        }
    }

    /// The bubbles in order.
    pub fn bubbles(&self) -> &[Bubble] {
        &self.bubbles
    }

    /// The most recent bubble.
    pub fn last(&self) -> Option<&Bubble> {
        self.bubbles.last()
    }

    /// The number of bubbles.
    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    /// Returns true if nothing is shown.
    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    /// The current generation; bumped by every reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if the transcript shows only the welcome greeting.
    pub fn is_welcome_only(&self) -> bool {
        matches!(
            self.bubbles.as_slice(),
            [Bubble { role: MessageRole::Assistant, text }] if text == WELCOME_MESSAGE
        )
    }

    fn push(&mut self, role: MessageRole, content: &str) -> BubbleHandle {
        self.bubbles.push(Bubble {
            role,
            text: content.to_string(),
        });
        BubbleHandle {
            index: self.bubbles.len() - 1,
            generation: self.generation,
        }
    }

    fn close_stream(&mut self, renderer: &mut dyn Renderer) {
        if self.streaming.take().is_some() {
            renderer.finish_message();
        }
    }
}
