//! Logging trait for deepchat client operations.
//!
//! This module provides the [`ClientLogger`] trait that allows users to capture
//! and log all API interactions passing through the [`ChatClient`](crate::ChatClient).

use std::io::Write;
use std::sync::Mutex;

use crate::Error;

/// A trait for logging client operations.
///
/// Every method has an empty default so implementors only override what they
/// care about.
///
/// # Example
///
/// ```rust,ignore
/// use deepchat::{ClientLogger, Error};
///
/// struct StderrLogger;
///
/// impl ClientLogger for StderrLogger {
///     fn log_error(&self, method: &str, path: &str, error: &Error) {
///         eprintln!("{method} {path}: {error}");
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Log an outgoing request.
    fn log_request(&self, method: &str, path: &str) {
        _ = method;
        _ = path;
    }

    /// Log a completed response and how long it took, in seconds.
    fn log_response(&self, method: &str, path: &str, status: u16, elapsed: f64) {
        _ = method;
        _ = path;
        _ = status;
        _ = elapsed;
    }

    /// Log one decoded chunk of a streamed reply.
    fn log_stream_chunk(&self, chunk: &str) {
        _ = chunk;
    }

    /// Log the end of a streamed reply with the number of bytes received.
    fn log_stream_end(&self, bytes: u64, elapsed: f64) {
        _ = bytes;
        _ = elapsed;
    }

    /// Log a failed request.
    fn log_error(&self, method: &str, path: &str, error: &Error) {
        _ = method;
        _ = path;
        _ = error;
    }
}

/// A [`ClientLogger`] that writes one line per event to any writer.
///
/// Stream chunks are not written; they would interleave with the rendered reply.
pub struct WriterLogger<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterLogger<W> {
    /// Creates a logger that writes to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the logger and returns the writer.
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn line(&self, line: std::fmt::Arguments<'_>) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{line}");
        }
    }
}

impl<W: Write + Send> ClientLogger for WriterLogger<W> {
    fn log_request(&self, method: &str, path: &str) {
        self.line(format_args!("request {method} {path}"));
    }

    fn log_response(&self, method: &str, path: &str, status: u16, elapsed: f64) {
        self.line(format_args!(
            "response {method} {path} status={status} elapsed={elapsed:.3}s"
        ));
    }

    fn log_stream_end(&self, bytes: u64, elapsed: f64) {
        self.line(format_args!("stream end bytes={bytes} elapsed={elapsed:.3}s"));
    }

    fn log_error(&self, method: &str, path: &str, error: &Error) {
        self.line(format_args!("error {method} {path}: {error}"));
    }
}
