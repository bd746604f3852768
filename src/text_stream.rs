//! Incremental decoding of a raw text response body.
//!
//! The chat endpoint streams the reply as plain UTF-8 with no framing, so a
//! chunk boundary may fall in the middle of a multi-byte character.  The
//! decoder holds such a partial sequence back until the rest arrives.

use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::{Error, Result};

/// A stream of decoded text chunks, in arrival order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming UTF-8 decoder.
///
/// Invalid sequences decode to U+FFFD; an incomplete trailing sequence is kept
/// until more bytes arrive or the stream finishes.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Creates a decoder with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `bytes` (after anything buffered) as is complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid = start + err.valid_up_to();
                    // valid_up_to always lands on a char boundary.
                    out.push_str(
                        std::str::from_utf8(&self.pending[start..valid]).unwrap_or_default(),
                    );
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }

    /// Flushes the decoder at end of input.
    ///
    /// A sequence that never completed becomes a single U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    /// Returns true if a partial character is buffered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Turn a response byte stream into a stream of non-empty text chunks.
pub fn decode_text_stream<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let stream = Box::pin(byte_stream.map(|result| {
        result.map_err(|e| {
            Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
        })
    }));
    decode_chunks(stream)
}

/// Same as [`decode_text_stream`] for any fallible byte stream.
///
/// ```
/// use bytes::Bytes;
/// use futures::stream::{self, StreamExt};
/// use deepchat::text_stream::decode_chunks;
///
/// # tokio_test::block_on(async {
/// let word = "héllo".as_bytes();
/// let parts = vec![
///     Ok(Bytes::copy_from_slice(&word[..2])),
///     Ok(Bytes::copy_from_slice(&word[2..])),
/// ];
/// let chunks: Vec<String> = decode_chunks(stream::iter(parts))
///     .map(|chunk| chunk.unwrap())
///     .collect()
///     .await;
/// assert_eq!(chunks, vec!["h", "éllo"]);
/// # });
/// ```
pub fn decode_chunks<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    stream::unfold(
        (byte_stream, Utf8Decoder::new(), false),
        |(mut stream, mut decoder, done)| async move {
            if done {
                return None;
            }
            loop {
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        let text = decoder.push(&bytes);
                        if !text.is_empty() {
                            return Some((Ok(text), (stream, decoder, false)));
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, decoder, true)));
                    }
                    None => {
                        let tail = decoder.finish();
                        if tail.is_empty() {
                            return None;
                        }
                        return Some((Ok(tail), (stream, decoder, true)));
                    }
                }
            }
        },
    )
}
