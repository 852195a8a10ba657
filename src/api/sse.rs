//! Server-Sent Events
//!
//! Splits a raw byte stream into event payloads regardless of how the network
//! chunks it, and classifies each payload as data or an API error envelope.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::completion::{ApiErrorBody, ErrorEnvelope};

/// Sentinel payload that marks the end of a completion stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental SSE line splitter. One instance per stream.
///
/// Bytes are buffered until a newline arrives, so a chunk boundary may fall
/// anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseLineSplitter {
    buffer: Vec<u8>,
}

impl SseLineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment, returning every payload it completed in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = extract_payload(&String::from_utf8_lossy(&line)) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Bytes received after the last newline
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }
}

/// Turn one raw line into a payload; `None` for blanks, comments and `[DONE]`.
fn extract_payload(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = line
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(line);

    if payload.is_empty() || payload == DONE_SENTINEL {
        return None;
    }

    Some(payload.to_string())
}

/// A parsed SSE payload
#[derive(Debug, Clone, PartialEq)]
pub enum SsePayload<T> {
    /// A regular data event
    Data(T),

    /// The server reported an error in-band
    Error(ApiErrorBody),
}

/// Parse a payload as JSON, surfacing error envelopes separately from data.
pub fn parse_payload<T: DeserializeOwned>(payload: &str) -> Result<SsePayload<T>, serde_json::Error> {
    let value: Value = serde_json::from_str(payload)?;

    if let Some(envelope) = ErrorEnvelope::from_value(&value) {
        return Ok(SsePayload::Error(envelope.error));
    }

    serde_json::from_value(value).map(SsePayload::Data)
}

pin_project! {
    /// Adapts a byte stream into a stream of SSE payloads.
    ///
    /// Transport errors pass through unchanged. The stream ends when the
    /// source ends; any unterminated trailing bytes are dropped.
    pub struct SseLines<S> {
        #[pin]
        inner: S,
        splitter: SseLineSplitter,
        pending: VecDeque<String>,
        finished: bool,
    }
}

impl<S> SseLines<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            splitter: SseLineSplitter::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseLines<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<String, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(payload) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(payload)));
            }

            if *this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.splitter.push(&chunk));
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    *this.finished = true;
                    if !this.splitter.remainder().is_empty() {
                        tracing::debug!(
                            bytes = this.splitter.remainder().len(),
                            "dropping unterminated trailing SSE data"
                        );
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
