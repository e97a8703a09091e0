//! Server-Sent Events (SSE) streaming for chat completions.
//!
//! [`SseDecoder`] turns raw body chunks into [`StreamEvent`]s. It buffers
//! bytes until a full line is available, so lines (and multi-byte
//! characters) split across reads are reassembled in order.
//! [`TextDeltaStream`] drives the decoder from a live HTTP response and hands
//! out text deltas one at a time as the caller asks for them.
//!
//! Wire format, one frame per line:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//! data: [DONE]
//! ```
//!
//! Empty lines, `:` comments, other fields, and the `[DONE]` sentinel are
//! ignored. A `data:` line whose JSON does not decode is skipped; later lines
//! are still delivered. The stream ends when the body ends.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::api::diagnostics;
use crate::error::{LlmError, Result};
use crate::events::{ClientEvent, EventHandler, notify_usage};
use crate::{CompletionRequest, FINISH_REASON_LENGTH, LlmClient, Usage};

/// A single decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental, non-empty text content delta.
    TextDelta(String),
    /// The first choice reported why generation stopped.
    FinishReason(String),
    /// Token usage (usually in the final chunk).
    Usage(Usage),
    /// A `data:` payload that is not a valid event; carries the payload.
    Malformed(String),
}

/// Raw SSE data chunk.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

/// Incremental line decoder for `data:` event streams.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            decode_line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }

    /// Decode whatever is left once the body has ended (a final line with no
    /// trailing newline).
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        if !rest.is_empty() {
            decode_line(&String::from_utf8_lossy(&rest), &mut events);
        }
        events
    }

    /// Bytes held back waiting for a newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &str, events: &mut Vec<StreamEvent>) {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return;
    }
    let Some(data) = line.strip_prefix("data:") else {
        trace!("Ignoring non-data stream line: {line}");
        return;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return;
    }
    parse_sse_data(data, events);
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str, events: &mut Vec<StreamEvent>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let first = chunk.choices.and_then(|c| c.into_iter().next());
            if let Some(choice) = first {
                if let Some(content) = choice.delta.and_then(|d| d.content)
                    && !content.is_empty()
                {
                    events.push(StreamEvent::TextDelta(content));
                }
                if let Some(reason) = choice.finish_reason {
                    events.push(StreamEvent::FinishReason(reason));
                }
            }
            if let Some(usage) = chunk.usage {
                events.push(StreamEvent::Usage(usage));
            }
        }
        Err(e) => {
            debug!("Skipping malformed SSE chunk: {e}");
            events.push(StreamEvent::Malformed(data.to_string()));
        }
    }
}

/// Concatenate the text deltas in a sequence of events.
pub fn collect_deltas(events: &[StreamEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let StreamEvent::TextDelta(delta) = event {
            text.push_str(delta);
        }
    }
    text
}

// ── Pull-based delta stream ────────────────────────────────────────

/// Lazy, finite, non-restartable sequence of text deltas for one request.
///
/// Call [`next_delta`](Self::next_delta) until it returns `Ok(None)`. Body
/// reads happen only when the caller asks for the next delta. The HTTP
/// connection is released as soon as the body ends, on a read error, or when
/// this value is dropped.
pub struct TextDeltaStream {
    response: Option<reqwest::Response>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    delivered: usize,
    request_id: String,
    model: String,
    handler: Arc<dyn EventHandler>,
}

impl std::fmt::Debug for TextDeltaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextDeltaStream")
            .field("request_id", &self.request_id)
            .field("model", &self.model)
            .field("open", &self.response.is_some())
            .field("pending", &self.pending.len())
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl TextDeltaStream {
    pub(crate) fn new(
        response: reqwest::Response,
        request_id: String,
        model: String,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            response: Some(response),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finish_reason: None,
            usage: None,
            delivered: 0,
            request_id,
            model,
            handler,
        }
    }

    /// The next delta, or `Ok(None)` once the body has ended.
    ///
    /// A body-read failure is returned once as [`LlmError::Network`]; the
    /// stream is finished afterwards. Nothing is retried mid-stream.
    pub async fn next_delta(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                self.delivered += 1;
                return Ok(Some(delta));
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let events = self.decoder.feed(&chunk);
                    self.absorb(events);
                }
                Ok(None) => {
                    let events = self.decoder.finish();
                    self.absorb(events);
                    self.response = None;
                    self.handler.on_event(&ClientEvent::StreamFinished {
                        request_id: &self.request_id,
                        deltas: self.delivered + self.pending.len(),
                    });
                }
                Err(e) => {
                    self.response = None;
                    return Err(LlmError::Network(format!(
                        "failed to read streaming chunk: {e}"
                    )));
                }
            }
        }
    }

    fn absorb(&mut self, events: Vec<StreamEvent>) {
        for event in events {
            match event {
                StreamEvent::TextDelta(delta) => self.pending.push_back(delta),
                StreamEvent::FinishReason(reason) => {
                    if reason == FINISH_REASON_LENGTH {
                        self.handler.on_event(&ClientEvent::Truncated {
                            request_id: &self.request_id,
                            model: &self.model,
                        });
                    }
                    self.finish_reason = Some(reason);
                }
                StreamEvent::Usage(usage) => {
                    notify_usage(self.handler.as_ref(), Some(&usage));
                    self.usage = Some(usage);
                }
                StreamEvent::Malformed(line) => {
                    self.handler
                        .on_event(&ClientEvent::MalformedStreamLine { line: &line });
                }
            }
        }
    }

    /// Finish reason seen so far, if any.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Token usage seen so far, if any.
    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Correlation ID of the underlying request.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Drain the remaining deltas into one string.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(delta) = self.next_delta().await? {
            text.push_str(&delta);
        }
        Ok(text)
    }

    /// Adapt into a [`futures::Stream`]. A read error is yielded once, then
    /// the stream ends.
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            match stream.next_delta().await {
                Ok(Some(delta)) => Some((Ok(delta), stream)),
                Ok(None) => None,
                Err(e) => Some((Err(e), stream)),
            }
        })
    }
}

impl LlmClient {
    /// Open a streaming completion and return its text deltas.
    ///
    /// Only the connection attempt (send and status) goes through the retry
    /// policy. Once the body is being read, failures surface from
    /// [`TextDeltaStream::next_delta`] and are never retried, since partial
    /// output cannot be replayed.
    pub async fn stream(&self, request: CompletionRequest) -> Result<TextDeltaStream> {
        self.config.validate()?;
        let model = self.config.resolve_model(&request.model).to_string();
        let request_id = diagnostics::generate_request_id();
        let body = request.to_body(&model, true);

        if self.config.debug {
            diagnostics::log_request_summary(
                &request_id,
                &self.config.base_url,
                &model,
                &request,
                true,
            );
        }

        let response = self.send(&request_id, &model, &body, true).await?;
        if !response.status().is_success() {
            return Err(Self::remote_error(response).await);
        }

        debug!("[{request_id}] stream opened");
        Ok(TextDeltaStream::new(
            response,
            request_id,
            model,
            self.handler.clone(),
        ))
    }
}
