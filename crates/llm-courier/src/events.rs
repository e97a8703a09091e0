//! Side-channel notifications emitted by [`LlmClient`](crate::LlmClient).
//!
//! The client reports what happens during a call through [`ClientEvent`]
//! variants: request start, retries, response receipt, token usage, and the
//! two conditions callers most often need to detect, truncated generations
//! and malformed stream lines. Implement [`EventHandler`] to observe them.
//!
//! Handlers are notification-only. They run inline on the calling task, so
//! they should return quickly, and nothing they do changes the call's result.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or silent clients |
//! | [`LoggingHandler`] | Structured logging via `tracing` (the default) |
//! | [`FnEventHandler`] | Quick closures, e.g. counting truncations |
//! | [`CompositeEventHandler`] | Fan out to several handlers in order |

use std::time::Duration;

use crate::Usage;
use tracing::{debug, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during a client call.
#[derive(Debug)]
pub enum ClientEvent<'a> {
    /// A request is about to be sent.
    RequestStarted {
        request_id: &'a str,
        model: &'a str,
        endpoint: &'a str,
        message_count: usize,
        streaming: bool,
    },
    /// An attempt failed transiently and will be retried after `delay`.
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        reason: &'a str,
    },
    /// The final HTTP response headers arrived.
    ResponseReceived {
        request_id: &'a str,
        status: u16,
        elapsed: Duration,
    },
    /// Token usage reported by the endpoint.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },
    /// Generation stopped because the output token limit was reached. The
    /// call still succeeds.
    Truncated { request_id: &'a str, model: &'a str },
    /// A streaming `data:` line could not be decoded and was skipped.
    MalformedStreamLine { line: &'a str },
    /// A stream reached end-of-data.
    StreamFinished { request_id: &'a str, deltas: usize },
}

/// Handler for client events.
///
/// The default implementation ignores every event.
///
/// # Example
///
/// ```ignore
/// struct TruncationAlarm;
///
/// impl EventHandler for TruncationAlarm {
///     fn on_event(&self, event: &ClientEvent<'_>) {
///         if let ClientEvent::Truncated { model, .. } = event {
///             eprintln!("{model} ran out of tokens");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for each event during a call.
    fn on_event(&self, event: &ClientEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// # Example
///
/// ```ignore
/// let truncations = Arc::new(AtomicUsize::new(0));
/// let counter = truncations.clone();
/// let handler = FnEventHandler::new(move |event| {
///     if matches!(event, ClientEvent::Truncated { .. }) {
///         counter.fetch_add(1, Ordering::Relaxed);
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ClientEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ClientEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ClientEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ClientEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// # Example
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(metrics_handler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add a handler only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &ClientEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs every event through `tracing`.
///
/// Truncation and retries are `warn`, usage is `info`, the rest `debug` or
/// `trace`. This is the handler an [`LlmClient`](crate::LlmClient) starts with.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ClientEvent<'_>) {
        match event {
            ClientEvent::RequestStarted {
                request_id,
                model,
                endpoint,
                message_count,
                streaming,
            } => {
                debug!(
                    "[{request_id}] request: model={model}, endpoint={endpoint}, \
                     messages={message_count}, streaming={streaming}"
                );
            }
            ClientEvent::Retrying {
                attempt,
                max_attempts,
                delay,
                reason,
            } => {
                warn!(
                    "Transient failure (attempt {attempt}/{max_attempts}): {reason}. \
                     Retrying in {delay:?}..."
                );
            }
            ClientEvent::ResponseReceived {
                request_id,
                status,
                elapsed,
            } => {
                debug!(
                    "[{request_id}] response: HTTP {status} in {:.1}s",
                    elapsed.as_secs_f64()
                );
            }
            ClientEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            } => {
                info!(
                    "Token usage: prompt={prompt_tokens}, completion={completion_tokens}, \
                     total={total_tokens}"
                );
            }
            ClientEvent::Truncated { request_id, model } => {
                warn!(
                    "[{request_id}] output truncated (finish_reason=length) for {model}. \
                     Consider increasing max_output_tokens."
                );
            }
            ClientEvent::MalformedStreamLine { line } => {
                trace!("Skipped malformed stream line: {line}");
            }
            ClientEvent::StreamFinished { request_id, deltas } => {
                debug!("[{request_id}] stream finished after {deltas} delta(s)");
            }
        }
    }
}

/// Emit a [`ClientEvent::TokenUsage`] for a usage block, if present.
pub(crate) fn notify_usage(handler: &dyn EventHandler, usage: Option<&Usage>) {
    if let Some(u) = usage {
        handler.on_event(&ClientEvent::TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
    }
}
