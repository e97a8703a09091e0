//! Request correlation IDs and debug summaries.
//!
//! Every call gets a `request_id` so that its request, retry, and response
//! log lines can be grouped. When [`ClientConfig::debug`](crate::ClientConfig::debug)
//! is set, the client also logs a summary of each request and response at
//! `info` level. Logging goes through `tracing` and never fails the call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tracing::info;

use crate::{CompletionRequest, Usage};

/// Maximum characters shown for message and content previews.
pub const PREVIEW_CHARS: usize = 500;

/// Generate a unique ID for one client call.
pub fn generate_request_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Use a counter to handle sub-nanosecond calls.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("rq-{ts:x}-{count:04x}")
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().nth(max_chars).is_some() {
        out.push_str("...");
    }
    out
}

/// Log what is about to be sent.
pub fn log_request_summary(
    request_id: &str,
    endpoint: &str,
    model: &str,
    request: &CompletionRequest,
    streaming: bool,
) {
    let max_tokens = request
        .max_output_tokens
        .map_or_else(|| "unset".to_string(), |t| t.to_string());
    info!(
        "[{request_id}] LLM request: model={model}, endpoint={endpoint}, temperature={}, \
         max_tokens={max_tokens}, messages={}, streaming={streaming}",
        request.temperature.unwrap_or(crate::DEFAULT_TEMPERATURE),
        request.messages.len(),
    );
    for (i, msg) in request.messages.iter().enumerate() {
        info!("[{request_id}]   [{i}] {}: {}", msg.role, msg.preview(PREVIEW_CHARS));
    }
}

/// Log the outcome of a one-shot call.
pub fn log_response_summary(
    request_id: &str,
    elapsed: Duration,
    finish_reason: Option<&str>,
    usage: Option<&Usage>,
    content: Option<&str>,
) {
    let usage_line = match usage {
        Some(u) => format!(
            "prompt {} / completion {} / total {}",
            u.prompt_tokens, u.completion_tokens, u.total_tokens
        ),
        None => "not reported".to_string(),
    };
    info!(
        "[{request_id}] LLM response in {}ms: finish_reason={}, usage: {usage_line}",
        elapsed.as_millis(),
        finish_reason.unwrap_or("none"),
    );
    info!(
        "[{request_id}]   content: {}",
        content.map_or_else(|| "(none)".to_string(), |c| preview(c, PREVIEW_CHARS))
    );
}
