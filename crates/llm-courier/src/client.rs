//! The one-shot completion invoker.
//!
//! [`LlmClient`] owns the read-only configuration, a pooled HTTP client, and
//! the event handler. [`complete`](LlmClient::complete) sends one request
//! through the retry policy and normalizes the response into a
//! [`CompletionResult`]. Streaming lives in [`api::streaming`](crate::api::streaming)
//! and structured extraction in [`api::extract`](crate::api::extract); both
//! reuse the plumbing here.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, trace};

use crate::api::diagnostics::{self, generate_request_id};
use crate::api::retry::{RetryPolicy, send_with_retry};
use crate::config::ClientConfig;
use crate::error::{LlmError, Result};
use crate::events::{ClientEvent, EventHandler, LoggingHandler, notify_usage};
use crate::{ChatBody, CompletionRequest, CompletionResult, RawChatResponse};

/// Characters of the raw body kept in protocol-error diagnostics.
const SNAPSHOT_CHARS: usize = 500;

/// Async client for a single chat-completions endpoint.
///
/// Holds no per-call state; share it freely across tasks.
pub struct LlmClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: ClientConfig,
    pub(crate) retry: RetryPolicy,
    pub(crate) handler: Arc<dyn EventHandler>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("debug", &self.config.debug)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client. Missing credentials are not rejected here; every call
    /// checks them first and fails with [`LlmError::Configuration`].
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("llm-courier/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            retry: RetryPolicy::default(),
            handler: Arc::new(LoggingHandler),
        })
    }

    /// Replace the event handler (default: [`LoggingHandler`]).
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a one-shot chat completion request.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult> {
        self.config.validate()?;
        let model = self.config.resolve_model(&request.model).to_string();
        let request_id = generate_request_id();
        let body = request.to_body(&model, false);

        if self.config.debug {
            diagnostics::log_request_summary(
                &request_id,
                &self.config.base_url,
                &model,
                &request,
                false,
            );
        }
        trace!(
            "[{request_id}] payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let response = self.send(&request_id, &model, &body, false).await?;
        if !response.status().is_success() {
            return Err(Self::remote_error(response).await);
        }

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(format!("failed to read response: {e}")))?;
        debug!("[{request_id}] received {} bytes", text.len());

        let parsed = parse_completion(&text);

        if self.config.debug {
            let (finish, usage, content) = match &parsed {
                Ok(r) => (
                    Some(r.finish_reason.as_str()),
                    r.usage.as_ref(),
                    Some(r.content.as_str()),
                ),
                Err(_) => (None, None, None),
            };
            diagnostics::log_response_summary(
                &request_id,
                start.elapsed(),
                finish,
                usage,
                content,
            );
        }

        let result = parsed?;
        notify_usage(self.handler.as_ref(), result.usage.as_ref());
        if result.is_truncated() {
            self.handler.on_event(&ClientEvent::Truncated {
                request_id: &request_id,
                model: &model,
            });
        }
        Ok(result)
    }

    /// Run several requests one after another.
    ///
    /// Each request's full round trip, retries included, finishes before the
    /// next starts. The first failure aborts the batch.
    pub async fn complete_batch(
        &self,
        requests: impl IntoIterator<Item = CompletionRequest>,
    ) -> Result<Vec<CompletionResult>> {
        let mut results = Vec::new();
        for request in requests {
            results.push(self.complete(request).await?);
        }
        Ok(results)
    }

    /// POST a body through the retry policy and return the final response,
    /// whatever its status.
    pub(crate) async fn send(
        &self,
        request_id: &str,
        model: &str,
        body: &ChatBody<'_>,
        streaming: bool,
    ) -> Result<reqwest::Response> {
        self.handler.on_event(&ClientEvent::RequestStarted {
            request_id,
            model,
            endpoint: &self.config.base_url,
            message_count: body.messages.len(),
            streaming,
        });

        let start = Instant::now();
        let response = send_with_retry(&self.retry, self.handler.as_ref(), || {
            let builder = self
                .http
                .post(&self.config.base_url)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .json(body);
            // A stream may run past the deadline as long as data keeps
            // arriving; the client's read timeout bounds each stall.
            let builder = if streaming {
                builder
            } else {
                builder.timeout(self.config.timeout)
            };
            builder.send()
        })
        .await?;

        self.handler.on_event(&ClientEvent::ResponseReceived {
            request_id,
            status: response.status().as_u16(),
            elapsed: start.elapsed(),
        });
        Ok(response)
    }

    /// Turn a non-2xx response into [`LlmError::RemoteApi`].
    pub(crate) async fn remote_error(response: reqwest::Response) -> LlmError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        LlmError::RemoteApi {
            status,
            message: extract_error_message(status, &body),
        }
    }
}

// ── Response normalization ─────────────────────────────────────────

/// Error envelope shapes seen in the wild.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorField>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Object { message: Option<String> },
}

/// Best-effort error message from a non-2xx body.
///
/// Accepts `{"error": "..."}`, `{"error": {"message": "..."}}` and
/// `{"message": "..."}`; anything else becomes `HTTP <status>: <body>`.
pub fn extract_error_message(status: u16, body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let message = match envelope.error {
            Some(ErrorField::Text(m)) => Some(m),
            Some(ErrorField::Object { message }) => message,
            None => None,
        }
        .or(envelope.message)
        .filter(|m| !m.trim().is_empty());
        if let Some(m) = message {
            return m;
        }
    }
    format!("HTTP {status}: {}", body.trim())
}

/// Parse a 2xx body into a [`CompletionResult`].
///
/// Fails with [`LlmError::Protocol`] when the body is not JSON or the first
/// choice has no assistant message content.
pub fn parse_completion(text: &str) -> Result<CompletionResult> {
    let raw: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        LlmError::Protocol(format!(
            "response is not valid JSON ({e}). Raw response: {}",
            diagnostics::preview(text, SNAPSHOT_CHARS)
        ))
    })?;
    let parsed: RawChatResponse = serde_json::from_value(raw.clone()).map_err(|e| {
        LlmError::Protocol(format!(
            "unexpected response shape ({e}). Raw response: {}",
            diagnostics::preview(text, SNAPSHOT_CHARS)
        ))
    })?;

    let choice = parsed.choices.and_then(|c| c.into_iter().next());
    let (message, finish_reason) = match choice {
        Some(c) => (c.message, c.finish_reason),
        None => (None, None),
    };
    let Some((content, reasoning_details)) =
        message.and_then(|m| m.content.map(|c| (c, m.reasoning_details)))
    else {
        return Err(LlmError::Protocol(format!(
            "no response from model. Raw response: {}",
            diagnostics::preview(text, SNAPSHOT_CHARS)
        )));
    };

    Ok(CompletionResult {
        content,
        reasoning_details,
        usage: parsed.usage,
        finish_reason: finish_reason.unwrap_or_else(|| "unknown".to_string()),
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_message_from_string_field() {
        let msg = extract_error_message(400, r#"{"error": "bad model"}"#);
        assert_eq!(msg, "bad model");
    }

    #[test]
    fn error_message_from_nested_object() {
        let body = json!({"error": {"message": "quota exceeded", "code": 429}}).to_string();
        assert_eq!(extract_error_message(429, &body), "quota exceeded");
    }

    #[test]
    fn error_message_from_top_level_message() {
        assert_eq!(
            extract_error_message(401, r#"{"message": "Unauthorized"}"#),
            "Unauthorized"
        );
    }

    #[test]
    fn error_message_falls_back_to_status_and_body() {
        assert_eq!(
            extract_error_message(502, "<html>Bad Gateway</html>\n"),
            "HTTP 502: <html>Bad Gateway</html>"
        );
        assert_eq!(
            extract_error_message(400, r#"{"detail": "nope"}"#),
            r#"HTTP 400: {"detail": "nope"}"#
        );
        assert_eq!(
            extract_error_message(500, r#"{"error": {"code": 1}}"#),
            r#"HTTP 500: {"error": {"code": 1}}"#
        );
    }

    #[test]
    fn parses_full_completion() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Hello!",
                    "reasoning_details": [{"type": "reasoning.text", "text": "greet"}]
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        });
        let result = parse_completion(&body.to_string()).unwrap();
        assert_eq!(result.content, "Hello!");
        assert_eq!(result.finish_reason, "stop");
        assert_eq!(result.usage.unwrap().total_tokens, 12);
        assert!(result.reasoning_details.is_some());
        assert_eq!(result.raw["id"], "chatcmpl-1");
        assert!(!result.is_truncated());
    }

    #[test]
    fn missing_message_is_protocol_error() {
        for body in [
            json!({"choices": []}),
            json!({"choices": [{"finish_reason": "stop"}]}),
            json!({"choices": [{"message": {"role": "assistant", "content": null}}]}),
            json!({"id": "x"}),
        ] {
            let err = parse_completion(&body.to_string()).unwrap_err();
            let LlmError::Protocol(msg) = err else {
                panic!("expected protocol error for {body}");
            };
            assert!(msg.contains("Raw response"));
        }
    }

    #[test]
    fn protocol_error_snapshot_is_truncated() {
        let body = json!({"choices": [], "padding": "x".repeat(5_000)}).to_string();
        let LlmError::Protocol(msg) = parse_completion(&body).unwrap_err() else {
            panic!("expected protocol error");
        };
        assert!(msg.len() < 1_000);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn non_json_body_is_protocol_error() {
        assert!(matches!(
            parse_completion("<html>ok</html>"),
            Err(LlmError::Protocol(_))
        ));
    }

    #[test]
    fn missing_finish_reason_normalized() {
        let body = json!({"choices": [{"message": {"content": ""}}]});
        let result = parse_completion(&body.to_string()).unwrap();
        assert_eq!(result.content, "");
        assert_eq!(result.finish_reason, "unknown");
    }

    #[test]
    fn null_usage_counts_do_not_fail_completion() {
        let body = json!({
            "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 4, "completion_tokens": null, "total_tokens": null}
        });
        let result = parse_completion(&body.to_string()).unwrap();
        assert_eq!(result.content, "ok");
        assert_eq!(result.usage.map(|u| u.prompt_tokens), Some(4));
    }

    #[test]
    fn new_client_accepts_partial_config() {
        let client = LlmClient::new(ClientConfig::default()).unwrap();
        assert!(client.config().api_key.is_empty());
        assert_eq!(client.retry.max_attempts, 2);
    }

    #[tokio::test]
    async fn missing_key_fails_before_network() {
        // Port 9 (discard) would refuse; the call must fail before trying.
        let client = LlmClient::new(ClientConfig::new("", "http://127.0.0.1:9")).unwrap();
        let request = CompletionRequest::new("m", vec![crate::Message::user("hi")]);
        let err = client.complete(request).await.unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));
    }
}
