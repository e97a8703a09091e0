//! Resilient client for OpenAI-style chat-completion endpoints.
//!
//! `llm-courier` sends one-shot, streaming, and structured-JSON completion
//! requests to a single configured endpoint. It retries transient network and
//! server failures with exponential backoff, decodes `data:` event streams
//! incrementally, and recovers JSON from model output that ignores formatting
//! instructions.
//!
//! # Getting started
//!
//! ```ignore
//! use llm_courier::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LlmError> {
//!     let client = LlmClient::new(ClientConfig::from_env())?;
//!
//!     let request = CompletionRequest::new(
//!         "openai/gpt-4o-mini",
//!         vec![
//!             Message::system("You are terse."),
//!             Message::user("Name three prime numbers."),
//!         ],
//!     )
//!     .with_max_output_tokens(64);
//!
//!     let result = client.complete(request).await?;
//!     println!("{}", result.content);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **One-shot calls:** [`LlmClient::complete`] and
//!   [`LlmClient::complete_batch`].
//! - **Streaming:** [`LlmClient::stream`] returns a pull-based
//!   [`TextDeltaStream`](api::streaming::TextDeltaStream). The line decoder
//!   is [`SseDecoder`](api::streaming::SseDecoder).
//! - **Typed JSON output:** [`LlmClient::extract_json`], plus the helpers in
//!   [`api::extract`].
//! - **Retry policy:** [`api::retry`].
//! - **Observing calls:** implement [`EventHandler`](events::EventHandler) to
//!   catch truncated generations, retries, and token usage.
//! - **Failures:** every call returns [`LlmError`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`LlmClient`]: one-shot invoker, batch, and entry points for streaming and extraction |
//! | [`api`] | Retry with backoff, SSE stream decoding, JSON extraction, diagnostics |
//! | [`config`] | [`ClientConfig`] and environment loading |
//! | [`events`] | [`ClientEvent`](events::ClientEvent) notifications and handlers |
//! | [`error`] | [`LlmError`] taxonomy |

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod prelude;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use client::LlmClient;
pub use config::ClientConfig;
pub use error::{LlmError, Result};

// Re-export schemars for downstream crates deriving response schemas.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Sampling temperature used when a request does not set one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Lower bound applied to `max_output_tokens`.
pub const MIN_OUTPUT_TOKENS: u32 = 16;

/// Finish reason reported when generation hit the output token limit.
pub const FINISH_REASON_LENGTH: &str = "length";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use llm_courier::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Verdict {
///     guilty: bool,
///     #[serde(default)]
///     reason: Option<String>,
/// }
///
/// let schema = json_schema_for::<Verdict>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"guilty".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Message body: plain text, or an ordered list of multimodal parts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// One segment of a multi-part message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        cache_control: Option<CacheControl>,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    InputAudio {
        input_audio: InputAudio,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        }
    }

    /// Image reference with a detail hint (e.g. `"low"`, `"high"`).
    pub fn image_url_with_detail(url: impl Into<String>, detail: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: Some(detail.into()),
            },
        }
    }

    /// Inline audio; `data` is the base64-encoded payload.
    pub fn input_audio(data: impl Into<String>, format: AudioFormat) -> Self {
        ContentPart::InputAudio {
            input_audio: InputAudio {
                data: data.into(),
                format,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InputAudio {
    pub data: String,
    pub format: AudioFormat,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
}

/// Prompt-cache hint attached to a text part.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub cache_type: CacheType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ttl: Option<CacheTtl>,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            cache_type: CacheType::Ephemeral,
            ttl: None,
        }
    }

    pub fn ephemeral_one_hour() -> Self {
        Self {
            cache_type: CacheType::Ephemeral,
            ttl: Some(CacheTtl::OneHour),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    Ephemeral,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTtl {
    #[serde(rename = "1h")]
    OneHour,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Reasoning metadata from an earlier assistant turn, passed back so the
    /// model can continue its chain of thought.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reasoning_details: Option<serde_json::Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning_details: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// A user message made of multimodal parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::new(Role::User, MessageContent::Parts(parts))
    }

    /// Attach reasoning metadata returned by an earlier completion.
    pub fn with_reasoning_details(mut self, details: serde_json::Value) -> Self {
        self.reasoning_details = Some(details);
        self
    }

    /// Short printable form of the content, at most `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        match &self.content {
            MessageContent::Text(text) => api::diagnostics::preview(text, max_chars),
            MessageContent::Parts(parts) => {
                let json = serde_json::to_string(parts).unwrap_or_default();
                api::diagnostics::preview(&json, max_chars)
            }
        }
    }
}

// ── Request types ──────────────────────────────────────────────────

/// Output contract requested from the endpoint. Advisory: the endpoint may
/// ignore strictness.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseShape {
    Text,
    JsonObject,
    JsonSchema {
        json_schema: JsonSchemaFormat,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        strict: Option<bool>,
    },
}

/// Named schema carried by [`ResponseShape::JsonSchema`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JsonSchemaFormat {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    pub schema: serde_json::Value,
}

impl ResponseShape {
    /// A named-schema shape from a raw JSON Schema value.
    pub fn json_schema(name: impl Into<String>, schema: serde_json::Value) -> Self {
        ResponseShape::JsonSchema {
            json_schema: JsonSchemaFormat {
                name: name.into(),
                description: None,
                schema,
            },
            strict: None,
        }
    }

    /// A named-schema shape derived from a Rust type.
    pub fn json_schema_for<T: JsonSchema>(name: impl Into<String>) -> Self {
        Self::json_schema(name, json_schema_for::<T>())
    }
}

/// Reasoning toggle as sent on the wire: `{"enabled": bool}`.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReasoningToggle {
    pub enabled: bool,
}

/// A chat-completion request, built per call.
///
/// `messages` must be non-empty; the client does not validate conversation
/// structure.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    /// Per-call model. A model set in [`ClientConfig`] overrides it.
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature. Default: [`DEFAULT_TEMPERATURE`].
    pub temperature: Option<f32>,
    /// Output token limit, clamped to at least [`MIN_OUTPUT_TOKENS`]. No
    /// limit is sent when unset.
    pub max_output_tokens: Option<u32>,
    pub reasoning_enabled: Option<bool>,
    pub response_shape: Option<ResponseShape>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_output_tokens: None,
            reasoning_enabled: None,
            response_shape: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_reasoning(mut self, enabled: bool) -> Self {
        self.reasoning_enabled = Some(enabled);
        self
    }

    pub fn with_response_shape(mut self, shape: ResponseShape) -> Self {
        self.response_shape = Some(shape);
        self
    }

    /// Serializable wire body for this request.
    pub fn to_body<'a>(&'a self, model: &'a str, stream: bool) -> ChatBody<'a> {
        ChatBody {
            model,
            messages: &self.messages,
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_output_tokens.map(|t| t.max(MIN_OUTPUT_TOKENS)),
            stream,
            reasoning: self
                .reasoning_enabled
                .map(|enabled| ReasoningToggle { enabled }),
            response_format: self.response_shape.as_ref(),
        }
    }
}

/// Chat-completion request body. Optional fields are omitted rather than
/// sent as `null`.
#[derive(Serialize, Debug)]
pub struct ChatBody<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "is_false")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningToggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<&'a ResponseShape>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
pub(crate) struct RawChatResponse {
    pub(crate) choices: Option<Vec<RawChoice>>,
    #[serde(default)]
    pub(crate) usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawChoice {
    pub(crate) message: Option<RawResponseMessage>,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawResponseMessage {
    pub(crate) content: Option<String>,
    pub(crate) reasoning_details: Option<serde_json::Value>,
}

/// Token usage statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, deserialize_with = "null_as_zero")]
    pub prompt_tokens: u32,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub completion_tokens: u32,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub total_tokens: u32,
}

/// Token counts may be reported as `null`; treat them as zero.
fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.unwrap_or_default())
}

/// Normalized result of a one-shot completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    /// Assistant text. Always present on success.
    pub content: String,
    /// Opaque reasoning metadata, if the model returned any.
    pub reasoning_details: Option<serde_json::Value>,
    pub usage: Option<Usage>,
    /// Why generation stopped (`"stop"`, `"length"`, ...). `"unknown"` when
    /// the endpoint omitted it.
    pub finish_reason: String,
    /// The full decoded response body.
    pub raw: serde_json::Value,
}

impl CompletionResult {
    /// Whether generation was cut short by the output token limit.
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == FINISH_REASON_LENGTH
    }
}
