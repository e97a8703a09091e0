//! Convenience re-exports for common `llm-courier` types.
//!
//! ```ignore
//! use llm_courier::prelude::*;
//! ```
//!
//! Pulls in the client, its configuration and error type, the request and
//! message types, and the event handlers. Decoder internals and retry tuning
//! stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    AudioFormat, ClientConfig, CompletionRequest, CompletionResult, ContentPart, LlmClient,
    LlmError, Message, MessageContent, ResponseShape, Role, Usage, json_schema_for,
};

// ── Streaming ───────────────────────────────────────────────────────
pub use crate::api::streaming::TextDeltaStream;

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    ClientEvent, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};
