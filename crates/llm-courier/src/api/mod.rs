//! Transport and protocol layer: retry, streaming, extraction, diagnostics.
//!
//! These modules handle everything between an [`LlmClient`](crate::LlmClient)
//! call and the wire:
//!
//! - [`retry`]: bounded retries with exponential backoff and jitter for
//!   transport failures and transient statuses (429, 5xx). Never retries
//!   400/401.
//! - [`streaming`]: incremental `data:` line decoder and the pull-based
//!   [`TextDeltaStream`](streaming::TextDeltaStream).
//! - [`extract`]: code-fence stripping and JSON recovery for structured
//!   output.
//! - [`diagnostics`]: request IDs and debug-gated request/response summaries.

pub mod diagnostics;
pub mod extract;
pub mod retry;
pub mod streaming;

// Re-export commonly used items at the module level.
pub use extract::{recover_json, recover_json_value, strip_code_fences};
pub use retry::RetryPolicy;
pub use streaming::{SseDecoder, StreamEvent, TextDeltaStream};
