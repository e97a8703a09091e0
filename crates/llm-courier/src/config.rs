//! Client configuration.
//!
//! [`ClientConfig`] is supplied once, at startup, and is read-only for the
//! lifetime of an [`LlmClient`](crate::LlmClient). It carries the endpoint,
//! credential, optional model override, and the diagnostics flag.

use std::time::Duration;

use crate::error::{LlmError, Result};

/// Environment variable holding the bearer credential.
pub const ENV_API_KEY: &str = "LLM_API_KEY";
/// Environment variable holding the full chat-completions endpoint URL.
pub const ENV_BASE_URL: &str = "LLM_BASE_URL";
/// Environment variable holding an optional model override.
pub const ENV_MODEL: &str = "LLM_MODEL";
/// Environment variable enabling request/response diagnostics.
pub const ENV_DEBUG: &str = "LLM_DEBUG";

/// Default HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Process-wide client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bearer credential sent as `Authorization: Bearer <api_key>`.
    pub api_key: String,
    /// Chat-completions endpoint; requests are POSTed here verbatim.
    pub base_url: String,
    /// Locally configured model. When set, it takes precedence over the
    /// model named in each request.
    pub model: Option<String>,
    /// Emit request/response summaries at `info` level.
    pub debug: bool,
    /// HTTP timeout. Bounds connecting and each wait for body data; one-shot
    /// attempts must also finish within it. Streams have no overall
    /// deadline. Default: 120 seconds.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            model: None,
            debug: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Create a config with the given credential and endpoint.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Read configuration from `LLM_API_KEY`, `LLM_BASE_URL`, `LLM_MODEL`
    /// and `LLM_DEBUG`.
    ///
    /// Missing variables leave the corresponding field empty; the client
    /// reports them as [`LlmError::Configuration`] on first use.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment, config file,
    /// test fixture).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug = lookup(ENV_DEBUG)
            .map(|v| matches!(v.trim(), "true" | "1"))
            .unwrap_or(false);
        Self {
            api_key: lookup(ENV_API_KEY).unwrap_or_default(),
            base_url: lookup(ENV_BASE_URL).unwrap_or_default(),
            model: lookup(ENV_MODEL).filter(|m| !m.trim().is_empty()),
            debug,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Enable or disable request/response diagnostics.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the HTTP timeout (see [`ClientConfig::timeout`]).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail fast when the endpoint or credential is absent.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::Configuration(format!(
                "API key is not configured (set {ENV_API_KEY})"
            )));
        }
        if self.base_url.trim().is_empty() {
            return Err(LlmError::Configuration(format!(
                "endpoint URL is not configured (set {ENV_BASE_URL})"
            )));
        }
        Ok(())
    }

    /// The model to send: the configured override if present, otherwise the
    /// per-request model.
    pub fn resolve_model<'a>(&'a self, requested: &'a str) -> &'a str {
        match self.model.as_deref() {
            Some(m) if !m.trim().is_empty() => m,
            _ => requested,
        }
    }
}
