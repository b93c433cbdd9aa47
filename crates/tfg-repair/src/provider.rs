// SPDX-License-Identifier: MIT OR Apache-2.0

//! The LLM fallback provider seam.
//!
//! The gateway talks to the repair model through [`FallbackProvider`]
//! only; the default [`NullProvider`] never repairs anything, and
//! [`OpenAiProvider`] is the one concrete remote implementation. Token
//! accounting (`fu_tokens`) comes from the provider's own usage report.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You repair JSON ONLY.\n\
- Output ONLY a JSON object that validates against the provided JSON Schema.\n\
- Do not invent fields or values. If something is missing, set it to null or omit it.\n\
- No explanations. No prose. Output must be valid JSON.\n";

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const MAX_COMPLETION_TOKENS: u32 = 800;

/// Result of one fallback repair attempt, with token usage for metering.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    /// The repaired JSON text, when the provider succeeded.
    pub repaired_text: Option<String>,
    /// Fallback Units (provider-reported tokens) consumed.
    pub fu_tokens: u64,
    /// Provider error detail, truncated for logs and responses.
    pub error: Option<String>,
}

impl RepairOutcome {
    /// A successful repair carrying the provider's token accounting.
    #[must_use]
    pub fn repaired(text: impl Into<String>, fu_tokens: u64) -> Self {
        Self {
            repaired_text: Some(text.into()),
            fu_tokens,
            error: None,
        }
    }

    /// A failed attempt; no tokens are billed beyond what the provider
    /// reported.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        let mut error: String = error.into();
        truncate_at_boundary(&mut error, 200);
        Self {
            repaired_text: None,
            fu_tokens: 0,
            error: Some(error),
        }
    }

    /// Whether the provider produced repaired text.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.repaired_text.is_some()
    }
}

/// Capability set of an LLM repair provider.
#[async_trait]
pub trait FallbackProvider: Send + Sync {
    /// Attempt to repair `raw` into JSON conforming to `schema_hint`.
    async fn repair(&self, raw: &str, schema_hint: &Value) -> RepairOutcome;
}

/// The default provider: never repairs anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvider;

#[async_trait]
impl FallbackProvider for NullProvider {
    async fn repair(&self, _raw: &str, _schema_hint: &Value) -> RepairOutcome {
        RepairOutcome::failed("fallback provider not configured")
    }
}

/// Chat-completions-backed repair provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiProvider {
    /// Create a provider with the default endpoint and model.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Override the chat-completions endpoint (used by tests).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl FallbackProvider for OpenAiProvider {
    async fn repair(&self, raw: &str, schema_hint: &Value) -> RepairOutcome {
        let schema_str = schema_hint.to_string();
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": format!("Schema:\n{schema_str}\n---\nBroken JSON:\n{raw}")},
            ],
        });

        let resp = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "fallback provider request failed");
                return RepairOutcome::failed(e.to_string());
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            return RepairOutcome::failed(format!("provider returned {status}"));
        }

        let payload: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return RepairOutcome::failed(format!("provider response unreadable: {e}")),
        };

        let fu_tokens = payload["usage"]["total_tokens"].as_u64().unwrap_or(0);
        let Some(content) = payload["choices"][0]["message"]["content"].as_str() else {
            return RepairOutcome::failed("provider response missing content");
        };

        let text = strip_code_fences(content.trim());
        debug!(fu_tokens, "fallback provider produced a candidate repair");
        RepairOutcome::repaired(text, fu_tokens)
    }
}

/// Shorten a string to at most `max` bytes without splitting a
/// character.
fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    s.truncate(idx);
}

/// Pull the JSON body out of a fenced completion like
/// ` ```json\n{...}\n``` `.
fn strip_code_fences(text: &str) -> String {
    if !text.starts_with("```") {
        return text.to_string();
    }
    let parts: Vec<&str> = text.split("```").collect();
    if parts.len() < 2 {
        return text.to_string();
    }
    let mut inner = parts[1].trim();
    if let Some(rest) = inner.strip_prefix("json") {
        inner = rest.trim();
    }
    inner.to_string()
}
