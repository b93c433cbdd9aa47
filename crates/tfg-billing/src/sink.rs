// SPDX-License-Identifier: MIT OR Apache-2.0

//! The payment-events sink seam.

use async_trait::async_trait;

/// Errors from delivering a usage record to the sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The request could not be sent.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-success status.
    #[error("payment sink returned {0}")]
    Status(u16),
}

/// Delivery of metered usage to the external payment system.
#[async_trait]
pub trait PaymentSink: Send + Sync {
    /// Report `units` against a subscription item as an increment at
    /// `ts_unix`.
    async fn record_usage(&self, item: &str, units: u64, ts_unix: i64) -> Result<(), SinkError>;
}

/// Stripe usage-record sink.
pub struct StripeSink {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl StripeSink {
    /// Create a sink against the production Stripe API.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.stripe.com".to_string(),
        }
    }

    /// Override the base URL (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PaymentSink for StripeSink {
    async fn record_usage(&self, item: &str, units: u64, ts_unix: i64) -> Result<(), SinkError> {
        let url = format!("{}/v1/subscription_items/{item}/usage_records", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&[
                ("quantity", units.to_string()),
                ("timestamp", ts_unix.to_string()),
                ("action", "increment".to_string()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SinkError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_increment_usage_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/subscription_items/si_test/usage_records"))
            .and(body_string_contains("action=increment"))
            .and(body_string_contains("quantity=42"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = StripeSink::new("sk_test").with_base_url(server.uri());
        sink.record_usage("si_test", 42, 1_700_000_000).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402))
            .mount(&server)
            .await;

        let sink = StripeSink::new("sk_test").with_base_url(server.uri());
        let err = sink.record_usage("si_test", 1, 0).await.unwrap_err();
        assert!(matches!(err, SinkError::Status(402)));
    }
}
