// SPDX-License-Identifier: MIT OR Apache-2.0

//! The gateway's error-to-HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Reason codes surfaced in response bodies and the denial counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonCode {
    /// No API key header was supplied.
    MissingKey,
    /// The API key is not recognized.
    InvalidKey,
    /// No idempotency key header was supplied.
    MissingIdem,
    /// The inbound payload failed the source schema.
    InputSchemaInvalid,
    /// The normalized payload failed the target schema.
    OutputSchemaInvalid,
    /// The embedded arguments could not be parsed or repaired.
    ArgumentsUnparseable,
    /// A semantic invariant denied the repaired payload.
    SemanticViolation(&'static str),
    /// Fallback denial (`FALLBACK_DISABLED` / `FU_QUOTA_EXCEEDED`).
    Quota(&'static str),
    /// The egress policy denied the forward target.
    Policy(String),
    /// The chain head moved under the append.
    ChainConflict,
    /// The requested resource does not exist.
    NotFound,
    /// Anything else.
    Internal,
}

impl ReasonCode {
    /// Render the stable code string.
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::MissingKey => "MISSING_KEY".to_string(),
            Self::InvalidKey => "INVALID_KEY".to_string(),
            Self::MissingIdem => "MISSING_IDEM".to_string(),
            Self::InputSchemaInvalid => "INPUT_SCHEMA_INVALID".to_string(),
            Self::OutputSchemaInvalid => "OUTPUT_SCHEMA_INVALID".to_string(),
            Self::ArgumentsUnparseable => "ARGUMENTS_UNPARSEABLE".to_string(),
            Self::SemanticViolation(rule) => format!("SEMANTIC_VIOLATION:{rule}"),
            Self::Quota(code) => (*code).to_string(),
            Self::Policy(reason) => reason.clone(),
            Self::ChainConflict => "CHAIN_CONFLICT".to_string(),
            Self::NotFound => "NOT_FOUND".to_string(),
            Self::Internal => "INTERNAL".to_string(),
        }
    }
}

/// A terminal pipeline error, carrying its HTTP status and reason code.
#[derive(Debug)]
pub struct GatewayError {
    /// HTTP status to answer with.
    pub status: StatusCode,
    /// Stable reason code.
    pub reason: ReasonCode,
    /// Human-readable detail; truncated to 200 chars at the boundary.
    pub message: String,
}

impl GatewayError {
    /// Build an error and count it in the denial metric.
    #[must_use]
    pub fn new(status: StatusCode, reason: ReasonCode, message: impl Into<String>) -> Self {
        let err = Self {
            status,
            reason,
            message: message.into(),
        };
        // Lookups that miss are not denied exchanges.
        if err.status.is_client_error() && err.reason != ReasonCode::NotFound {
            tfg_metrics::DENIED_TOTAL
                .with_label_values(&[err.reason.as_string().as_str()])
                .inc();
        }
        err
    }

    /// 500 wrapper for unexpected failures; detail goes to logs only.
    #[must_use]
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        tracing::error!(error = %detail, "internal gateway error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            reason: ReasonCode::Internal,
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Client-facing messages never exceed 200 chars and never carry
        // stack traces.
        let mut message = self.message;
        if message.len() > 200 {
            let mut idx = 200;
            while !message.is_char_boundary(idx) {
                idx -= 1;
            }
            message.truncate(idx);
        }
        let body = Json(json!({
            "error": message,
            "reason": self.reason.as_string(),
        }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_render() {
        assert_eq!(ReasonCode::MissingKey.as_string(), "MISSING_KEY");
        assert_eq!(
            ReasonCode::SemanticViolation("amount_precision").as_string(),
            "SEMANTIC_VIOLATION:amount_precision"
        );
        assert_eq!(
            ReasonCode::Policy("HEL_RESOLVED_PRIVATE".to_string()).as_string(),
            "HEL_RESOLVED_PRIVATE"
        );
        assert_eq!(ReasonCode::Quota("FU_QUOTA_EXCEEDED").as_string(), "FU_QUOTA_EXCEEDED");
    }

    #[test]
    fn messages_truncate_in_response() {
        let err = GatewayError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            reason: ReasonCode::ArgumentsUnparseable,
            message: "x".repeat(500),
        };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
