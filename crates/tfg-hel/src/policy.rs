// SPDX-License-Identifier: MIT OR Apache-2.0

//! The HEL policy decision.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::resolver::{HelReason, resolve_public};

/// A policy decision, also the snapshot stored inside receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Policy engine tag, fixed `"HEL"`.
    pub engine: String,
    /// Whether the exchange may proceed.
    pub allowed: bool,
    /// Reason code (`"ok"`, `"no_forward"`, or a `HEL_*` denial).
    pub reason: String,
}

impl Decision {
    fn allow(reason: HelReason) -> Self {
        Self {
            engine: "HEL".to_string(),
            allowed: true,
            reason: reason.as_str().to_string(),
        }
    }

    fn deny(reason: HelReason) -> Self {
        Self {
            engine: "HEL".to_string(),
            allowed: false,
            reason: reason.as_str().to_string(),
        }
    }

    /// The decision as a JSON snapshot for receipts.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "engine": self.engine,
            "allowed": self.allowed,
            "reason": self.reason,
        })
    }
}

/// Evaluate the egress policy for an optional forward URL.
///
/// Order of checks: no URL allows outright; the scheme must be `https`;
/// the case-folded host must appear on the tenant or global allowlist;
/// every resolved address must be public.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() {
/// let decision = tfg_hel::evaluate(
///     &["api.example.com".to_string()],
///     &[],
///     Some("https://api.example.com/hook"),
/// )
/// .await;
/// assert!(decision.allowed);
/// # }
/// ```
pub async fn evaluate(
    tenant_allowlist: &[String],
    global_allowlist: &[String],
    forward_url: Option<&str>,
) -> Decision {
    let Some(raw_url) = forward_url else {
        return Decision::allow(HelReason::NoForward);
    };

    let Ok(url) = Url::parse(raw_url) else {
        return Decision::deny(HelReason::HostNotAllowed);
    };

    if url.scheme() != "https" {
        return Decision::deny(HelReason::SchemeNotHttps);
    }

    // Url::host_str is already lowercased and IDNA-mapped to A-labels.
    let Some(host) = url.host_str() else {
        return Decision::deny(HelReason::HostNotAllowed);
    };

    let allowed = tenant_allowlist
        .iter()
        .chain(global_allowlist.iter())
        .any(|entry| entry.to_lowercase() == host);
    if !allowed {
        return Decision::deny(HelReason::HostNotAllowed);
    }

    match resolve_public(host).await {
        Ok(_) => Decision::allow(HelReason::Ok),
        Err(reason) => Decision::deny(reason),
    }
}
