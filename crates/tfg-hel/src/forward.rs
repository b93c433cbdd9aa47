// SPDX-License-Identifier: MIT OR Apache-2.0

//! IP-pinned forwarding of normalized payloads.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::resolver::resolve_public;

/// Hard cap on downstream response bodies.
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "TrustFabric/0.1";

/// What happened to a forward attempt.
///
/// Transport failures are encapsulated here as `status_code = 599`; they
/// never fail the exchange itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardOutcome {
    /// Downstream status, or 403/413/599 for local failures.
    pub status_code: u16,
    /// The original hostname (never the pinned IP).
    pub host: String,
    /// Bytes of response body read (capped).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<usize>,
    /// The public address the connection was pinned to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_ip: Option<IpAddr>,
    /// Error detail for non-2xx local outcomes, capped at 200 chars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ForwardOutcome {
    fn failure(status_code: u16, host: &str, error: impl Into<String>) -> Self {
        let mut error: String = error.into();
        truncate_at_boundary(&mut error, 200);
        Self {
            status_code,
            host: host.to_string(),
            response_size: None,
            pinned_ip: None,
            error: Some(error),
        }
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

/// POST a normalized payload to `forward_url`, pinned to one resolved
/// public address.
///
/// The resolver runs again here (after the policy check) so the address
/// the socket dials is the address that was classified; SNI, certificate
/// validation, and the Host header all use the original hostname. The
/// response body is read under a 1 MiB cap and redirects are never
/// followed.
pub async fn forward(forward_url: &str, payload: &Value) -> ForwardOutcome {
    let Ok(url) = Url::parse(forward_url) else {
        return ForwardOutcome::failure(599, "", "invalid forward URL");
    };
    let Some(host) = url.host_str().map(str::to_string) else {
        return ForwardOutcome::failure(599, "", "forward URL has no host");
    };
    if url.scheme() != "https" {
        return ForwardOutcome::failure(599, &host, "forward URL must be https");
    }

    let ips = match resolve_public(&host).await {
        Ok(ips) => ips,
        Err(reason) => {
            warn!(host, reason = reason.as_str(), "forward blocked at resolution");
            return ForwardOutcome::failure(
                403,
                &host,
                format!("IP validation failed: {reason}"),
            );
        }
    };
    // First public address; resolution order is the balancer's choice.
    let pinned_ip = ips[0];
    let port = url.port().unwrap_or(443);

    let client = match reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .resolve(&host, SocketAddr::new(pinned_ip, port))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
    {
        Ok(client) => client,
        Err(e) => return ForwardOutcome::failure(599, &host, e.to_string()),
    };

    let resp = match client.post(url.as_str()).json(payload).send().await {
        Ok(resp) => resp,
        Err(e) => return ForwardOutcome::failure(599, &host, e.to_string()),
    };

    let status_code = resp.status().as_u16();

    if let Some(len) = resp.content_length()
        && len as usize > MAX_RESPONSE_BYTES
    {
        return ForwardOutcome::failure(413, &host, "response too large");
    }

    // Enforce the cap while streaming too; Content-Length can lie.
    let mut body_len = 0usize;
    let mut resp = resp;
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                body_len += chunk.len();
                if body_len > MAX_RESPONSE_BYTES {
                    return ForwardOutcome::failure(413, &host, "response too large");
                }
            }
            Ok(None) => break,
            Err(e) => return ForwardOutcome::failure(599, &host, e.to_string()),
        }
    }

    debug!(host, status_code, body_len, %pinned_ip, "forward completed");
    ForwardOutcome {
        status_code,
        host,
        response_size: Some(body_len),
        pinned_ip: Some(pinned_ip),
        error: None,
    }
}
