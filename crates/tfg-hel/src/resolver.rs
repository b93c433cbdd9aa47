// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host resolution with per-address classification.

use std::net::IpAddr;

use tokio::net::lookup_host;
use tracing::debug;

/// Reason codes produced by the resolver and the policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelReason {
    /// The forward target is acceptable.
    Ok,
    /// No forward URL was supplied; nothing to police.
    NoForward,
    /// The forward URL scheme is not `https`.
    SchemeNotHttps,
    /// The host is on neither the tenant nor the global allowlist.
    HostNotAllowed,
    /// The host resolved to a loopback address.
    ResolvedLoopback,
    /// The host resolved to a private (RFC 1918 / ULA) address.
    ResolvedPrivate,
    /// The host resolved to a link-local address.
    ResolvedLinklocal,
    /// The host resolved to an empty address set.
    NoResolution,
    /// Resolution itself failed.
    ResolutionFailed,
}

impl HelReason {
    /// Stable reason code for metrics, receipts, and response bodies.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoForward => "no_forward",
            Self::SchemeNotHttps => "HEL_SCHEME_NOT_HTTPS",
            Self::HostNotAllowed => "HEL_HOST_NOT_ALLOWED",
            Self::ResolvedLoopback => "HEL_RESOLVED_LOOPBACK",
            Self::ResolvedPrivate => "HEL_RESOLVED_PRIVATE",
            Self::ResolvedLinklocal => "HEL_RESOLVED_LINKLOCAL",
            Self::NoResolution => "HEL_NO_RESOLUTION",
            Self::ResolutionFailed => "HEL_RESOLUTION_FAILED",
        }
    }

    /// Whether this reason allows the exchange to proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Ok | Self::NoForward)
    }
}

impl std::fmt::Display for HelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one address; `None` means public.
#[must_use]
pub fn classify_ip(ip: IpAddr) -> Option<HelReason> {
    if ip.is_loopback() {
        return Some(HelReason::ResolvedLoopback);
    }
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_private() {
                Some(HelReason::ResolvedPrivate)
            } else if v4.is_link_local() {
                Some(HelReason::ResolvedLinklocal)
            } else {
                None
            }
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            // fc00::/7 unique-local is the v6 analogue of RFC 1918.
            if (segments[0] & 0xfe00) == 0xfc00 {
                Some(HelReason::ResolvedPrivate)
            } else if (segments[0] & 0xffc0) == 0xfe80 {
                Some(HelReason::ResolvedLinklocal)
            } else if let Some(v4) = v6.to_ipv4_mapped() {
                classify_ip(IpAddr::V4(v4))
            } else {
                None
            }
        }
    }
}

/// Resolve `host` and require every address to be public.
///
/// The host is expected in A-label (punycode) form, which URL parsing
/// already guarantees. Resolution happens through the system resolver on
/// every call; answers are never cached here so DNS TTLs hold.
///
/// # Errors
///
/// Returns the [`HelReason`] describing the first non-public address, an
/// empty answer, or a resolution failure.
pub async fn resolve_public(host: &str) -> Result<Vec<IpAddr>, HelReason> {
    let addrs = lookup_host((host, 443_u16))
        .await
        .map_err(|_| HelReason::ResolutionFailed)?;

    let mut ips = Vec::new();
    for addr in addrs {
        let ip = addr.ip();
        if let Some(reason) = classify_ip(ip) {
            debug!(host, %ip, reason = reason.as_str(), "rejecting non-public address");
            return Err(reason);
        }
        ips.push(ip);
    }

    if ips.is_empty() {
        return Err(HelReason::NoResolution);
    }
    Ok(ips)
}
