// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fallback metering: token estimation and monthly quota gating.

use std::fmt;

use tfg_config::TenantConfig;

/// Estimate the token cost of a repair before calling the provider.
///
/// Roughly four characters per token for English text, never below one.
///
/// # Examples
///
/// ```
/// assert_eq!(tfg_repair::estimate_tokens(""), 1);
/// assert_eq!(tfg_repair::estimate_tokens("abcdefgh"), 2);
/// ```
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.len() as u64) / 4).max(1)
}

/// Why a fallback repair was not allowed to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDenial {
    /// The tenant has fallback repair disabled.
    FallbackDisabled,
    /// The estimated spend would exceed the tenant's monthly allowance.
    QuotaExceeded {
        /// Tokens already consumed this month.
        used: u64,
        /// Monthly limit configured for the tenant.
        limit: u64,
        /// Estimated tokens for this attempt.
        estimated: u64,
    },
}

impl QuotaDenial {
    /// Stable reason code for metrics and response bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::FallbackDisabled => "FALLBACK_DISABLED",
            Self::QuotaExceeded { .. } => "FU_QUOTA_EXCEEDED",
        }
    }
}

impl fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FallbackDisabled => write!(f, "FALLBACK_DISABLED"),
            Self::QuotaExceeded {
                used,
                limit,
                estimated,
            } => write!(f, "FU_QUOTA_EXCEEDED: {}/{limit}", used + estimated),
        }
    }
}

impl std::error::Error for QuotaDenial {}

/// Gate a fallback attempt against the tenant's configuration and
/// current-month usage.
///
/// A tenant without a configured `fu_monthly_limit` is unmetered (but
/// still requires `fallback_enabled`).
///
/// # Errors
///
/// Returns the applicable [`QuotaDenial`].
pub fn check_quota(
    tenant: &TenantConfig,
    used_this_month: u64,
    estimated: u64,
) -> Result<(), QuotaDenial> {
    if !tenant.fallback_enabled {
        return Err(QuotaDenial::FallbackDisabled);
    }
    let Some(limit) = tenant.fu_monthly_limit else {
        return Ok(());
    };
    if used_this_month + estimated > limit {
        return Err(QuotaDenial::QuotaExceeded {
            used: used_this_month,
            limit,
            estimated,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(enabled: bool, limit: Option<u64>) -> TenantConfig {
        TenantConfig {
            tenant: "acme".to_string(),
            allowlist: vec![],
            fallback_enabled: enabled,
            fu_monthly_limit: limit,
            stripe_item_vex: None,
            stripe_item_fu: None,
        }
    }

    #[test]
    fn estimate_floors_at_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("ab"), 1);
    }

    #[test]
    fn estimate_scales_with_length() {
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn disabled_tenant_denied() {
        let err = check_quota(&tenant(false, None), 0, 10).unwrap_err();
        assert_eq!(err.code(), "FALLBACK_DISABLED");
    }

    #[test]
    fn unmetered_tenant_allowed() {
        check_quota(&tenant(true, None), 1_000_000, 10).unwrap();
    }

    #[test]
    fn within_quota_allowed() {
        check_quota(&tenant(true, Some(1000)), 900, 100).unwrap();
    }

    #[test]
    fn over_quota_denied() {
        let err = check_quota(&tenant(true, Some(1000)), 950, 100).unwrap_err();
        assert_eq!(err.code(), "FU_QUOTA_EXCEEDED");
        assert!(err.to_string().contains("1050/1000"));
    }
}
