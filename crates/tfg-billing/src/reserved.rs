// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reserved-capacity plans and overage tiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::BillingError;

/// One overage pricing tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverageTier {
    /// Upper bound (inclusive) of overage units this tier covers.
    pub threshold: u64,
    /// Unit price, informational for reports.
    pub price_per_unit: f64,
    /// Payment-sink item charges in this tier are reported against.
    pub stripe_item: String,
}

/// A tenant's reserved monthly capacity and overage schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservedCapacity {
    /// VEx units included per month.
    #[serde(default)]
    pub vex_reserved: u64,

    /// FU tokens included per month.
    #[serde(default)]
    pub fu_reserved: u64,

    /// Ordered overage tiers for VEx units.
    #[serde(default)]
    pub vex_overage_tiers: Vec<OverageTier>,

    /// Ordered overage tiers for FU tokens.
    #[serde(default)]
    pub fu_overage_tiers: Vec<OverageTier>,

    /// Sink item for the reserved VEx commitment itself.
    #[serde(default)]
    pub vex_reserved_item: Option<String>,

    /// Sink item for the reserved FU commitment itself.
    #[serde(default)]
    pub fu_reserved_item: Option<String>,
}

/// Load per-tenant reserved-capacity plans from a JSON file and publish
/// the capacity gauges.
///
/// A missing path yields an empty map (reserved capacity is optional).
///
/// # Errors
///
/// Returns [`BillingError`] when the file exists but cannot be read or
/// parsed.
pub fn load_reserved_configs(
    path: &str,
) -> Result<BTreeMap<String, ReservedCapacity>, BillingError> {
    if !Path::new(path).exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| BillingError::Io {
        path: path.to_string(),
        source,
    })?;
    let configs: BTreeMap<String, ReservedCapacity> =
        serde_json::from_str(&raw).map_err(|source| BillingError::Parse {
            path: path.to_string(),
            source,
        })?;

    for (tenant, config) in &configs {
        tfg_metrics::update_reserved_capacity(tenant, config.vex_reserved, config.fu_reserved);
    }
    Ok(configs)
}

/// Pick the tier for a given overage: the first tier whose `threshold`
/// covers it, else the last tier. `None` only when no tiers exist.
#[must_use]
pub fn select_tier(overage: u64, tiers: &[OverageTier]) -> Option<&OverageTier> {
    tiers
        .iter()
        .find(|tier| overage <= tier.threshold)
        .or_else(|| tiers.last())
}
