// SPDX-License-Identifier: MIT OR Apache-2.0

//! The billing buffer: enqueue with reserved-capacity awareness, flush
//! with bounded retries.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use tfg_store::{ReceiptStore, current_month_start};

use crate::reserved::{ReservedCapacity, select_tier};
use crate::sink::PaymentSink;

/// Result of one flush pass over the billing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Items delivered or dropped (removed from the queue).
    pub flushed: usize,
    /// Items left queued with a bumped retry counter.
    pub retries: usize,
    /// Whether a payment sink is configured at all.
    pub enabled: bool,
}

/// Buffers usage charges in the store and drains them to the sink.
///
/// Every operation here is best-effort from the exchange path's point of
/// view: enqueue failures are logged and swallowed, and flush runs on
/// its own schedule.
pub struct BillingBuffer {
    store: Arc<dyn ReceiptStore>,
    sink: Option<Arc<dyn PaymentSink>>,
    reserved: BTreeMap<String, ReservedCapacity>,
}

impl BillingBuffer {
    /// Create a buffer. `sink = None` disables delivery (and enqueue).
    #[must_use]
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        sink: Option<Arc<dyn PaymentSink>>,
        reserved: BTreeMap<String, ReservedCapacity>,
    ) -> Self {
        Self {
            store,
            sink,
            reserved,
        }
    }

    /// Whether a payment sink is configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Queue a Verified Exchange charge.
    ///
    /// Tenants with a reserved plan are charged only for overage above
    /// the monthly allowance, against the selected tier's item; others
    /// are charged per unit against `stripe_item`.
    pub async fn enqueue_vex(
        &self,
        api_key: &str,
        stripe_item: Option<&str>,
        units: u64,
        tenant: &str,
    ) {
        if !self.enabled() {
            return;
        }
        let Some(stripe_item) = stripe_item else {
            return;
        };

        let outcome = match self.reserved.get(tenant) {
            Some(plan) => {
                self.overage_charge(tenant, units, plan.vex_reserved, &plan.vex_overage_tiers, true)
                    .await
            }
            None => Some((stripe_item.to_string(), units)),
        };

        if let Some((item, charge_units)) = outcome {
            self.push(api_key, &item, charge_units).await;
        }
        tfg_metrics::BILLING_ENQUEUE_TOTAL
            .with_label_values(&["vex"])
            .inc();
    }

    /// Queue a Fallback Unit charge for consumed tokens.
    pub async fn enqueue_fu(
        &self,
        api_key: &str,
        stripe_item: Option<&str>,
        tokens: u64,
        tenant: &str,
    ) {
        if !self.enabled() || tokens == 0 {
            return;
        }
        let Some(stripe_item) = stripe_item else {
            return;
        };

        let outcome = match self.reserved.get(tenant) {
            Some(plan) => {
                self.overage_charge(tenant, tokens, plan.fu_reserved, &plan.fu_overage_tiers, false)
                    .await
            }
            None => Some((stripe_item.to_string(), tokens)),
        };

        if let Some((item, charge_units)) = outcome {
            self.push(api_key, &item, charge_units).await;
        }
        tfg_metrics::BILLING_ENQUEUE_TOTAL
            .with_label_values(&["fu"])
            .inc();
    }

    /// Evaluate a reserved plan: nothing to charge while inside the
    /// allowance, otherwise the full overage against the matching tier.
    async fn overage_charge(
        &self,
        tenant: &str,
        units: u64,
        reserved: u64,
        tiers: &[crate::OverageTier],
        is_vex: bool,
    ) -> Option<(String, u64)> {
        let usage = match self
            .store
            .monthly_usage(tenant, &current_month_start())
            .await
        {
            Ok(usage) => usage,
            Err(e) => {
                warn!(tenant, error = %e, "billing usage lookup failed; skipping charge");
                return None;
            }
        };
        let used = if is_vex { usage.vex_used } else { usage.fu_used };

        if used + units <= reserved {
            debug!(tenant, used, units, reserved, "within reserved capacity");
            return None;
        }
        let overage = used + units - reserved;
        let tier = select_tier(overage, tiers)?;
        Some((tier.stripe_item.clone(), overage))
    }

    async fn push(&self, api_key: &str, item: &str, units: u64) {
        let ts = Utc::now().timestamp();
        if let Err(e) = self.store.enqueue_billing(api_key, item, units, ts).await {
            // Billing must never fail the exchange; drop and log.
            warn!(api_key, item, units, error = %e, "billing enqueue failed");
        }
    }

    /// Drain one FIFO batch to the payment sink.
    ///
    /// Successful deliveries are deleted; failures bump the retry
    /// counter until `max_retries`, then the item is dropped (deleted)
    /// and counted as flushed.
    pub async fn flush(&self, batch_size: u32, max_retries: u32) -> FlushReport {
        let Some(sink) = &self.sink else {
            return FlushReport {
                flushed: 0,
                retries: 0,
                enabled: false,
            };
        };

        let items = match self.store.dequeue_billing_batch(batch_size).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "billing dequeue failed");
                return FlushReport {
                    flushed: 0,
                    retries: 0,
                    enabled: true,
                };
            }
        };

        let mut done_ids = Vec::new();
        let mut retry_ids = Vec::new();
        for item in &items {
            match sink.record_usage(&item.stripe_item, item.units, item.ts).await {
                Ok(()) => done_ids.push(item.id),
                Err(e) => {
                    if item.retries + 1 >= max_retries {
                        warn!(
                            id = item.id,
                            item = %item.stripe_item,
                            error = %e,
                            "billing item exceeded max retries; dropping"
                        );
                        done_ids.push(item.id);
                    } else {
                        retry_ids.push(item.id);
                    }
                }
            }
        }

        if let Err(e) = self.store.delete_billing_items(&done_ids).await {
            warn!(error = %e, "billing delete failed");
        }
        if let Err(e) = self.store.bump_billing_retries(&retry_ids).await {
            warn!(error = %e, "billing retry bump failed");
        }

        FlushReport {
            flushed: done_ids.len(),
            retries: retry_ids.len(),
            enabled: true,
        }
    }
}
