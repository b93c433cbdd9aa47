// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Transactional receipt store: chain append, idempotency, usage ledger, billing queue."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! One [`ReceiptStore`] trait, two substrates (SQLite and PostgreSQL)
//! with identical semantics. The only row-level contention point is the
//! per-trace head, updated with a compare-and-swap inside the same
//! transaction that inserts the receipt; a lost race surfaces as
//! [`StoreError::ChainConflict`] with no side effects.

mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::Value;
use tfg_receipt::Receipt;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The caller's `expected_prev` no longer matches the chain head.
    #[error("chain conflict: expected prev hash does not match the head")]
    ChainConflict,

    /// The receipt was appended without a computed hash.
    #[error("receipt must be hashed before it is appended")]
    UnhashedReceipt,

    /// The underlying database failed.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Stored JSON could not be (de)serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// The per-trace chain head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    /// Trace identifier.
    pub trace_id: String,
    /// Hop of the latest receipt.
    pub last_hop: u64,
    /// Hash of the latest receipt.
    pub last_receipt_hash: String,
}

/// One usage-ledger row (append-only).
#[derive(Debug, Clone)]
pub struct UsageRow {
    /// API key the exchange authenticated with.
    pub api_key: String,
    /// Tenant name.
    pub tenant: String,
    /// Trace the exchange belongs to.
    pub trace_id: String,
    /// Hop that was appended.
    pub hop: u64,
    /// Whether the exchange completed verification.
    pub verified: bool,
    /// Verified Exchange units consumed (normally 1).
    pub vex_units: u64,
    /// Fallback tokens consumed.
    pub fu_tokens: u64,
    /// Exchange timestamp (ISO-8601).
    pub ts: String,
}

/// Month-to-date usage rollup for a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonthlyUsage {
    /// Verified Exchange units this month.
    pub vex_used: u64,
    /// Fallback tokens this month.
    pub fu_used: u64,
}

/// One queued billing charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingItem {
    /// Queue id (FIFO order).
    pub id: i64,
    /// API key the charge belongs to.
    pub api_key: String,
    /// Payment-sink subscription item.
    pub stripe_item: String,
    /// Units to report.
    pub units: u64,
    /// Unix seconds of the usage event.
    pub ts: i64,
    /// Delivery attempts so far.
    pub retries: u32,
}

/// First instant of the current UTC month, in receipt timestamp format.
///
/// Usage-ledger timestamps are ISO-8601 strings, so a lexicographic
/// `ts >= month_start` comparison selects the month-to-date window on
/// both substrates.
#[must_use]
pub fn current_month_start() -> String {
    let now = Utc::now();
    format!("{:04}-{:02}-01T00:00:00Z", now.year(), now.month())
}

/// The storage capability set shared by both substrates.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Stable backend label (`"sqlite"` or `"postgres"`) for `/healthz`.
    fn backend_name(&self) -> &'static str;

    /// Read the chain head for a trace, if any receipts exist.
    async fn get_head(&self, trace_id: &str) -> Result<Option<Head>, StoreError>;

    /// Append a hashed receipt, requiring `expected_prev` to match the
    /// current head (`None` for a fresh trace). Returns the hop written.
    ///
    /// The head compare-and-swap and the receipt insert commit together
    /// or not at all.
    async fn append_receipt(
        &self,
        receipt: &Receipt,
        expected_prev: Option<&str>,
    ) -> Result<u64, StoreError>;

    /// Read a trace's receipts ordered by hop.
    async fn get_chain(&self, trace_id: &str) -> Result<Vec<Receipt>, StoreError>;

    /// Read-through lookup of a cached idempotent response.
    async fn get_idempotent(
        &self,
        api_key: &str,
        idem_key: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Write-through cache of a successful exchange response.
    async fn cache_idempotent(
        &self,
        api_key: &str,
        idem_key: &str,
        response: &Value,
    ) -> Result<(), StoreError>;

    /// Drop idempotency entries created before `older_than` (ISO-8601).
    /// Returns the number of rows removed.
    async fn prune_idempotency(&self, older_than: &str) -> Result<u64, StoreError>;

    /// Append one usage-ledger row.
    async fn record_usage(&self, row: &UsageRow) -> Result<(), StoreError>;

    /// Month-to-date usage for a tenant, from `month_start` (ISO-8601).
    async fn monthly_usage(
        &self,
        tenant: &str,
        month_start: &str,
    ) -> Result<MonthlyUsage, StoreError>;

    /// Enqueue a billing charge.
    async fn enqueue_billing(
        &self,
        api_key: &str,
        stripe_item: &str,
        units: u64,
        ts_unix: i64,
    ) -> Result<(), StoreError>;

    /// Dequeue up to `limit` charges in FIFO order (without removing).
    async fn dequeue_billing_batch(&self, limit: u32) -> Result<Vec<BillingItem>, StoreError>;

    /// Delete delivered (or dropped) billing items.
    async fn delete_billing_items(&self, ids: &[i64]) -> Result<(), StoreError>;

    /// Increment the retry counter on failed billing items.
    async fn bump_billing_retries(&self, ids: &[i64]) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests;
