// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite substrate.

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use tfg_receipt::Receipt;

use crate::{BillingItem, Head, MonthlyUsage, ReceiptStore, StoreError, UsageRow};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS receipts(
  trace_id TEXT NOT NULL,
  hop INTEGER NOT NULL,
  ts TEXT NOT NULL,
  cid TEXT NOT NULL,
  canon TEXT NOT NULL,
  algo TEXT NOT NULL,
  prev_receipt_hash TEXT,
  policy_json TEXT NOT NULL,
  tenant TEXT NOT NULL,
  receipt_hash TEXT NOT NULL,
  fallback_used INTEGER,
  fu_tokens INTEGER,
  semantic_violations TEXT,
  PRIMARY KEY(trace_id, hop)
);
CREATE TABLE IF NOT EXISTS heads(
  trace_id TEXT PRIMARY KEY,
  last_hop INTEGER NOT NULL,
  last_receipt_hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS idempotency(
  api_key TEXT NOT NULL,
  key TEXT NOT NULL,
  response_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  PRIMARY KEY(api_key, key)
);
CREATE TABLE IF NOT EXISTS usage_ledger(
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  api_key TEXT NOT NULL,
  tenant TEXT NOT NULL,
  trace_id TEXT NOT NULL,
  hop INTEGER NOT NULL,
  verified INTEGER NOT NULL,
  vex_units INTEGER NOT NULL,
  fu_tokens INTEGER NOT NULL,
  ts TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS billing_queue(
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  api_key TEXT NOT NULL,
  stripe_item TEXT NOT NULL,
  units INTEGER NOT NULL,
  ts INTEGER NOT NULL,
  retries INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_usage_ledger_tenant_ts ON usage_ledger(tenant, ts);
CREATE INDEX IF NOT EXISTS idx_idempotency_created_at ON idempotency(created_at);
"#;

/// SQLite-backed [`ReceiptStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on connection or migration
    /// failure.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::raw_sql(INIT_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// An in-memory store for tests.
    ///
    /// A single pooled connection keeps the shared in-memory database
    /// alive for the store's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::raw_sql(INIT_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn row_to_receipt(row: &SqliteRow) -> Result<Receipt, StoreError> {
    let policy_json: String = row.try_get("policy_json")?;
    let semantic_violations: Option<String> = row.try_get("semantic_violations")?;
    Ok(Receipt {
        trace_id: row.try_get("trace_id")?,
        hop: row.try_get::<i64, _>("hop")? as u64,
        ts: row.try_get("ts")?,
        tenant: row.try_get("tenant")?,
        cid: row.try_get("cid")?,
        canon: row.try_get("canon")?,
        algo: row.try_get("algo")?,
        prev_receipt_hash: row.try_get("prev_receipt_hash")?,
        policy: serde_json::from_str(&policy_json)?,
        receipt_hash: row.try_get("receipt_hash")?,
        fallback_used: row.try_get("fallback_used")?,
        fu_tokens: row.try_get::<Option<i64>, _>("fu_tokens")?.map(|v| v as u64),
        semantic_violations: semantic_violations
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
    })
}

#[async_trait]
impl ReceiptStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn get_head(&self, trace_id: &str) -> Result<Option<Head>, StoreError> {
        let row = sqlx::query(
            "SELECT trace_id, last_hop, last_receipt_hash FROM heads WHERE trace_id = ?1",
        )
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|row| -> Result<Head, StoreError> {
                Ok(Head {
                    trace_id: row.try_get("trace_id")?,
                    last_hop: row.try_get::<i64, _>("last_hop")? as u64,
                    last_receipt_hash: row.try_get("last_receipt_hash")?,
                })
            })
            .transpose()?)
    }

    async fn append_receipt(
        &self,
        receipt: &Receipt,
        expected_prev: Option<&str>,
    ) -> Result<u64, StoreError> {
        let hash = receipt
            .receipt_hash
            .as_deref()
            .ok_or(StoreError::UnhashedReceipt)?;

        let mut tx = self.pool.begin().await?;

        match expected_prev {
            None => {
                if receipt.hop != 1 {
                    return Err(StoreError::ChainConflict);
                }
                let res = sqlx::query(
                    "INSERT INTO heads(trace_id, last_hop, last_receipt_hash) \
                     VALUES(?1, ?2, ?3) ON CONFLICT(trace_id) DO NOTHING",
                )
                .bind(&receipt.trace_id)
                .bind(receipt.hop as i64)
                .bind(hash)
                .execute(&mut *tx)
                .await?;
                if res.rows_affected() == 0 {
                    return Err(StoreError::ChainConflict);
                }
            }
            Some(prev) => {
                if receipt.hop < 2 {
                    return Err(StoreError::ChainConflict);
                }
                let res = sqlx::query(
                    "UPDATE heads SET last_hop = ?1, last_receipt_hash = ?2 \
                     WHERE trace_id = ?3 AND last_hop = ?4 AND last_receipt_hash = ?5",
                )
                .bind(receipt.hop as i64)
                .bind(hash)
                .bind(&receipt.trace_id)
                .bind((receipt.hop - 1) as i64)
                .bind(prev)
                .execute(&mut *tx)
                .await?;
                if res.rows_affected() == 0 {
                    return Err(StoreError::ChainConflict);
                }
            }
        }

        sqlx::query(
            "INSERT INTO receipts(trace_id, hop, ts, cid, canon, algo, prev_receipt_hash, \
             policy_json, tenant, receipt_hash, fallback_used, fu_tokens, semantic_violations) \
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&receipt.trace_id)
        .bind(receipt.hop as i64)
        .bind(&receipt.ts)
        .bind(&receipt.cid)
        .bind(&receipt.canon)
        .bind(&receipt.algo)
        .bind(receipt.prev_receipt_hash.as_deref())
        .bind(serde_json::to_string(&receipt.policy)?)
        .bind(&receipt.tenant)
        .bind(hash)
        .bind(receipt.fallback_used)
        .bind(receipt.fu_tokens.map(|v| v as i64))
        .bind(
            receipt
                .semantic_violations
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(receipt.hop)
    }

    async fn get_chain(&self, trace_id: &str) -> Result<Vec<Receipt>, StoreError> {
        let rows = sqlx::query(
            "SELECT trace_id, hop, ts, cid, canon, algo, prev_receipt_hash, policy_json, \
             tenant, receipt_hash, fallback_used, fu_tokens, semantic_violations \
             FROM receipts WHERE trace_id = ?1 ORDER BY hop ASC",
        )
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_receipt).collect()
    }

    async fn get_idempotent(
        &self,
        api_key: &str,
        idem_key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT response_json FROM idempotency WHERE api_key = ?1 AND key = ?2")
            .bind(api_key)
            .bind(idem_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Value, StoreError> {
            let raw: String = row.try_get("response_json")?;
            Ok(serde_json::from_str(&raw)?)
        })
        .transpose()
    }

    async fn cache_idempotent(
        &self,
        api_key: &str,
        idem_key: &str,
        response: &Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO idempotency(api_key, key, response_json, created_at) \
             VALUES(?1, ?2, ?3, ?4)",
        )
        .bind(api_key)
        .bind(idem_key)
        .bind(serde_json::to_string(response)?)
        .bind(tfg_receipt::now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_idempotency(&self, older_than: &str) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM idempotency WHERE created_at < ?1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn record_usage(&self, row: &UsageRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO usage_ledger(api_key, tenant, trace_id, hop, verified, vex_units, \
             fu_tokens, ts) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&row.api_key)
        .bind(&row.tenant)
        .bind(&row.trace_id)
        .bind(row.hop as i64)
        .bind(i64::from(row.verified))
        .bind(row.vex_units as i64)
        .bind(row.fu_tokens as i64)
        .bind(&row.ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn monthly_usage(
        &self,
        tenant: &str,
        month_start: &str,
    ) -> Result<MonthlyUsage, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(vex_units), 0) AS vex, COALESCE(SUM(fu_tokens), 0) AS fu \
             FROM usage_ledger WHERE tenant = ?1 AND ts >= ?2",
        )
        .bind(tenant)
        .bind(month_start)
        .fetch_one(&self.pool)
        .await?;
        Ok(MonthlyUsage {
            vex_used: row.try_get::<i64, _>("vex")? as u64,
            fu_used: row.try_get::<i64, _>("fu")? as u64,
        })
    }

    async fn enqueue_billing(
        &self,
        api_key: &str,
        stripe_item: &str,
        units: u64,
        ts_unix: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO billing_queue(api_key, stripe_item, units, ts, retries) \
             VALUES(?1, ?2, ?3, ?4, 0)",
        )
        .bind(api_key)
        .bind(stripe_item)
        .bind(units as i64)
        .bind(ts_unix)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue_billing_batch(&self, limit: u32) -> Result<Vec<BillingItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, api_key, stripe_item, units, ts, retries FROM billing_queue \
             ORDER BY id ASC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<BillingItem, StoreError> {
                Ok(BillingItem {
                    id: row.try_get("id")?,
                    api_key: row.try_get("api_key")?,
                    stripe_item: row.try_get("stripe_item")?,
                    units: row.try_get::<i64, _>("units")? as u64,
                    ts: row.try_get("ts")?,
                    retries: row.try_get::<i64, _>("retries")? as u32,
                })
            })
            .collect()
    }

    async fn delete_billing_items(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM billing_queue WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn bump_billing_retries(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE billing_queue SET retries = retries + 1 WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
