// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fluent builder for constructing [`Receipt`]s.

use serde_json::{Value, json};

use crate::{CANON_SCHEME, HASH_ALGO, Receipt, ReceiptError, now_ts};

/// Fluent builder for constructing [`Receipt`]s ergonomically.
///
/// # Examples
///
/// ```
/// use tfg_receipt::ReceiptBuilder;
///
/// let receipt = ReceiptBuilder::new("trace-1", "acme")
///     .hop(2)
///     .cid("sha256:ab")
///     .prev_receipt_hash("sha256:cd")
///     .with_hash()
///     .unwrap();
///
/// assert_eq!(receipt.hop, 2);
/// assert!(receipt.receipt_hash.is_some());
/// ```
#[derive(Debug)]
pub struct ReceiptBuilder {
    trace_id: String,
    tenant: String,
    hop: u64,
    ts: Option<String>,
    cid: String,
    prev_receipt_hash: Option<String>,
    policy: Value,
    fallback_used: Option<bool>,
    fu_tokens: Option<u64>,
    semantic_violations: Option<Vec<String>>,
}

impl ReceiptBuilder {
    /// Create a builder for the given trace and tenant.
    ///
    /// Defaults: hop 1, no previous hash, an allow-all policy snapshot,
    /// and a timestamp taken at build time.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            tenant: tenant.into(),
            hop: 1,
            ts: None,
            cid: String::new(),
            prev_receipt_hash: None,
            policy: json!({"engine": "HEL", "allowed": true, "reason": "ok"}),
            fallback_used: None,
            fu_tokens: None,
            semantic_violations: None,
        }
    }

    /// Set the hop number (1-based).
    #[must_use]
    pub fn hop(mut self, hop: u64) -> Self {
        self.hop = hop;
        self
    }

    /// Pin the timestamp instead of taking it at build time.
    #[must_use]
    pub fn ts(mut self, ts: impl Into<String>) -> Self {
        self.ts = Some(ts.into());
        self
    }

    /// Set the content identifier of the normalized payload.
    #[must_use]
    pub fn cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = cid.into();
        self
    }

    /// Link to the previous hop's receipt hash.
    #[must_use]
    pub fn prev_receipt_hash(mut self, hash: impl Into<String>) -> Self {
        self.prev_receipt_hash = Some(hash.into());
        self
    }

    /// Set the policy decision snapshot.
    #[must_use]
    pub fn policy(mut self, policy: Value) -> Self {
        self.policy = policy;
        self
    }

    /// Record that the fallback repaired this payload, with its token cost.
    #[must_use]
    pub fn fallback(mut self, fu_tokens: u64) -> Self {
        self.fallback_used = Some(true);
        self.fu_tokens = Some(fu_tokens);
        self
    }

    /// Record tolerated semantic-invariant notes.
    #[must_use]
    pub fn semantic_violations(mut self, notes: Vec<String>) -> Self {
        if !notes.is_empty() {
            self.semantic_violations = Some(notes);
        }
        self
    }

    /// Consume the builder and produce a [`Receipt`] (no hash).
    #[must_use]
    pub fn build(self) -> Receipt {
        Receipt {
            trace_id: self.trace_id,
            hop: self.hop,
            ts: self.ts.unwrap_or_else(now_ts),
            tenant: self.tenant,
            cid: self.cid,
            canon: CANON_SCHEME.to_string(),
            algo: HASH_ALGO.to_string(),
            prev_receipt_hash: self.prev_receipt_hash,
            policy: self.policy,
            receipt_hash: None,
            fallback_used: self.fallback_used,
            fu_tokens: self.fu_tokens,
            semantic_violations: self.semantic_violations,
        }
    }

    /// Build the receipt and compute its hash.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError`] if serialization fails.
    pub fn with_hash(self) -> Result<Receipt, ReceiptError> {
        let mut receipt = self.build();
        receipt.receipt_hash = Some(crate::compute_hash(&receipt)?);
        Ok(receipt)
    }
}
