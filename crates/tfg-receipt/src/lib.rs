// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Hash-linked exchange receipts: record, builder, chain verification."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! One [`Receipt`] is appended per hop of a trace. Its `receipt_hash` is
//! the SHA-256 of the JCS-canonicalized record with the `receipt_hash`
//! key itself absent, and hop N+1 stores hop N's hash as
//! `prev_receipt_hash`, giving every trace a tamper-evident chain that
//! can be re-verified from the stored rows alone.

mod builder;
mod chain;

pub use builder::ReceiptBuilder;
pub use chain::{ChainError, verify_chain};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonicalization scheme tag recorded in every receipt.
pub const CANON_SCHEME: &str = "jcs";

/// Hash algorithm tag recorded in every receipt.
pub const HASH_ALGO: &str = "sha256";

/// Timestamp format used in receipts (UTC, second resolution).
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Errors from receipt hashing.
#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    /// The receipt could not be canonicalized.
    #[error(transparent)]
    Canon(#[from] tfg_canon::CanonError),

    /// The receipt could not be serialized to JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The current UTC time in receipt timestamp format.
#[must_use]
pub fn now_ts() -> String {
    Utc::now().format(TS_FORMAT).to_string()
}

/// A single hop's receipt.
///
/// `prev_receipt_hash` serializes as `null` on hop 1 (it participates in
/// the hash), while `receipt_hash` and the fallback fields are omitted
/// entirely when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Trace this receipt belongs to.
    pub trace_id: String,

    /// 1-based position within the trace; dense, no gaps.
    pub hop: u64,

    /// Append time, `%Y-%m-%dT%H:%M:%SZ`.
    pub ts: String,

    /// Tenant that performed the exchange.
    pub tenant: String,

    /// Content identifier of the normalized payload.
    pub cid: String,

    /// Canonicalization scheme tag, fixed `"jcs"`.
    pub canon: String,

    /// Hash algorithm tag, fixed `"sha256"`.
    pub algo: String,

    /// Hash of the previous hop's receipt; `null` on hop 1.
    pub prev_receipt_hash: Option<String>,

    /// Snapshot of the policy decision at append time.
    pub policy: Value,

    /// Hash of this receipt (with this field excluded from hashing).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_hash: Option<String>,

    /// Present when the LLM fallback repaired the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,

    /// Fallback tokens consumed for this hop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fu_tokens: Option<u64>,

    /// Recorded semantic-invariant notes, when any were tolerated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_violations: Option<Vec<String>>,
}

/// Compute the hash of a receipt.
///
/// The receipt is serialized, the `receipt_hash` key removed, the result
/// canonicalized and hashed. The output carries the `sha256:` prefix.
///
/// # Errors
///
/// Returns [`ReceiptError`] if serialization or canonicalization fails.
///
/// # Examples
///
/// ```
/// use tfg_receipt::{ReceiptBuilder, compute_hash};
///
/// let r = ReceiptBuilder::new("trace-1", "acme").cid("sha256:ab").build();
/// let h = compute_hash(&r).unwrap();
/// assert!(h.starts_with("sha256:"));
/// ```
pub fn compute_hash(receipt: &Receipt) -> Result<String, ReceiptError> {
    let mut v = serde_json::to_value(receipt)?;
    if let Value::Object(map) = &mut v {
        map.remove("receipt_hash");
    }
    let canon = tfg_canon::canonicalize(&v)?;
    Ok(tfg_canon::sha256_cid(canon.as_bytes()))
}

/// Verify that a receipt's stored hash matches the recomputed one.
///
/// A receipt without a stored hash verifies trivially; a receipt whose
/// recomputation fails does not.
#[must_use]
pub fn verify_hash(receipt: &Receipt) -> bool {
    match &receipt.receipt_hash {
        None => true,
        Some(stored) => match compute_hash(receipt) {
            Ok(recomputed) => *stored == recomputed,
            Err(_) => false,
        },
    }
}
