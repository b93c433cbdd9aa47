// SPDX-License-Identifier: MIT OR Apache-2.0

//! Whole-chain integrity verification.

use std::fmt;

use crate::{Receipt, verify_hash};

/// Errors from verifying an ordered receipt chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The chain is empty.
    EmptyChain,
    /// A receipt belongs to a different trace.
    TraceMismatch {
        /// Index of the offending receipt.
        index: usize,
    },
    /// Hops are not the dense sequence `1..=len`.
    NonDenseHop {
        /// Index of the offending receipt.
        index: usize,
        /// The hop value found there.
        found: u64,
    },
    /// A receipt's stored hash does not match the recomputed hash.
    HashMismatch {
        /// Index of the offending receipt.
        index: usize,
    },
    /// `prev_receipt_hash` does not match the predecessor's hash.
    BrokenLink {
        /// Index of the offending receipt.
        index: usize,
    },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyChain => write!(f, "chain is empty"),
            Self::TraceMismatch { index } => {
                write!(f, "trace mismatch at chain index {index}")
            }
            Self::NonDenseHop { index, found } => {
                write!(f, "hop {found} at chain index {index} breaks density")
            }
            Self::HashMismatch { index } => {
                write!(f, "hash mismatch at chain index {index}")
            }
            Self::BrokenLink { index } => {
                write!(f, "broken prev-hash link at chain index {index}")
            }
        }
    }
}

impl std::error::Error for ChainError {}

/// Verify an ordered-by-hop receipt chain end to end.
///
/// Checks, in order: non-emptiness, a single trace id, dense 1-based
/// hops, per-receipt hash reproducibility, and the prev-hash link of
/// every hop after the first. Hop 1 must carry no `prev_receipt_hash`.
///
/// # Errors
///
/// Returns the first [`ChainError`] encountered.
///
/// # Examples
///
/// ```
/// use tfg_receipt::{ReceiptBuilder, verify_chain};
///
/// let first = ReceiptBuilder::new("t", "acme").cid("sha256:aa").with_hash().unwrap();
/// let second = ReceiptBuilder::new("t", "acme")
///     .hop(2)
///     .cid("sha256:bb")
///     .prev_receipt_hash(first.receipt_hash.clone().unwrap())
///     .with_hash()
///     .unwrap();
/// verify_chain(&[first, second]).unwrap();
/// ```
pub fn verify_chain(receipts: &[Receipt]) -> Result<(), ChainError> {
    if receipts.is_empty() {
        return Err(ChainError::EmptyChain);
    }
    let trace_id = &receipts[0].trace_id;

    for (i, receipt) in receipts.iter().enumerate() {
        if receipt.trace_id != *trace_id {
            return Err(ChainError::TraceMismatch { index: i });
        }
        if receipt.hop != (i as u64) + 1 {
            return Err(ChainError::NonDenseHop {
                index: i,
                found: receipt.hop,
            });
        }
        if !verify_hash(receipt) {
            return Err(ChainError::HashMismatch { index: i });
        }
        if i == 0 {
            if receipt.prev_receipt_hash.is_some() {
                return Err(ChainError::BrokenLink { index: 0 });
            }
        } else if receipt.prev_receipt_hash.as_deref()
            != receipts[i - 1].receipt_hash.as_deref()
            || receipt.prev_receipt_hash.is_none()
        {
            return Err(ChainError::BrokenLink { index: i });
        }
    }
    Ok(())
}
