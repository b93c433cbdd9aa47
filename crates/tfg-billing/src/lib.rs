// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Reserved-capacity metering and billing buffer with payment-sink flush."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Metering turns verified exchanges (VEx) and fallback tokens (FU) into
//! queued charges. Tenants with a reserved-capacity plan are billed only
//! for the overage above their monthly allowance, priced by tier. The
//! queue drains asynchronously to the payment sink; delivery failures
//! retry up to a bound and then drop; billing never affects the
//! exchange path.

mod buffer;
mod reserved;
mod sink;

pub use buffer::{BillingBuffer, FlushReport};
pub use reserved::{OverageTier, ReservedCapacity, load_reserved_configs, select_tier};
pub use sink::{PaymentSink, SinkError, StripeSink};

/// Errors from loading billing configuration.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// The reserved-capacity file could not be read.
    #[error("cannot read reserved-capacity config {path}: {source}")]
    Io {
        /// The offending path.
        path: String,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The reserved-capacity file is not the expected JSON shape.
    #[error("reserved-capacity config {path} is malformed: {source}")]
    Parse {
        /// The offending path.
        path: String,
        /// The JSON failure.
        #[source]
        source: serde_json::Error,
    },
}
