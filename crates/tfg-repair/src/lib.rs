// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Payload sanitization, heuristic JSON repair, and metered LLM fallback."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Three layers of defense against malformed model output:
//!
//! 1. [`sanitize_value`] strips C0 control characters and normalizes line
//!    endings before anything else touches the payload.
//! 2. [`repair_json_str`] runs a pure, best-effort parse ladder for the
//!    common breakages (trailing commas, single quotes, double escaping).
//! 3. [`FallbackProvider`] hands the still-broken text to an external LLM
//!    under a per-tenant monthly token quota; the caller must gate the
//!    result through the semantic-invariant checker.

mod heuristic;
mod provider;
mod quota;
mod sanitize;

pub use heuristic::repair_json_str;
pub use provider::{FallbackProvider, NullProvider, OpenAiProvider, RepairOutcome};
pub use quota::{QuotaDenial, check_quota, estimate_tokens};
pub use sanitize::{sanitize_text, sanitize_value};
