// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Semantic-invariant checks gating LLM-repaired payloads."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A fallback repair may only change *syntax*. This crate compares the
//! original (possibly malformed) text against the repaired document and
//! denies the exchange when business-critical content drifted: amounts,
//! currencies, identifiers, critical fields, magnitudes, date shapes,
//! and known enums.

mod flatten;
mod rules;

pub use flatten::{extract_partial, flatten};
pub use rules::AMOUNT_DRIFT_TOLERANCE;

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// The invariant rule a violation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Amount drift or precision loss.
    AmountPrecision,
    /// Currency code changed.
    CurrencyUnchanged,
    /// Identifier-like field changed.
    IdsUnchanged,
    /// Critical field disappeared.
    RequiredFields,
    /// Numeric value jumped by an order of magnitude.
    NumericRanges,
    /// Date-like field lost its date shape.
    DateFormats,
    /// Enum field left its allowed set.
    EnumValues,
    /// The repaired text is still not valid JSON.
    RepairedUnparseable,
}

impl Rule {
    /// Stable rule name used in reason codes (`SEMANTIC_VIOLATION:<rule>`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmountPrecision => "amount_precision",
            Self::CurrencyUnchanged => "currency_unchanged",
            Self::IdsUnchanged => "ids_unchanged",
            Self::RequiredFields => "required_fields",
            Self::NumericRanges => "numeric_ranges",
            Self::DateFormats => "date_formats",
            Self::EnumValues => "enum_values",
            Self::RepairedUnparseable => "repaired_unparseable",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One semantic-invariant violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// The rule that fired.
    pub rule: Rule,
    /// Dotted path of the offending field.
    pub field: String,
    /// What the original held.
    pub expected: String,
    /// What the repair produced.
    pub actual: String,
    /// Human-readable summary.
    pub message: String,
}

/// Outcome of a full invariant check.
#[derive(Debug, Clone, Serialize)]
pub struct InvariantReport {
    /// `true` when no rule fired.
    pub ok: bool,
    /// Every violation found, in rule order.
    pub violations: Vec<Violation>,
}

impl InvariantReport {
    /// The violation messages, for response bodies and receipts.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }
}

/// Check a repaired document against the original text.
///
/// The original is parsed as JSON when possible; otherwise a regex
/// extractor recovers the recognizable key-value pairs so the comparison
/// can still run. An unparseable *repair* is itself a violation.
///
/// # Examples
///
/// ```
/// let report = tfg_invariants::validate_repair(
///     r#"{"invoice_id": "INV-1", "amount": 1000.00}"#,
///     r#"{"invoice_id": "INV-1", "amount": 10.00}"#,
/// );
/// assert!(!report.ok);
/// ```
#[must_use]
pub fn validate_repair(original_text: &str, repaired_text: &str) -> InvariantReport {
    let repaired: Value = match serde_json::from_str(repaired_text) {
        Ok(v) => v,
        Err(_) => {
            return InvariantReport {
                ok: false,
                violations: vec![Violation {
                    rule: Rule::RepairedUnparseable,
                    field: String::new(),
                    expected: "valid JSON".to_string(),
                    actual: "malformed".to_string(),
                    message: "Repaired JSON is still malformed".to_string(),
                }],
            };
        }
    };

    let original: Value = serde_json::from_str(original_text)
        .unwrap_or_else(|_| extract_partial(original_text));

    let violations = check_values(&original, &repaired);
    InvariantReport {
        ok: violations.is_empty(),
        violations,
    }
}

/// Run every invariant rule over two parsed documents.
#[must_use]
pub fn check_values(original: &Value, repaired: &Value) -> Vec<Violation> {
    let orig = flatten(original);
    let repair = flatten(repaired);

    let mut violations = Vec::new();
    rules::check_amount_precision(&orig, &repair, &mut violations);
    rules::check_currency_unchanged(&orig, &repair, &mut violations);
    rules::check_ids_unchanged(&orig, &repair, &mut violations);
    rules::check_required_fields(&orig, &repair, &mut violations);
    rules::check_numeric_ranges(&orig, &repair, &mut violations);
    rules::check_date_formats(&orig, &repair, &mut violations);
    rules::check_enum_values(&orig, &repair, &mut violations);
    violations
}
