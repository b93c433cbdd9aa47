// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seven invariant rules.
//!
//! Rules receive the flattened dotted-path view of both documents and
//! append to a shared violation list; a rule that cannot evaluate a
//! field skips it rather than failing the whole check.

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::{Rule, Violation};

type Flat = BTreeMap<String, Value>;

/// Maximum tolerated relative drift for amount fields (1%).
///
/// Configurable in one place; high-value flows may tighten this.
pub static AMOUNT_DRIFT_TOLERANCE: LazyLock<Decimal> = LazyLock::new(|| Decimal::new(1, 2));

const ID_MARKERS: &[&str] = &["id", "uuid", "reference", "number", "code"];

const CRITICAL_MARKERS: &[&str] = &[
    "amount",
    "currency",
    "invoice_id",
    "customer_name",
    "id",
    "uuid",
    "reference",
    "total",
    "subtotal",
];

/// Amounts must not drift more than the tolerance or lose decimal places.
pub(crate) fn check_amount_precision(orig: &Flat, repair: &Flat, out: &mut Vec<Violation>) {
    for (field, orig_val) in orig {
        if !field.to_lowercase().contains("amount") {
            continue;
        }
        let Some(repair_val) = repair.get(field) else {
            continue;
        };
        match (to_decimal(orig_val), to_decimal(repair_val)) {
            (Some(o), Some(r)) => {
                if (o - r).abs() > (o * *AMOUNT_DRIFT_TOLERANCE).abs() {
                    out.push(Violation {
                        rule: Rule::AmountPrecision,
                        field: field.clone(),
                        expected: o.to_string(),
                        actual: r.to_string(),
                        message: format!("Amount changed significantly: {o} -> {r}"),
                    });
                }
                if r.scale() < o.scale() {
                    out.push(Violation {
                        rule: Rule::AmountPrecision,
                        field: field.clone(),
                        expected: format!("{} decimal places", o.scale()),
                        actual: format!("{} decimal places", r.scale()),
                        message: format!("Precision loss in amount field: {field}"),
                    });
                }
            }
            (None, None) => {}
            _ => out.push(Violation {
                rule: Rule::AmountPrecision,
                field: field.clone(),
                expected: display(orig_val),
                actual: display(repair_val),
                message: format!(
                    "Amount format changed: {} -> {}",
                    display(orig_val),
                    display(repair_val)
                ),
            }),
        }
    }
}

/// Currency codes must be byte-identical after case folding.
pub(crate) fn check_currency_unchanged(orig: &Flat, repair: &Flat, out: &mut Vec<Violation>) {
    for (field, orig_val) in orig {
        let lower = field.to_lowercase();
        if !lower.contains("curr") {
            continue;
        }
        let Some(repair_val) = repair.get(field) else {
            continue;
        };
        let o = display(orig_val).to_uppercase();
        let r = display(repair_val).to_uppercase();
        if o != r {
            out.push(Violation {
                rule: Rule::CurrencyUnchanged,
                field: field.clone(),
                expected: o.clone(),
                actual: r.clone(),
                message: format!("Currency code changed: {o} -> {r}"),
            });
        }
    }
}

/// Identifier-like fields must not change at all.
pub(crate) fn check_ids_unchanged(orig: &Flat, repair: &Flat, out: &mut Vec<Violation>) {
    for (field, orig_val) in orig {
        let lower = field.to_lowercase();
        if !ID_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }
        let Some(repair_val) = repair.get(field) else {
            continue;
        };
        let o = display(orig_val).trim().to_string();
        let r = display(repair_val).trim().to_string();
        if o != r {
            out.push(Violation {
                rule: Rule::IdsUnchanged,
                field: field.clone(),
                expected: o.clone(),
                actual: r.clone(),
                message: format!("ID field changed: {o} -> {r}"),
            });
        }
    }
}

/// Critical fields present in the original must survive the repair.
pub(crate) fn check_required_fields(orig: &Flat, repair: &Flat, out: &mut Vec<Violation>) {
    for field in orig.keys() {
        let lower = field.to_lowercase();
        if !CRITICAL_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }
        if !repair.contains_key(field) {
            out.push(Violation {
                rule: Rule::RequiredFields,
                field: field.clone(),
                expected: "present".to_string(),
                actual: "missing".to_string(),
                message: format!("Critical field removed: {field}"),
            });
        }
    }
}

/// Non-zero numerics must not jump by an order of magnitude.
pub(crate) fn check_numeric_ranges(orig: &Flat, repair: &Flat, out: &mut Vec<Violation>) {
    for (field, orig_val) in orig {
        let Some(repair_val) = repair.get(field) else {
            continue;
        };
        let (Some(o), Some(r)) = (orig_val.as_f64(), repair_val.as_f64()) else {
            continue;
        };
        if o == 0.0 || r == 0.0 {
            continue;
        }
        let ratio = (r / o).abs();
        if ratio > 10.0 || ratio < 0.1 {
            out.push(Violation {
                rule: Rule::NumericRanges,
                field: field.clone(),
                expected: format!("~{o}"),
                actual: r.to_string(),
                message: format!("Numeric value changed by order of magnitude: {o} -> {r}"),
            });
        }
    }
}

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\d{4}-\d{2}-\d{2}",
        r"\d{2}/\d{2}/\d{4}",
        r"\d{2}-\d{2}-\d{4}",
        r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern compiles"))
    .collect()
});

fn is_date_like(s: &str) -> bool {
    DATE_PATTERNS.iter().any(|re| re.is_match(s))
}

/// Date-like fields must stay date-like.
pub(crate) fn check_date_formats(orig: &Flat, repair: &Flat, out: &mut Vec<Violation>) {
    for (field, orig_val) in orig {
        let lower = field.to_lowercase();
        if !lower.contains("date") && !lower.contains("time") {
            continue;
        }
        let Some(repair_val) = repair.get(field) else {
            continue;
        };
        let o = display(orig_val);
        let r = display(repair_val);
        if is_date_like(&o) && !is_date_like(&r) {
            out.push(Violation {
                rule: Rule::DateFormats,
                field: field.clone(),
                expected: "valid date format".to_string(),
                actual: r.clone(),
                message: format!("Date format corrupted: {o} -> {r}"),
            });
        }
    }
}

const ENUM_FIELDS: &[(&str, &[&str])] = &[
    ("status", &["pending", "paid", "cancelled", "draft"]),
    ("type", &["invoice", "credit_note", "receipt"]),
    ("payment_method", &["cash", "card", "bank_transfer", "check"]),
];

/// Known enum fields must remain in their allowed sets.
pub(crate) fn check_enum_values(orig: &Flat, repair: &Flat, out: &mut Vec<Violation>) {
    for (field, allowed) in ENUM_FIELDS {
        let (Some(orig_val), Some(repair_val)) = (orig.get(*field), repair.get(*field)) else {
            continue;
        };
        let o = display(orig_val).to_lowercase();
        let r = display(repair_val).to_lowercase();
        if allowed.contains(&o.as_str()) && !allowed.contains(&r.as_str()) {
            out.push(Violation {
                rule: Rule::EnumValues,
                field: (*field).to_string(),
                expected: format!("one of {allowed:?}"),
                actual: r.clone(),
                message: format!("Invalid enum value: {r}"),
            });
        }
    }
}

/// Render a value the way a human wrote it (strings unquoted).
fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse an amount-ish value as a decimal, stripping currency symbols
/// and whitespace from strings.
fn to_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Decimal::from_str(&cleaned).ok()
            }
        }
        _ => None,
    }
}
