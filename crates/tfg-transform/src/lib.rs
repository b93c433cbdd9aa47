// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Mapping-document transform engine."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Applies a mapping document of the form
//! `{"assign": {"dotted.target": expression, …}}` to an input payload.
//!
//! Expressions are, in order of recognition: a function call
//! `name(arg, …)`, a single-quoted string literal, a path into the input
//! (dotted fields with optional `[idx]` steps), or a non-string JSON
//! literal passed through verbatim. Assignment walks dotted target paths
//! and creates intermediate objects as needed.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Minor-unit scale per ISO 4217 currency; unlisted currencies use 2.
const MINOR_UNITS: &[(&str, u32)] = &[
    ("USD", 2),
    ("EUR", 2),
    ("GBP", 2),
    ("JPY", 0),
    ("CNY", 2),
    ("AUD", 2),
    ("CAD", 2),
    ("INR", 2),
];

const DEFAULT_MINOR_SCALE: u32 = 2;

/// Names the engine recognizes as functions.
const FUNCTIONS: &[&str] = &["to_minor"];

/// Errors from evaluating a mapping document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// The mapping document has no `assign` object.
    #[error("mapping document has no \"assign\" object")]
    MissingAssign,

    /// A call used a function the engine does not know.
    #[error("unknown function: {name}")]
    UnknownFunction {
        /// The unrecognized function name.
        name: String,
    },

    /// A function was called with the wrong number of arguments.
    #[error("{name} expects {expected} arguments, got {got}")]
    ArityMismatch {
        /// Function name.
        name: String,
        /// Expected argument count.
        expected: usize,
        /// Provided argument count.
        got: usize,
    },

    /// An amount could not be read as a decimal number.
    #[error("amount is not numeric: {value}")]
    AmountNotNumeric {
        /// The offending amount rendering.
        value: String,
    },

    /// The converted minor-unit amount overflowed.
    #[error("minor-unit amount out of range: {value}")]
    AmountOutOfRange {
        /// The offending amount rendering.
        value: String,
    },
}

/// Apply a mapping document to a payload, producing the normalized object.
///
/// # Errors
///
/// Returns [`TransformError`] when the document is malformed or a
/// function call fails; missing input paths are not errors and assign
/// `null`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let mapping = json!({"assign": {
///     "amount.minor": "to_minor(invoice.amount, invoice.currency)",
///     "amount.currency": "invoice.currency",
///     "schema": "'invoice.iso20022.v1'",
/// }});
/// let payload = json!({"invoice": {"amount": 123.45, "currency": "USD"}});
/// let out = tfg_transform::transform(&payload, &mapping).unwrap();
/// assert_eq!(out["amount"]["minor"], 12345);
/// assert_eq!(out["schema"], "invoice.iso20022.v1");
/// ```
pub fn transform(payload: &Value, mapping: &Value) -> Result<Value, TransformError> {
    let assign = mapping
        .get("assign")
        .and_then(Value::as_object)
        .ok_or(TransformError::MissingAssign)?;

    let mut out = Value::Object(Map::new());
    for (target, expr) in assign {
        let value = eval_expr(expr, payload)?;
        set_deep(&mut out, target, value);
    }
    Ok(out)
}

fn eval_expr(expr: &Value, payload: &Value) -> Result<Value, TransformError> {
    let Value::String(s) = expr else {
        // Non-string literals pass through.
        return Ok(expr.clone());
    };

    if let Some((name, args_str)) = parse_call(s) {
        let mut args = Vec::new();
        for part in split_args(args_str) {
            let part = part.trim();
            if let Some(lit) = quoted_literal(part) {
                args.push(Value::String(lit.to_string()));
            } else {
                args.push(search_path(part, payload));
            }
        }
        return apply_function(name, &args);
    }

    if let Some(lit) = quoted_literal(s) {
        return Ok(Value::String(lit.to_string()));
    }

    Ok(search_path(s, payload))
}

/// Recognize `name(args…)` for a known function name.
fn parse_call(s: &str) -> Option<(&str, &str)> {
    let open = s.find('(')?;
    if !s.ends_with(')') {
        return None;
    }
    let name = &s[..open];
    if !FUNCTIONS.contains(&name) {
        return None;
    }
    Some((name, &s[open + 1..s.len() - 1]))
}

/// Recognize a `'single-quoted'` string literal.
fn quoted_literal(s: &str) -> Option<&str> {
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Split a function argument list on commas, honoring single quotes.
fn split_args(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_str = false;
    for ch in s.chars() {
        match ch {
            '\'' => {
                in_str = !in_str;
                buf.push(ch);
            }
            ',' if !in_str => {
                out.push(buf.trim().to_string());
                buf.clear();
            }
            _ => buf.push(ch),
        }
    }
    if !buf.trim().is_empty() {
        out.push(buf.trim().to_string());
    }
    out
}

/// Evaluate a dotted path with optional `[idx]` steps against the input.
///
/// Missing steps resolve to `null` rather than failing, matching the
/// pass-through behavior a mapping author expects from optional fields.
#[must_use]
pub fn search_path(path: &str, payload: &Value) -> Value {
    let mut current = payload;
    for segment in path.split('.') {
        let (name, indices) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !name.is_empty() {
            match current.get(name) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        let mut rest = indices;
        while let Some(close) = rest.find(']') {
            let idx: usize = match rest[1..close].parse() {
                Ok(i) => i,
                Err(_) => return Value::Null,
            };
            match current.get(idx) {
                Some(next) => current = next,
                None => return Value::Null,
            }
            rest = &rest[close + 1..];
            if !rest.starts_with('[') {
                break;
            }
        }
    }
    current.clone()
}

fn apply_function(name: &str, args: &[Value]) -> Result<Value, TransformError> {
    match name {
        "to_minor" => {
            if args.len() != 2 {
                return Err(TransformError::ArityMismatch {
                    name: name.to_string(),
                    expected: 2,
                    got: args.len(),
                });
            }
            let currency = match &args[1] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            to_minor(&args[0], &currency).map(Value::from)
        }
        _ => Err(TransformError::UnknownFunction {
            name: name.to_string(),
        }),
    }
}

/// Convert a major-unit amount to integer minor units.
///
/// Uses the fixed scale table (JPY = 0, default 2) and truncates toward
/// zero; no rounding ever occurs.
///
/// # Errors
///
/// Returns [`TransformError::AmountNotNumeric`] for non-numeric input and
/// [`TransformError::AmountOutOfRange`] on overflow.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// assert_eq!(tfg_transform::to_minor(&json!(123.45), "USD").unwrap(), 12345);
/// assert_eq!(tfg_transform::to_minor(&json!(123.45), "JPY").unwrap(), 123);
/// ```
pub fn to_minor(amount: &Value, currency: &str) -> Result<i64, TransformError> {
    let currency = currency.to_uppercase();
    let scale = MINOR_UNITS
        .iter()
        .find(|(code, _)| *code == currency)
        .map_or(DEFAULT_MINOR_SCALE, |(_, s)| *s);

    let decimal = match amount {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
    .ok_or_else(|| TransformError::AmountNotNumeric {
        value: amount.to_string(),
    })?;

    let factor = Decimal::from(10_i64.pow(scale));
    (decimal * factor)
        .trunc()
        .to_i64()
        .ok_or_else(|| TransformError::AmountOutOfRange {
            value: amount.to_string(),
        })
}

/// Assign `value` at a dotted path, creating intermediate objects.
fn set_deep(root: &mut Value, dotted: &str, value: Value) {
    let parts: Vec<&str> = dotted.split('.').collect();
    let mut current = root;
    for part in &parts[..parts.len() - 1] {
        let map = current
            .as_object_mut()
            .expect("set_deep only descends into objects it created");
        let entry = map
            .entry((*part).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(parts[parts.len() - 1].to_string(), value);
    }
}
