// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "RFC 8785 JSON canonicalization and content identifiers."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic byte serialization of JSON values per RFC 8785 (JCS),
//! plus the `sha256:`-prefixed content identifiers built on top of it.
//!
//! Receipts, export bundles, and normalized payloads are all hashed over
//! this canonical form, so two independent implementations must agree
//! byte-for-byte: object keys sorted by code point, strings normalized to
//! NFC before escaping, ES6 shortest-round-trip number formatting, no
//! whitespace.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

mod number;

pub use number::format_f64;

/// Errors raised while canonicalizing a JSON value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonError {
    /// A float was NaN or infinite; JCS has no representation for these.
    #[error("non-finite number cannot be canonicalized")]
    NonFinite,
}

/// Canonicalize a JSON value into its RFC 8785 string form.
///
/// Object keys are NFC-normalized and sorted by code point; array order is
/// preserved; numbers use the ES6 shortest-round-trip form with `-0`
/// collapsed to `0`.
///
/// # Errors
///
/// Returns [`CanonError::NonFinite`] if any number is NaN or infinite.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let canon = tfg_canon::canonicalize(&json!({"b": 2, "a": 1})).unwrap();
/// assert_eq!(canon, r#"{"a":1,"b":2}"#);
/// ```
pub fn canonicalize(value: &Value) -> Result<String, CanonError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Canonicalize a JSON value and return the UTF-8 bytes.
///
/// # Errors
///
/// Same failure conditions as [`canonicalize`].
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonError> {
    canonicalize(value).map(String::into_bytes)
}

/// Compute the content identifier of a JSON value:
/// `"sha256:" + hex(sha256(canonicalize(value)))`.
///
/// # Errors
///
/// Same failure conditions as [`canonicalize`].
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let cid = tfg_canon::cid(&json!({})).unwrap();
/// assert!(cid.starts_with("sha256:"));
/// assert_eq!(cid.len(), "sha256:".len() + 64);
/// ```
pub fn cid(value: &Value) -> Result<String, CanonError> {
    let canon = canonicalize(value)?;
    Ok(sha256_cid(canon.as_bytes()))
}

/// Compute a `sha256:`-prefixed hex digest over raw bytes.
#[must_use]
pub fn sha256_cid(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CanonError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut String) -> Result<(), CanonError> {
    // Normalize keys first so the sort order matches the emitted bytes.
    let mut entries: Vec<(String, &Value)> = map
        .iter()
        .map(|(k, v)| (k.nfc().collect::<String>(), v))
        .collect();
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push('{');
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        escape_into(key, out);
        out.push(':');
        write_value(value, out)?;
    }
    out.push('}');
    Ok(())
}

fn write_number(n: &serde_json::Number, out: &mut String) -> Result<(), CanonError> {
    // Integers keep their full decimal expansion even past 2^53; only
    // float-typed values go through the ES6 formatter.
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
        return Ok(());
    }
    let f = n.as_f64().ok_or(CanonError::NonFinite)?;
    out.push_str(&format_f64(f)?);
    Ok(())
}

fn write_string(s: &str, out: &mut String) {
    let normalized: String = s.nfc().collect();
    escape_into(&normalized, out);
}

/// Escape a string per RFC 8785: the two-character sequences for the
/// usual control characters, `\u00xx` for the rest of C0, and literal
/// UTF-8 for everything else.
fn escape_into(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{0009}' => out.push_str("\\t"),
            '\u{000A}' => out.push_str("\\n"),
            '\u{000C}' => out.push_str("\\f"),
            '\u{000D}' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
