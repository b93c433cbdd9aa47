// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recursive payload sanitization.

use serde_json::Value;

/// Sanitize a single string: CRLF and bare CR collapse to LF, then every
/// C0 control character except tab and line feed (plus DEL) is stripped.
///
/// Idempotent: sanitizing a sanitized string is a no-op.
///
/// # Examples
///
/// ```
/// assert_eq!(tfg_repair::sanitize_text("a\r\nb\u{0000}c"), "a\nbc");
/// ```
#[must_use]
pub fn sanitize_text(s: &str) -> String {
    let unified = s.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .chars()
        .filter(|&c| c == '\t' || c == '\n' || (c >= '\u{0020}' && c != '\u{007f}'))
        .collect()
}

/// Walk a JSON value and sanitize every string in place of the original.
///
/// Objects and arrays are traversed element-wise; numbers, booleans, and
/// nulls pass through unchanged.
#[must_use]
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_value(v)))
                .collect(),
        ),
        other => other,
    }
}
