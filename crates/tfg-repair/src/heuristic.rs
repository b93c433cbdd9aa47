// SPDX-License-Identifier: MIT OR Apache-2.0

//! Best-effort heuristic JSON repair.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("static pattern compiles"));

/// Try to parse possibly-malformed JSON, applying a ladder of repairs and
/// stopping at the first success:
///
/// 1. Parse as-is.
/// 2. Remove trailing commas before `]` / `}`.
/// 3. If apostrophes are used as quotes (and double quotes are not also
///    in play), swap them.
/// 4. Decode one pass of doubled escape sequences.
///
/// Pure and side-effect free; returns `None` when nothing on the ladder
/// produces valid JSON.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let v = tfg_repair::repair_json_str(r#"{"a": 1,}"#).unwrap();
/// assert_eq!(v, json!({"a": 1}));
/// ```
#[must_use]
pub fn repair_json_str(s: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(s) {
        return Some(v);
    }

    let no_trailing = TRAILING_COMMA.replace_all(s, "$1");
    if let Ok(v) = serde_json::from_str(&no_trailing) {
        return Some(v);
    }

    // Swapping quote styles is only safe when the text does not already
    // mix both.
    if s.contains('\'') && !s.contains('"') {
        let swapped = no_trailing.replace('\'', "\"");
        if let Ok(v) = serde_json::from_str(&swapped) {
            return Some(v);
        }
    }

    let unescaped = decode_escapes_once(s);
    if let Ok(v) = serde_json::from_str(&unescaped) {
        return Some(v);
    }

    None
}

/// Apply one pass of standard escape-sequence decoding: `\n`, `\t`, `\r`,
/// `\b`, `\f`, `\"`, `\\`, `\/`, `\'`, and `\uXXXX`. Unknown escapes are
/// left untouched.
fn decode_escapes_once(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some('b') => {
                chars.next();
                out.push('\u{0008}');
            }
            Some('f') => {
                chars.next();
                out.push('\u{000c}');
            }
            Some('"') => {
                chars.next();
                out.push('"');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            Some('/') => {
                chars.next();
                out.push('/');
            }
            Some('\'') => {
                chars.next();
                out.push('\'');
            }
            Some('u') => {
                chars.next();
                let hex: String = chars.clone().take(4).collect();
                if hex.len() == 4
                    && let Ok(code) = u32::from_str_radix(&hex, 16)
                    && let Some(decoded) = char::from_u32(code)
                {
                    for _ in 0..4 {
                        chars.next();
                    }
                    out.push(decoded);
                } else {
                    out.push('\\');
                    out.push('u');
                }
            }
            _ => out.push('\\'),
        }
    }
    out
}
