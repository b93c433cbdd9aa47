// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dotted-path flattening and partial recovery of malformed documents.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Flatten a JSON document into dotted paths.
///
/// Every node appears under its full path: object members as
/// `parent.child`, array elements as `parent[i]`. Container nodes are
/// included alongside their leaves so presence checks see both.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let flat = tfg_invariants::flatten(&json!({"a": {"b": 1}, "c": [true]}));
/// assert_eq!(flat.get("a.b"), Some(&json!(1)));
/// assert_eq!(flat.get("c[0]"), Some(&json!(true)));
/// ```
#[must_use]
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(value, "", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                out.insert(path.clone(), val.clone());
                if val.is_object() || val.is_array() {
                    flatten_into(val, &path, out);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let path = format!("{prefix}[{i}]");
                out.insert(path.clone(), item.clone());
                if item.is_object() || item.is_array() {
                    flatten_into(item, &path, out);
                }
            }
        }
        _ => {}
    }
}

static STRING_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"\s*:\s*"([^"]*)""#).expect("static pattern compiles"));
static NUMBER_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"\s*:\s*(-?\d+\.?\d*)"#).expect("static pattern compiles"));
static LITERAL_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]+)"\s*:\s*(true|false|null)"#).expect("static pattern compiles")
});

/// Recover key-value pairs from text that does not parse as JSON.
///
/// Recognizes string, numeric, and boolean/null literals behind quoted
/// keys; everything else is ignored. Used so the invariant rules can
/// still compare the original side of a fallback repair.
#[must_use]
pub fn extract_partial(malformed: &str) -> Value {
    let mut map = Map::new();

    for cap in STRING_PAIR.captures_iter(malformed) {
        map.insert(cap[1].to_string(), Value::String(cap[2].to_string()));
    }
    for cap in NUMBER_PAIR.captures_iter(malformed) {
        let key = cap[1].to_string();
        if map.contains_key(&key) {
            continue;
        }
        let raw = &cap[2];
        let parsed = if raw.contains('.') {
            raw.parse::<f64>().ok().and_then(|f| {
                serde_json::Number::from_f64(f).map(Value::Number)
            })
        } else {
            raw.parse::<i64>().ok().map(Value::from)
        };
        if let Some(v) = parsed {
            map.insert(key, v);
        }
    }
    for cap in LITERAL_PAIR.captures_iter(malformed) {
        let key = cap[1].to_string();
        if map.contains_key(&key) {
            continue;
        }
        let v = match &cap[2] {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Null,
        };
        map.insert(key, v);
    }

    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_objects_and_arrays() {
        let flat = flatten(&json!({
            "invoice": {"id": "INV-1", "lines": [{"amount": 5}]},
        }));
        assert_eq!(flat.get("invoice.id"), Some(&json!("INV-1")));
        assert_eq!(flat.get("invoice.lines[0].amount"), Some(&json!(5)));
        assert!(flat.contains_key("invoice"));
        assert!(flat.contains_key("invoice.lines"));
        assert!(flat.contains_key("invoice.lines[0]"));
    }

    #[test]
    fn extracts_pairs_from_malformed_text() {
        let v = extract_partial(r#"{"invoice_id": "INV-1", "amount": 1000.00, "paid": true,"#);
        assert_eq!(v["invoice_id"], "INV-1");
        assert_eq!(v["amount"], 1000.0);
        assert_eq!(v["paid"], true);
    }

    #[test]
    fn extracts_integers_and_nulls() {
        let v = extract_partial(r#""count": 7, "note": null"#);
        assert_eq!(v["count"], 7);
        assert!(v["note"].is_null());
    }

    #[test]
    fn ignores_unrecognizable_noise() {
        let v = extract_partial("complete garbage without pairs");
        assert_eq!(v, json!({}));
    }
}
