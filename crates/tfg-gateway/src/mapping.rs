// SPDX-License-Identifier: MIT OR Apache-2.0

//! The statically-loaded schema pair + mapping document.
//!
//! The MVP surface ships one mapping, compiled once at startup from
//! documents embedded in the binary. A richer registry is explicitly out
//! of scope.

use jsonschema::Validator;
use serde_json::Value;

use tfg_transform::TransformError;

const SOURCE_SCHEMA: &str = include_str!("../schemas/openai.tooluse.invoice.v1.schema.json");
const TARGET_SCHEMA: &str = include_str!("../schemas/invoice.iso20022.v1.schema.json");
const MAPPING_DOC: &str =
    include_str!("../schemas/openai.tooluse.invoice.v1__invoice.iso20022.v1.json");

/// Errors building the mapping set at startup.
#[derive(Debug, thiserror::Error)]
pub enum MappingSetError {
    /// An embedded document is not valid JSON.
    #[error("embedded mapping document is malformed: {0}")]
    Document(#[from] serde_json::Error),

    /// An embedded schema does not compile.
    #[error("embedded schema does not compile: {0}")]
    Schema(String),
}

/// A compiled (source schema, target schema, mapping) triple.
pub struct MappingSet {
    /// Identifier of the accepted payload type.
    pub payload_type: String,
    /// Identifier of the produced target type.
    pub target_type: String,
    source: Validator,
    target: Validator,
    mapping: Value,
}

impl MappingSet {
    /// Compile the built-in invoice mapping.
    ///
    /// # Errors
    ///
    /// Returns [`MappingSetError`] when an embedded document is broken:
    /// a build-time defect surfaced at startup, not at request time.
    pub fn invoice_demo() -> Result<Self, MappingSetError> {
        let source_doc: Value = serde_json::from_str(SOURCE_SCHEMA)?;
        let target_doc: Value = serde_json::from_str(TARGET_SCHEMA)?;
        let mapping: Value = serde_json::from_str(MAPPING_DOC)?;

        let source = jsonschema::validator_for(&source_doc)
            .map_err(|e| MappingSetError::Schema(e.to_string()))?;
        let target = jsonschema::validator_for(&target_doc)
            .map_err(|e| MappingSetError::Schema(e.to_string()))?;

        Ok(Self {
            payload_type: mapping["from"]
                .as_str()
                .unwrap_or("openai.tooluse.invoice.v1")
                .to_string(),
            target_type: mapping["to"]
                .as_str()
                .unwrap_or("invoice.iso20022.v1")
                .to_string(),
            source,
            target,
            mapping,
        })
    }

    /// Whether this set handles the requested type pair.
    #[must_use]
    pub fn supports(&self, payload_type: &str, target_type: &str) -> bool {
        self.payload_type == payload_type && self.target_type == target_type
    }

    /// Validate an inbound payload; the first schema error is returned
    /// as a message.
    ///
    /// # Errors
    ///
    /// Returns the first validation error rendered as text.
    pub fn validate_source(&self, payload: &Value) -> Result<(), String> {
        match self.source.iter_errors(payload).next() {
            None => Ok(()),
            Some(err) => Err(err.to_string()),
        }
    }

    /// Validate a normalized payload against the target schema.
    ///
    /// # Errors
    ///
    /// Returns the first validation error rendered as text.
    pub fn validate_target(&self, normalized: &Value) -> Result<(), String> {
        match self.target.iter_errors(normalized).next() {
            None => Ok(()),
            Some(err) => Err(err.to_string()),
        }
    }

    /// Apply the mapping document.
    ///
    /// # Errors
    ///
    /// Propagates [`TransformError`] from the engine.
    pub fn transform(&self, payload: &Value) -> Result<Value, TransformError> {
        tfg_transform::transform(payload, &self.mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> Value {
        json!({
            "tool_calls": [{
                "id": "call_1",
                "function": {
                    "name": "create_invoice",
                    "arguments": "{\"invoice_id\":\"INV-1\",\"amount\":123.45,\"currency\":\"USD\",\"customer_name\":\"Acme\",\"description\":\"Services\"}",
                },
            }],
        })
    }

    #[test]
    fn compiles_embedded_documents() {
        let set = MappingSet::invoice_demo().unwrap();
        assert_eq!(set.payload_type, "openai.tooluse.invoice.v1");
        assert_eq!(set.target_type, "invoice.iso20022.v1");
        assert!(set.supports("openai.tooluse.invoice.v1", "invoice.iso20022.v1"));
        assert!(!set.supports("openai.tooluse.invoice.v1", "other.v1"));
    }

    #[test]
    fn source_schema_accepts_the_demo_payload() {
        let set = MappingSet::invoice_demo().unwrap();
        set.validate_source(&valid_payload()).unwrap();
    }

    #[test]
    fn source_schema_rejects_missing_tool_calls() {
        let set = MappingSet::invoice_demo().unwrap();
        assert!(set.validate_source(&json!({"other": 1})).is_err());
        assert!(set.validate_source(&json!({"tool_calls": []})).is_err());
    }

    #[test]
    fn source_schema_requires_string_arguments() {
        let set = MappingSet::invoice_demo().unwrap();
        let bad = json!({
            "tool_calls": [{"function": {"name": "f", "arguments": {"already": "parsed"}}}],
        });
        assert!(set.validate_source(&bad).is_err());
    }

    #[test]
    fn transform_after_argument_parse_passes_target_schema() {
        let set = MappingSet::invoice_demo().unwrap();
        let mut payload = valid_payload();
        // The pipeline replaces the argument string with its parsed form
        // before transforming.
        let args: Value = serde_json::from_str(
            payload["tool_calls"][0]["function"]["arguments"]
                .as_str()
                .unwrap(),
        )
        .unwrap();
        payload["tool_calls"][0]["function"]["arguments"] = args;

        let normalized = set.transform(&payload).unwrap();
        assert_eq!(normalized["amount"]["minor"], 12345);
        assert_eq!(normalized["amount"]["currency"], "USD");
        assert_eq!(normalized["invoice_id"], "INV-1");
        set.validate_target(&normalized).unwrap();
    }

    #[test]
    fn target_schema_rejects_missing_amount() {
        let set = MappingSet::invoice_demo().unwrap();
        let bad = json!({"invoice_id": "INV-1", "customer": {"name": "Acme"}});
        assert!(set.validate_target(&bad).is_err());
    }
}
