//! Black-box schema validation collaborator.
//!
//! The engine consumes validation as `validate(value, schema)` and never
//! inspects schema semantics itself.

use anyhow::{Context, Result};
use jsonschema::Draft;
use serde_json::Value;

/// Outcome of validating a value against a schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }
}

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
///
/// Errors only when the schema itself cannot be compiled; instance
/// violations come back inside the [`Validation`].
pub fn validate(value: &Value, schema: &Value) -> Result<Validation> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let errors: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    Ok(Validation {
        valid: errors.is_empty(),
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output_schema() -> Value {
        json!({
            "type": "object",
            "required": ["confidence", "rationale"],
            "properties": {
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "rationale": {"type": "string"}
            }
        })
    }

    #[test]
    fn conforming_value_is_valid() {
        let value = json!({"confidence": 0.8, "rationale": "checked"});
        let validation = validate(&value, &output_schema()).expect("validate");
        assert!(validation.valid);
        assert!(validation.errors.is_empty());
    }

    #[test]
    fn violations_are_reported_not_raised() {
        let value = json!({"confidence": "high"});
        let validation = validate(&value, &output_schema()).expect("validate");
        assert!(!validation.valid);
        assert!(!validation.errors.is_empty());
    }

    #[test]
    fn broken_schema_is_an_error() {
        let schema = json!({"type": 42});
        assert!(validate(&json!({}), &schema).is_err());
    }
}
