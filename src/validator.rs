//! Params schema validation.
//!
//! Each bound method may carry an object-typed JSON Schema constraining its
//! named parameters. The schema is compiled once at bind time and evaluated
//! in all-errors mode at dispatch time, so a single bad request reports every
//! violation at once. Scalar strings are coerced in place to a property's
//! declared type before validation, and the coerced mapping is what the
//! handler's arguments are built from.

use crate::error::{Error, Result};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use std::collections::HashMap;

/// Coercion target for string params, per declared property type.
#[derive(Clone, Copy, Debug)]
enum Coercion {
    Number,
    Integer,
    Boolean,
}

/// A compiled params schema for one bound method.
#[derive(Debug)]
pub(crate) struct ParamsValidator {
    schema: JSONSchema,
    coercions: HashMap<String, Coercion>,
}

impl ParamsValidator {
    /// Compile a params schema against a method's declared parameter names.
    ///
    /// Properties declared `number`, `integer`, or `boolean` are recorded
    /// as coercion targets for [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMethodDefinition`] when the schema is not a JSON
    ///   object.
    /// - [`Error::InvalidValidationDefinition`] when the schema is not
    ///   object-typed, constrains an undeclared parameter, or fails to
    ///   compile.
    pub fn compile(schema: &Value, param_names: &[String]) -> Result<Self> {
        // ---
        let object = schema.as_object().ok_or_else(|| {
            Error::InvalidMethodDefinition("params schema must be a JSON object".into())
        })?;

        if object.get("type").and_then(Value::as_str) != Some("object") {
            return Err(Error::InvalidValidationDefinition(
                "params schema must be object-typed".into(),
            ));
        }

        let mut coercions = HashMap::new();
        if let Some(properties) = object.get("properties").and_then(Value::as_object) {
            for (key, property) in properties {
                if !param_names.iter().any(|name| name == key) {
                    return Err(Error::InvalidValidationDefinition(format!(
                        "schema property {key:?} is not a declared parameter"
                    )));
                }
                let target = match property.get("type").and_then(Value::as_str) {
                    Some("number") => Some(Coercion::Number),
                    Some("integer") => Some(Coercion::Integer),
                    Some("boolean") => Some(Coercion::Boolean),
                    _ => None,
                };
                if let Some(target) = target {
                    coercions.insert(key.clone(), target);
                }
            }
        }

        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|err| Error::InvalidValidationDefinition(err.to_string()))?;

        Ok(Self {
            schema: compiled,
            coercions,
        })
    }

    /// Coerce, then validate a named-params mapping, reporting every
    /// violation.
    ///
    /// A string value for a property declared `number`, `integer`, or
    /// `boolean` is converted in place before validation; a string that
    /// doesn't convert is left as-is and fails the type check.
    pub fn validate(&self, named: &mut Value) -> std::result::Result<(), Vec<String>> {
        // ---
        self.coerce(named);
        match self.schema.validate(named) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors.map(|err| err.to_string()).collect()),
        }
    }

    fn coerce(&self, named: &mut Value) {
        // ---
        let Some(map) = named.as_object_mut() else {
            return;
        };
        for (name, target) in &self.coercions {
            let Some(value) = map.get_mut(name) else {
                continue;
            };
            let Some(text) = value.as_str() else {
                continue;
            };
            if let Some(coerced) = coerce_scalar(text, *target) {
                *value = coerced;
            }
        }
    }
}

fn coerce_scalar(text: &str, target: Coercion) -> Option<Value> {
    // ---
    match target {
        Coercion::Boolean => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        Coercion::Integer => text.parse::<i64>().ok().map(Value::from),
        // Integral strings stay integral; everything else goes through f64.
        Coercion::Number => text.parse::<i64>().ok().map(Value::from).or_else(|| {
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
        }),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compile_rejects_non_object_schema() {
        // ---
        let err = ParamsValidator::compile(&json!("nope"), &names(&["a"])).unwrap_err();
        assert!(matches!(err, Error::InvalidMethodDefinition(_)));
    }

    #[test]
    fn test_compile_rejects_non_object_typed_schema() {
        // ---
        let err = ParamsValidator::compile(&json!({ "type": "array" }), &names(&["a"])).unwrap_err();
        assert!(matches!(err, Error::InvalidValidationDefinition(_)));
    }

    #[test]
    fn test_compile_rejects_undeclared_property() {
        // ---
        let schema = json!({
            "type": "object",
            "properties": { "b": { "type": "number" } }
        });
        let err = ParamsValidator::compile(&schema, &names(&["a"])).unwrap_err();
        assert!(matches!(err, Error::InvalidValidationDefinition(_)));
    }

    #[test]
    fn test_validate_reports_all_violations() {
        // ---
        let schema = json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "string" }
            },
            "required": ["a", "b"]
        });
        let validator = ParamsValidator::compile(&schema, &names(&["a", "b"])).unwrap();

        let mut ok = json!({ "a": 1, "b": "x" });
        assert!(validator.validate(&mut ok).is_ok());

        // "one" doesn't coerce to a number and 2 is not a string.
        let mut bad = json!({ "a": "one", "b": 2 });
        let messages = validator.validate(&mut bad).unwrap_err();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_scalar_strings_coerce_to_declared_types() {
        // ---
        let schema = json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer" },
                "ratio": { "type": "number" },
                "dry_run": { "type": "boolean" }
            }
        });
        let validator =
            ParamsValidator::compile(&schema, &names(&["count", "ratio", "dry_run"])).unwrap();

        let mut params = json!({ "count": "7", "ratio": "2.5", "dry_run": "true" });
        assert!(validator.validate(&mut params).is_ok());
        assert_eq!(params, json!({ "count": 7, "ratio": 2.5, "dry_run": true }));

        // Uncoercible strings are left alone and fail the type check.
        let mut params = json!({ "count": "seven" });
        assert!(validator.validate(&mut params).is_err());
    }
}
