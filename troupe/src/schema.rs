//! Input and output schemas for tools and agents.
//!
//! Tool argument schemas arrive in three shapes: a typed Rust struct (via
//! `schemars`), a raw JSON-Schema value, or a JSON-Schema value paired with
//! a custom predicate validator. [`InputSchema`] normalizes all three into
//! one JSON-Schema representation for the model plus a `validate` entry
//! point for the dispatcher.
//!
//! [`OutputSchema`] plays the same role for an agent's final output: the
//! runner parses the final assistant text against it and surfaces parse
//! failures instead of silently coercing.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ToolError;

/// A predicate validator over JSON arguments.
pub type ValidatorFn = dyn Fn(&Value) -> Result<(), String> + Send + Sync;

/// An input schema: a semantic contract over tool arguments.
///
/// Whatever the source shape, `as_json_schema` yields the model-ready
/// JSON-Schema form and `validate` applies the contract.
#[derive(Clone)]
pub enum InputSchema {
    /// A raw JSON-Schema value; validation is structural (required fields
    /// and property types).
    Json(Value),
    /// A JSON-Schema description for the model plus a custom predicate.
    Validator {
        /// JSON-Schema shown to the model.
        schema: Value,
        /// Predicate applied to incoming arguments.
        validate: Arc<ValidatorFn>,
    },
}

impl InputSchema {
    /// Schema derived from a typed argument struct.
    ///
    /// Validation deserializes the arguments into `T`, so the contract is
    /// exactly "parses as `T`".
    #[must_use]
    pub fn typed<T>() -> Self
    where
        T: schemars::JsonSchema + DeserializeOwned + 'static,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| Value::Object(Map::new()));
        Self::Validator {
            schema,
            validate: Arc::new(|args| {
                serde_json::from_value::<T>(args.clone())
                    .map(drop)
                    .map_err(|e| e.to_string())
            }),
        }
    }

    /// Schema from a raw JSON-Schema value.
    #[must_use]
    pub const fn json(schema: Value) -> Self {
        Self::Json(schema)
    }

    /// Schema from a JSON-Schema value plus a custom predicate validator.
    pub fn with_validator(
        schema: Value,
        validate: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self::Validator {
            schema,
            validate: Arc::new(validate),
        }
    }

    /// Attach a description to the schema root.
    #[must_use]
    pub fn described(self, description: impl Into<String>) -> Self {
        let describe = |mut schema: Value, text: String| {
            if let Some(obj) = schema.as_object_mut() {
                obj.insert("description".to_owned(), Value::String(text));
            }
            schema
        };
        match self {
            Self::Json(schema) => Self::Json(describe(schema, description.into())),
            Self::Validator { schema, validate } => Self::Validator {
                schema: describe(schema, description.into()),
                validate,
            },
        }
    }

    /// The normalized JSON-Schema form passed to the model.
    #[must_use]
    pub const fn as_json_schema(&self) -> &Value {
        match self {
            Self::Json(schema) | Self::Validator { schema, .. } => schema,
        }
    }

    /// Validate arguments against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidArguments`] when the arguments do not
    /// satisfy the contract.
    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        match self {
            Self::Json(schema) => structural_check(schema, args),
            Self::Validator { validate, .. } => {
                validate(args).map_err(ToolError::InvalidArguments)
            }
        }
    }
}

impl fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(schema) => f.debug_tuple("Json").field(schema).finish(),
            Self::Validator { schema, .. } => f
                .debug_struct("Validator")
                .field("schema", schema)
                .finish_non_exhaustive(),
        }
    }
}

/// Structural conformance check for object schemas: required fields must be
/// present and declared property types must match.
fn structural_check(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };
    if schema_obj.get("type").and_then(Value::as_str) != Some("object") {
        return Ok(());
    }

    let Some(args_obj) = args.as_object() else {
        return Err(ToolError::InvalidArguments(
            "expected a JSON object".to_owned(),
        ));
    };

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(field) {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required field `{field}`"
                )));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        for (field, property) in properties {
            let Some(value) = args_obj.get(field) else {
                continue;
            };
            let Some(expected) = property.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(ToolError::InvalidArguments(format!(
                    "field `{field}` is not of type `{expected}`"
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// A parse function from final assistant text to a structured value.
pub type OutputParseFn = dyn Fn(&str) -> Result<Value, String> + Send + Sync;

/// A schema for an agent's final output.
#[derive(Clone)]
pub struct OutputSchema {
    schema: Value,
    parse: Arc<OutputParseFn>,
}

impl OutputSchema {
    /// Schema derived from a typed output struct.
    #[must_use]
    pub fn typed<T>() -> Self
    where
        T: schemars::JsonSchema + DeserializeOwned + Serialize + 'static,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| Value::Object(Map::new()));
        Self {
            schema,
            parse: Arc::new(|text| {
                let parsed: T = serde_json::from_str(text).map_err(|e| e.to_string())?;
                serde_json::to_value(parsed).map_err(|e| e.to_string())
            }),
        }
    }

    /// Schema from a raw JSON-Schema value; parsing is JSON parse plus the
    /// structural check.
    #[must_use]
    pub fn json(schema: Value) -> Self {
        let check_schema = schema.clone();
        Self {
            schema,
            parse: Arc::new(move |text| {
                let parsed: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
                structural_check(&check_schema, &parsed).map_err(|e| e.to_string())?;
                Ok(parsed)
            }),
        }
    }

    /// The JSON-Schema value describing the output.
    #[must_use]
    pub const fn schema(&self) -> &Value {
        &self.schema
    }

    /// Parse final assistant text against the schema.
    ///
    /// # Errors
    ///
    /// Returns the parse error message when the text does not conform.
    pub fn parse(&self, text: &str) -> Result<Value, String> {
        (self.parse)(text)
    }
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
    struct AddArgs {
        a: f64,
        b: f64,
    }

    mod typed_schema {
        use super::*;

        #[test]
        fn accepts_conforming_args() {
            let schema = InputSchema::typed::<AddArgs>();
            assert!(schema.validate(&json!({"a": 2, "b": 3})).is_ok());
        }

        #[test]
        fn rejects_missing_field() {
            let schema = InputSchema::typed::<AddArgs>();
            let err = schema.validate(&json!({"a": 2})).unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments(_)));
        }

        #[test]
        fn exposes_json_schema_for_model() {
            let schema = InputSchema::typed::<AddArgs>();
            let json = schema.as_json_schema();
            assert!(json.get("properties").is_some());
        }
    }

    mod json_schema {
        use super::*;

        fn city_schema() -> InputSchema {
            InputSchema::json(json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string"},
                    "days": {"type": "integer"}
                },
                "required": ["city"]
            }))
        }

        #[test]
        fn required_field_enforced() {
            let schema = city_schema();
            assert!(schema.validate(&json!({"city": "Oslo"})).is_ok());
            assert!(schema.validate(&json!({"days": 3})).is_err());
        }

        #[test]
        fn property_types_enforced() {
            let schema = city_schema();
            assert!(schema.validate(&json!({"city": 42})).is_err());
            assert!(schema.validate(&json!({"city": "Oslo", "days": 2})).is_ok());
            assert!(
                schema
                    .validate(&json!({"city": "Oslo", "days": 2.5}))
                    .is_err()
            );
        }

        #[test]
        fn non_object_args_rejected() {
            let schema = city_schema();
            assert!(schema.validate(&json!("Oslo")).is_err());
        }

        #[test]
        fn unknown_extra_fields_pass() {
            let schema = city_schema();
            assert!(
                schema
                    .validate(&json!({"city": "Oslo", "units": "metric"}))
                    .is_ok()
            );
        }
    }

    mod custom_validator {
        use super::*;

        #[test]
        fn predicate_is_applied() {
            let schema = InputSchema::with_validator(json!({"type": "object"}), |args| {
                if args.get("path").and_then(Value::as_str).is_some() {
                    Ok(())
                } else {
                    Err("path is required".to_owned())
                }
            });
            assert!(schema.validate(&json!({"path": "/tmp/x"})).is_ok());
            assert!(schema.validate(&json!({})).is_err());
        }

        #[test]
        fn described_sets_root_description() {
            let schema = InputSchema::json(json!({"type": "object"})).described("add two numbers");
            assert_eq!(schema.as_json_schema()["description"], "add two numbers");
        }
    }

    mod output_schema {
        use super::*;

        #[test]
        fn typed_parse_round_trips() {
            let schema = OutputSchema::typed::<AddArgs>();
            let value = schema.parse(r#"{"a": 1, "b": 2}"#).unwrap();
            assert_eq!(value, json!({"a": 1.0, "b": 2.0}));
        }

        #[test]
        fn typed_parse_surfaces_errors() {
            let schema = OutputSchema::typed::<AddArgs>();
            assert!(schema.parse("not json").is_err());
            assert!(schema.parse(r#"{"a": 1}"#).is_err());
        }

        #[test]
        fn json_parse_applies_structural_check() {
            let schema = OutputSchema::json(json!({
                "type": "object",
                "properties": {"verdict": {"type": "string"}},
                "required": ["verdict"]
            }));
            assert!(schema.parse(r#"{"verdict": "ok"}"#).is_ok());
            assert!(schema.parse(r#"{"score": 1}"#).is_err());
        }
    }
}
