//! Schema normalization and argument validation.
//!
//! Callers hand the registry a [`SchemaSource`], which says up front whether the
//! schema is raw JSON Schema or was derived from a Rust type. The registry
//! normalizes it once into a [`NormalizedSchema`] holding both the JSON form
//! (for listings) and a compiled validator (for calls).

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Keywords accepted by strict mode. Covers the validation vocabulary tool
/// schemas use plus the annotations `schemars` emits.
const SUPPORTED_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "$comment",
    "definitions",
    "title",
    "description",
    "default",
    "examples",
    "deprecated",
    "readOnly",
    "writeOnly",
    "nullable",
    "type",
    "enum",
    "const",
    "properties",
    "required",
    "additionalProperties",
    "patternProperties",
    "propertyNames",
    "minProperties",
    "maxProperties",
    "dependentRequired",
    "items",
    "prefixItems",
    "additionalItems",
    "contains",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "pattern",
    "format",
    "contentEncoding",
    "contentMediaType",
    "anyOf",
    "oneOf",
    "allOf",
    "not",
    "if",
    "then",
    "else",
];

const TYPE_NAMES: &[&str] = &[
    "string", "number", "integer", "boolean", "object", "array", "null",
];

/// Errors raised while normalizing a schema or validating data against it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Strict mode found a keyword outside the supported set.
    #[error("unsupported schema keyword `{keyword}` at {path}")]
    UnsupportedKeyword {
        /// JSON pointer-ish path to the offending node.
        path: String,
        /// The keyword.
        keyword: String,
    },

    /// Strict mode found a keyword with the wrong shape.
    #[error("malformed schema at {path}: {reason}")]
    Malformed {
        /// JSON pointer-ish path to the offending node.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The schema could not be compiled into a validator.
    #[error("schema failed to compile: {0}")]
    Compile(String),

    /// Data did not satisfy the schema.
    #[error("{0}")]
    Invalid(String),
}

/// How strictly schemas are checked when they are normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaMode {
    /// Compile failures degrade to an accept-any-object validator and a warning.
    #[default]
    Lenient,
    /// The schema tree is checked keyword by keyword and any problem is an error.
    Strict,
}

/// Where a schema came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    /// A JSON Schema document supplied as-is.
    Json(Value),
    /// A schema generated from a Rust type by `schemars`.
    Builder(Value),
}

impl SchemaSource {
    /// Wraps a raw JSON Schema document.
    #[must_use]
    pub fn json(schema: Value) -> Self {
        Self::Json(schema)
    }

    /// Generates the schema for `T`.
    #[must_use]
    pub fn of<T: JsonSchema>() -> Self {
        let mut value = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| empty_object_schema());
        if let Some(obj) = value.as_object_mut() {
            obj.remove("$schema");
        }
        Self::Builder(value)
    }

    fn into_value(self) -> Value {
        match self {
            Self::Json(value) | Self::Builder(value) => value,
        }
    }
}

impl From<Value> for SchemaSource {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Schema used when a descriptor does not declare one.
#[must_use]
pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[derive(Clone)]
enum Validator {
    Compiled(Arc<jsonschema::Validator>),
    PassThrough,
}

/// A schema in its stored form: JSON for listings, compiled for calls.
#[derive(Clone)]
pub struct NormalizedSchema {
    json_schema: Arc<Value>,
    validator: Validator,
}

impl fmt::Debug for NormalizedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedSchema")
            .field("json_schema", &self.json_schema)
            .field("pass_through", &self.is_pass_through())
            .finish()
    }
}

impl NormalizedSchema {
    /// Returns the JSON form of the schema.
    #[must_use]
    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    /// Returns `true` when compilation failed and the schema accepts any object.
    #[must_use]
    pub fn is_pass_through(&self) -> bool {
        matches!(self.validator, Validator::PassThrough)
    }

    /// Validates `data` against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Invalid`] listing every violation, joined by `; `.
    pub fn validate(&self, data: &Value) -> SchemaResult<()> {
        match &self.validator {
            Validator::Compiled(validator) => {
                if validator.is_valid(data) {
                    return Ok(());
                }
                let errors: Vec<String> =
                    validator.iter_errors(data).map(|e| e.to_string()).collect();
                Err(SchemaError::Invalid(errors.join("; ")))
            }
            Validator::PassThrough if data.is_object() => Ok(()),
            Validator::PassThrough => Err(SchemaError::Invalid("expected an object".into())),
        }
    }
}

/// Normalizes a schema source into its stored form.
///
/// # Errors
///
/// In [`SchemaMode::Strict`], returns the first structural problem found by
/// [`check_strict`] or a [`SchemaError::Compile`]. Lenient mode never fails.
pub fn normalize(source: SchemaSource, mode: SchemaMode) -> SchemaResult<NormalizedSchema> {
    let schema = source.into_value();

    if mode == SchemaMode::Strict {
        check_strict(&schema)?;
    }

    match jsonschema::Validator::new(&schema) {
        Ok(validator) => Ok(NormalizedSchema {
            json_schema: Arc::new(schema),
            validator: Validator::Compiled(Arc::new(validator)),
        }),
        Err(err) if mode == SchemaMode::Strict => Err(SchemaError::Compile(err.to_string())),
        Err(err) => {
            warn!(error = %err, "schema failed to compile; accepting any object");
            Ok(NormalizedSchema {
                json_schema: Arc::new(schema),
                validator: Validator::PassThrough,
            })
        }
    }
}

/// Walks a schema tree and rejects unsupported or malformed keywords.
///
/// The root must be an object schema (a `type`, when present, must be
/// `"object"`), since tool arguments are always JSON objects.
///
/// # Errors
///
/// Returns the first [`SchemaError::UnsupportedKeyword`] or
/// [`SchemaError::Malformed`] encountered.
pub fn check_strict(schema: &Value) -> SchemaResult<()> {
    let Some(root) = schema.as_object() else {
        return Err(malformed("root", "schema must be a JSON object"));
    };
    if let Some(ty) = root.get("type") {
        if ty.as_str() != Some("object") {
            return Err(malformed("root.type", "root schema must have type \"object\""));
        }
    }
    walk(schema, "root")
}

fn walk(node: &Value, path: &str) -> SchemaResult<()> {
    let obj = match node {
        Value::Bool(_) => return Ok(()),
        Value::Object(obj) => obj,
        _ => return Err(malformed(path, "schema must be an object or boolean")),
    };

    for (keyword, value) in obj {
        if !SUPPORTED_KEYWORDS.contains(&keyword.as_str()) {
            return Err(SchemaError::UnsupportedKeyword {
                path: path.to_string(),
                keyword: keyword.clone(),
            });
        }

        let child = format!("{path}.{keyword}");
        match keyword.as_str() {
            "type" => check_type(value, &child)?,
            "required" => {
                let ok = value
                    .as_array()
                    .is_some_and(|items| items.iter().all(Value::is_string));
                if !ok {
                    return Err(malformed(&child, "must be an array of strings"));
                }
            }
            "enum" if !value.is_array() => {
                return Err(malformed(&child, "must be an array"));
            }
            "properties" | "patternProperties" | "$defs" | "definitions" => {
                let Some(map) = value.as_object() else {
                    return Err(malformed(&child, "must be an object of schemas"));
                };
                for (name, sub) in map {
                    walk(sub, &format!("{child}.{name}"))?;
                }
            }
            "items" | "prefixItems" => match value {
                Value::Array(subs) => {
                    for (idx, sub) in subs.iter().enumerate() {
                        walk(sub, &format!("{child}[{idx}]"))?;
                    }
                }
                Value::Object(_) | Value::Bool(_) if keyword == "items" => walk(value, &child)?,
                _ => return Err(malformed(&child, "must be a schema or array of schemas")),
            },
            "anyOf" | "oneOf" | "allOf" => {
                let Some(subs) = value.as_array().filter(|subs| !subs.is_empty()) else {
                    return Err(malformed(&child, "must be a non-empty array of schemas"));
                };
                for (idx, sub) in subs.iter().enumerate() {
                    walk(sub, &format!("{child}[{idx}]"))?;
                }
            }
            "additionalProperties" | "additionalItems" | "not" | "if" | "then" | "else"
            | "contains" | "propertyNames" => walk(value, &child)?,
            _ => {}
        }
    }

    Ok(())
}

fn check_type(value: &Value, path: &str) -> SchemaResult<()> {
    let known = |v: &Value| v.as_str().is_some_and(|name| TYPE_NAMES.contains(&name));
    let ok = match value {
        Value::String(_) => known(value),
        Value::Array(names) => !names.is_empty() && names.iter().all(known),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(malformed(path, "must be a type name or array of type names"))
    }
}

fn malformed(path: &str, reason: &str) -> SchemaError {
    SchemaError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
