//! Schema interpretation helpers.
//!
//! The extractor walks apiextensions `JSONSchemaProps` documents. These
//! helpers answer the questions the walk needs: the single declared type of
//! a node, the schema of a named field, the item schema of an array, and
//! whether a subtree opted out of validation.

use std::fmt;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    JSONSchemaProps, JSONSchemaPropsOrArray, JSONSchemaPropsOrBool,
};

use crate::error::{Error, Result};

/// Declared type of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// Free-form: `additionalProperties` permits arbitrary content.
    Any,
}

impl ExpectedType {
    fn from_declared(declared: &str, path: &str) -> Result<Self> {
        match declared {
            "string" => Ok(ExpectedType::String),
            "integer" => Ok(ExpectedType::Integer),
            "number" => Ok(ExpectedType::Number),
            "boolean" => Ok(ExpectedType::Boolean),
            "object" => Ok(ExpectedType::Object),
            "array" => Ok(ExpectedType::Array),
            other => Err(Error::Schema {
                path: path.to_string(),
                message: format!("unknown declared type {other:?}"),
            }),
        }
    }
}

impl fmt::Display for ExpectedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExpectedType::String => "string",
            ExpectedType::Integer => "integer",
            ExpectedType::Number => "number",
            ExpectedType::Boolean => "boolean",
            ExpectedType::Object => "object",
            ExpectedType::Array => "array",
            ExpectedType::Any => "any",
        };
        f.write_str(s)
    }
}

/// The single declared type of a schema node.
///
/// A node without a `type` falls back to the first `oneOf` alternative (a
/// recorded simplification; typed unions are not modelled). A node with
/// neither, but with permissive `additionalProperties`, is free-form.
pub fn expected_type(schema: &JSONSchemaProps, path: &str) -> Result<ExpectedType> {
    if let Some(declared) = schema.type_.as_deref().filter(|t| !t.is_empty()) {
        return ExpectedType::from_declared(declared, path);
    }
    if let Some(first) = schema.one_of.as_ref().and_then(|alts| alts.first()) {
        if let Some(declared) = first.type_.as_deref().filter(|t| !t.is_empty()) {
            return ExpectedType::from_declared(declared, path);
        }
    }
    if allows_additional(schema) {
        return Ok(ExpectedType::Any);
    }
    Err(Error::Schema {
        path: path.to_string(),
        message: "schema declares no type".to_string(),
    })
}

/// Whether `additionalProperties` permits fields beyond `properties`.
pub fn allows_additional(schema: &JSONSchemaProps) -> bool {
    match &schema.additional_properties {
        Some(JSONSchemaPropsOrBool::Bool(allows)) => *allows,
        Some(JSONSchemaPropsOrBool::Schema(_)) => true,
        None => false,
    }
}

/// Whether the subtree opted out of structural validation.
pub fn preserves_unknown_fields(schema: &JSONSchemaProps) -> bool {
    schema.x_kubernetes_preserve_unknown_fields == Some(true)
}

/// Schema governing a named field of an object node.
#[derive(Debug)]
pub enum FieldSchema<'a> {
    Typed(&'a JSONSchemaProps),
    /// `additionalProperties: true` — contents are opaque.
    Open,
}

pub fn field_schema<'a>(
    schema: &'a JSONSchemaProps,
    field: &str,
    path: &str,
) -> Result<FieldSchema<'a>> {
    if let Some(properties) = &schema.properties {
        if let Some(found) = properties.get(field) {
            return Ok(FieldSchema::Typed(found));
        }
    }
    match &schema.additional_properties {
        Some(JSONSchemaPropsOrBool::Schema(s)) => Ok(FieldSchema::Typed(s)),
        Some(JSONSchemaPropsOrBool::Bool(true)) => Ok(FieldSchema::Open),
        _ => Err(Error::Schema {
            path: path.to_string(),
            message: format!("no schema for field {field:?}"),
        }),
    }
}

/// Item schema of an array node. Per-index item lists are not supported.
pub fn item_schema<'a>(schema: &'a JSONSchemaProps, path: &str) -> Result<&'a JSONSchemaProps> {
    match &schema.items {
        Some(JSONSchemaPropsOrArray::Schema(item)) => Ok(item),
        Some(JSONSchemaPropsOrArray::Schemas(_)) => Err(Error::Schema {
            path: path.to_string(),
            message: "per-index item schemas are not supported".to_string(),
        }),
        None => Err(Error::Schema {
            path: path.to_string(),
            message: "array schema declares no item schema".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_from_yaml(doc: &str) -> JSONSchemaProps {
        serde_yaml::from_str(doc).unwrap()
    }

    #[test]
    fn declared_type_wins() {
        let schema = schema_from_yaml("type: integer");
        assert_eq!(expected_type(&schema, "x").unwrap(), ExpectedType::Integer);
    }

    #[test]
    fn one_of_falls_back_to_first_alternative() {
        let schema = schema_from_yaml(
            r"
oneOf:
  - type: string
  - type: integer
",
        );
        assert_eq!(expected_type(&schema, "x").unwrap(), ExpectedType::String);
    }

    #[test]
    fn permissive_additional_properties_is_any() {
        let schema = schema_from_yaml("additionalProperties: true");
        assert_eq!(expected_type(&schema, "x").unwrap(), ExpectedType::Any);

        let schema = schema_from_yaml("{}");
        assert!(expected_type(&schema, "x").is_err());
    }

    #[test]
    fn field_schema_lookup_order() {
        let schema = schema_from_yaml(
            r"
type: object
properties:
  name:
    type: string
additionalProperties:
  type: integer
",
        );
        assert!(matches!(
            field_schema(&schema, "name", "x").unwrap(),
            FieldSchema::Typed(s) if s.type_.as_deref() == Some("string")
        ));
        assert!(matches!(
            field_schema(&schema, "other", "x").unwrap(),
            FieldSchema::Typed(s) if s.type_.as_deref() == Some("integer")
        ));

        let closed = schema_from_yaml("type: object");
        assert!(field_schema(&closed, "name", "x").is_err());
    }
}
