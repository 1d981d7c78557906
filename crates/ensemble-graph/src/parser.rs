//! Expression extraction (schema-guided template walk).
//!
//! A depth-first walk over a decoded template, carrying the current schema
//! and path. String fields are tested for `${…}` expressions; scalar fields
//! are type-checked against the schema; free-form (`any`) subtrees and
//! subtrees preserving unknown fields are recorded opaquely with no
//! extraction. The walk validates as it goes and stops at the first error.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::path;
use crate::schema::{
    self, expected_type, field_schema, item_schema, ExpectedType, FieldSchema,
};
use crate::variable::FieldDescriptor;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::JSONSchemaProps;

/// Extract the expression-bearing fields of a template.
pub fn parse_resource(
    resource: &Value,
    resource_schema: &JSONSchemaProps,
) -> Result<Vec<FieldDescriptor>> {
    let mut descriptors = Vec::new();
    parse_value(resource, resource_schema, "", &mut descriptors)?;
    Ok(descriptors)
}

fn parse_value(
    value: &Value,
    schema: &JSONSchemaProps,
    path: &str,
    out: &mut Vec<FieldDescriptor>,
) -> Result<()> {
    let expected = expected_type(schema, path)?;
    match value {
        Value::Object(fields) => parse_object(fields, schema, path, expected, out),
        Value::Array(items) => parse_array(items, schema, path, expected, out),
        Value::String(s) => parse_string(s, schema, path, expected, out),
        Value::Null => Ok(()),
        scalar => parse_scalar(scalar, path, expected),
    }
}

fn parse_object(
    fields: &serde_json::Map<String, Value>,
    schema: &JSONSchemaProps,
    path: &str,
    expected: ExpectedType,
    out: &mut Vec<FieldDescriptor>,
) -> Result<()> {
    if expected == ExpectedType::Any {
        // Free-form subtree: contents are opaque.
        return Ok(());
    }
    if expected != ExpectedType::Object && !schema::allows_additional(schema) {
        return Err(Error::Type {
            path: path.to_string(),
            message: format!("expected {expected}, found object"),
        });
    }
    if schema::preserves_unknown_fields(schema) {
        return Ok(());
    }

    for (name, value) in fields {
        let field_path = path::join(path, name);
        match field_schema(schema, name, &field_path)? {
            FieldSchema::Typed(sub) => parse_value(value, sub, &field_path, out)?,
            FieldSchema::Open => {}
        }
    }
    Ok(())
}

fn parse_array(
    items: &[Value],
    schema: &JSONSchemaProps,
    path: &str,
    expected: ExpectedType,
    out: &mut Vec<FieldDescriptor>,
) -> Result<()> {
    if expected == ExpectedType::Any {
        return Ok(());
    }
    if expected != ExpectedType::Array {
        return Err(Error::Type {
            path: path.to_string(),
            message: format!("expected {expected}, found array"),
        });
    }
    let item = item_schema(schema, path)?;
    for (i, value) in items.iter().enumerate() {
        parse_value(value, item, &path::join_index(path, i), out)?;
    }
    Ok(())
}

fn parse_string(
    value: &str,
    schema: &JSONSchemaProps,
    path: &str,
    expected: ExpectedType,
    out: &mut Vec<FieldDescriptor>,
) -> Result<()> {
    let wrap = |source| Error::Expression {
        path: path.to_string(),
        source,
    };

    if let Some(body) = ensemble_expr::standalone(value).map_err(wrap)? {
        out.push(FieldDescriptor {
            path: path.to_string(),
            expressions: vec![body],
            expected_type: expected,
            expected_schema: Some(schema.clone()),
            standalone: true,
        });
        return Ok(());
    }

    if !matches!(expected, ExpectedType::String | ExpectedType::Any) {
        return Err(Error::Type {
            path: path.to_string(),
            message: format!("expected {expected}, found string {value:?}"),
        });
    }

    let expressions: Vec<String> = ensemble_expr::scan(value)
        .map_err(wrap)?
        .into_iter()
        .filter_map(|segment| match segment {
            ensemble_expr::Segment::Expression(body) => Some(body),
            ensemble_expr::Segment::Literal(_) => None,
        })
        .collect();
    if !expressions.is_empty() {
        out.push(FieldDescriptor {
            path: path.to_string(),
            expressions,
            expected_type: expected,
            expected_schema: None,
            standalone: false,
        });
    }
    Ok(())
}

fn parse_scalar(value: &Value, path: &str, expected: ExpectedType) -> Result<()> {
    let ok = match expected {
        ExpectedType::Any => true,
        ExpectedType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
        ExpectedType::Number => value.is_number(),
        ExpectedType::Boolean => value.is_boolean(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Type {
            path: path.to_string(),
            message: format!("expected {expected}, found {value}"),
        })
    }
}

/// Extract expressions from an untyped document (the declared status
/// template). Strings are the only expression carriers; standalone
/// expressions may produce any type, embedded ones must render to string.
pub fn parse_untyped(value: &Value, root: &str) -> Result<Vec<FieldDescriptor>> {
    let mut out = Vec::new();
    parse_untyped_value(value, root, &mut out)?;
    Ok(out)
}

fn parse_untyped_value(value: &Value, path: &str, out: &mut Vec<FieldDescriptor>) -> Result<()> {
    match value {
        Value::Object(fields) => {
            for (name, v) in fields {
                parse_untyped_value(v, &path::join(path, name), out)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                parse_untyped_value(v, &path::join_index(path, i), out)?;
            }
            Ok(())
        }
        Value::String(s) => {
            let wrap = |source| Error::Expression {
                path: path.to_string(),
                source,
            };
            if let Some(body) = ensemble_expr::standalone(s).map_err(wrap)? {
                out.push(FieldDescriptor {
                    path: path.to_string(),
                    expressions: vec![body],
                    expected_type: ExpectedType::Any,
                    expected_schema: None,
                    standalone: true,
                });
                return Ok(());
            }
            let expressions: Vec<String> = ensemble_expr::scan(s)
                .map_err(wrap)?
                .into_iter()
                .filter_map(|segment| match segment {
                    ensemble_expr::Segment::Expression(body) => Some(body),
                    ensemble_expr::Segment::Literal(_) => None,
                })
                .collect();
            if !expressions.is_empty() {
                out.push(FieldDescriptor {
                    path: path.to_string(),
                    expressions,
                    expected_type: ExpectedType::String,
                    expected_schema: None,
                    standalone: false,
                });
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(doc: &str) -> JSONSchemaProps {
        serde_yaml::from_str(doc).unwrap()
    }

    fn database_schema() -> JSONSchemaProps {
        schema(
            r#"
type: object
properties:
  apiVersion: {type: string}
  kind: {type: string}
  metadata:
    type: object
    properties:
      name: {type: string}
      namespace: {type: string}
      labels:
        type: object
        additionalProperties: {type: string}
  spec:
    type: object
    properties:
      size: {type: integer}
      engine: {type: string}
      replicas:
        type: array
        items:
          type: object
          properties:
            zone: {type: string}
      overrides:
        type: object
        x-kubernetes-preserve-unknown-fields: true
      extra:
        additionalProperties: true
"#,
        )
    }

    #[test]
    fn document_without_expressions_yields_nothing() {
        let template = json!({
            "apiVersion": "data.example.com/v1",
            "kind": "Database",
            "metadata": {"name": "main"},
            "spec": {"size": 3, "engine": "postgres"},
        });
        let descriptors = parse_resource(&template, &database_schema()).unwrap();
        assert!(descriptors.is_empty());
    }

    #[test]
    fn standalone_keeps_declared_type() {
        let template = json!({"spec": {"size": "${schema.spec.size}"}});
        let descriptors = parse_resource(&template, &database_schema()).unwrap();
        assert_eq!(descriptors.len(), 1);
        let d = &descriptors[0];
        assert_eq!(d.path, "spec.size");
        assert_eq!(d.expected_type, ExpectedType::Integer);
        assert!(d.standalone);
        assert!(d.expected_schema.is_some());
        assert_eq!(d.expressions, vec!["schema.spec.size"]);
    }

    #[test]
    fn embedded_in_integer_field_is_a_type_error() {
        let template = json!({"spec": {"size": "port-${db.status.port}"}});
        let err = parse_resource(&template, &database_schema()).unwrap_err();
        match err {
            Error::Type { path, .. } => assert_eq!(path, "spec.size"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn embedded_in_string_field_extracts_in_order() {
        let template = json!({"spec": {"engine": "${a.x}-${b.y}"}});
        let descriptors = parse_resource(&template, &database_schema()).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert!(!descriptors[0].standalone);
        assert_eq!(descriptors[0].expressions, vec!["a.x", "b.y"]);
    }

    #[test]
    fn arrays_extend_paths_with_indexes() {
        let template = json!({"spec": {"replicas": [{"zone": "${schema.spec.zone}"}]}});
        let descriptors = parse_resource(&template, &database_schema()).unwrap();
        assert_eq!(descriptors[0].path, "spec.replicas[0].zone");
    }

    #[test]
    fn preserve_unknown_subtree_is_opaque() {
        let template = json!({"spec": {"overrides": {"raw": "${db.status.port}"}}});
        let descriptors = parse_resource(&template, &database_schema()).unwrap();
        assert!(descriptors.is_empty());
    }

    #[test]
    fn free_form_subtree_is_opaque() {
        let template = json!({"spec": {"extra": {"nested": {"x": "${db.status.port}"}}}});
        let descriptors = parse_resource(&template, &database_schema()).unwrap();
        assert!(descriptors.is_empty());
    }

    #[test]
    fn scalar_type_mismatch_cites_path() {
        let template = json!({"spec": {"size": true}});
        let err = parse_resource(&template, &database_schema()).unwrap_err();
        assert!(err.to_string().contains("spec.size"));
    }

    #[test]
    fn unknown_field_is_a_schema_error() {
        let template = json!({"spec": {"unknownField": 1}});
        let err = parse_resource(&template, &database_schema()).unwrap_err();
        assert!(err.to_string().contains("unknownField"));
    }

    #[test]
    fn untyped_walk_extracts_status_expressions() {
        let status = json!({
            "endpoint": "${db.status.endpoint}",
            "url": "https://${web.status.host}/",
            "fixed": "plain",
        });
        let descriptors = parse_untyped(&status, "status").unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].path, "status.endpoint");
        assert!(descriptors[0].standalone);
        assert_eq!(descriptors[1].path, "status.url");
        assert!(!descriptors[1].standalone);
    }
}
