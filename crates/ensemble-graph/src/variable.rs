//! Expression-bearing fields and their resolved classification.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::JSONSchemaProps;

use crate::schema::ExpectedType;

/// One field of a template that carries expressions.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Canonical path from the template root, see [`crate::path`].
    pub path: String,
    /// Extracted expression bodies, in declaration order.
    pub expressions: Vec<String>,
    /// Declared type of the field.
    pub expected_type: ExpectedType,
    /// Sub-schema governing the field; recorded for standalone expressions,
    /// whose result replaces the whole field value.
    pub expected_schema: Option<JSONSchemaProps>,
    /// True when the whole field value is a single expression. A standalone
    /// expression may change the field's type; an embedded one is forced
    /// through string coercion.
    pub standalone: bool,
}

/// Resolution of a field: does it need sibling resource state?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Resolvable from the instance document alone.
    Static,
    /// Depends on the runtime state of sibling resources.
    Dynamic,
}

/// A field descriptor with its classification and dependency edges.
#[derive(Debug, Clone)]
pub struct ResourceField {
    pub descriptor: FieldDescriptor,
    pub kind: VariableKind,
    /// Resource ids this field reads, in first-reference order.
    pub dependencies: Vec<String>,
}

impl ResourceField {
    pub fn is_static(&self) -> bool {
        self.kind == VariableKind::Static
    }
}
