//! Naming and structural validation of a resource group.

use ensemble_api::{GroupVersionKind, ResourceGroup};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

static LOWER_CAMEL_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-zA-Z0-9]*$").unwrap());
static UPPER_CAMEL_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][a-zA-Z0-9]*$").unwrap());
static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v\d+(?:(?:alpha|beta)\d+)?$").unwrap());

/// Identifiers a resource may not use.
const RESERVED_IDS: [&str; 25] = [
    "apiVersion",
    "context",
    "dependency",
    "dependencies",
    "externalRef",
    "externalReference",
    "externalRefs",
    "externalReferences",
    "graph",
    "instance",
    "kind",
    "metadata",
    "namespace",
    "object",
    "resource",
    "resourcegroup",
    "resources",
    "runtime",
    "serviceAccountName",
    "spec",
    "status",
    "kro",
    "variables",
    "vars",
    "version",
];

pub fn is_valid_resource_id(id: &str) -> bool {
    LOWER_CAMEL_CASE.is_match(id)
}

pub fn is_valid_kind_name(name: &str) -> bool {
    UPPER_CAMEL_CASE.is_match(name)
}

pub fn is_reserved_id(id: &str) -> bool {
    RESERVED_IDS.contains(&id)
}

pub fn is_valid_version(version: &str) -> bool {
    VERSION.is_match(version)
}

/// Validate the naming conventions of a group: kind name, version, and
/// resource ids (well-formed, unique, not reserved).
pub fn validate_naming(group: &ResourceGroup) -> Result<()> {
    let kind = &group.spec.schema.kind;
    if !is_valid_kind_name(kind) {
        return Err(Error::Naming(format!(
            "kind {kind:?} must be UpperCamelCase"
        )));
    }
    let version = &group.spec.schema.api_version;
    if !is_valid_version(version) {
        return Err(Error::Naming(format!(
            "version {version:?} is not a valid kind version"
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for resource in &group.spec.resources {
        let id = &resource.id;
        if is_reserved_id(id) {
            return Err(Error::ReservedId(id.clone()));
        }
        if !is_valid_resource_id(id) {
            return Err(Error::Naming(format!(
                "id {id:?} must be lowerCamelCase"
            )));
        }
        if !seen.insert(id.clone()) {
            return Err(Error::DuplicateId(id.clone()));
        }
    }
    Ok(())
}

/// Validate that a template is a platform object and return its kind.
///
/// A template must carry a string `apiVersion` (with a well-formed version
/// part when one is present), a string `kind`, and a mapping `metadata`.
pub fn validate_template(id: &str, template: &Value) -> Result<GroupVersionKind> {
    let err = |message: String| Error::Template {
        id: id.to_string(),
        message,
    };

    let api_version = template
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| err("apiVersion field is missing or not a string".to_string()))?;
    let kind = template
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| err("kind field is missing or not a string".to_string()))?;
    if !template
        .get("metadata")
        .map(Value::is_object)
        .unwrap_or(false)
    {
        return Err(err("metadata field is missing or not a mapping".to_string()));
    }

    let gvk = GroupVersionKind::from_api_version(api_version, kind);
    if !gvk.version.is_empty() && !is_valid_version(&gvk.version) {
        return Err(err(format!(
            "apiVersion {api_version:?} does not carry a valid version"
        )));
    }
    Ok(gvk)
}
