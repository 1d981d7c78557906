//! Schema synthesis for the instance kind.
//!
//! Builds the custom resource definition served for a group's instances:
//! the user-declared spec schema, a status schema carrying the derived
//! `state` and `conditions` fields on top of the declared status fields,
//! the status subresource, and the standard printer columns.

use std::collections::BTreeMap;

use ensemble_api::GroupVersionKind;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceColumnDefinition, CustomResourceDefinition, CustomResourceDefinitionNames,
    CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, CustomResourceSubresourceStatus,
    CustomResourceSubresources, CustomResourceValidation, JSONSchemaProps, JSONSchemaPropsOrArray,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema;

/// Decode and check the declared spec schema of a group.
///
/// An absent schema becomes a closed empty object. The schema must describe
/// an object and may not preserve unknown fields at the root: instance spec
/// content is always validated.
pub fn instance_spec_schema(declared: &Value) -> Result<JSONSchemaProps> {
    if declared.is_null() {
        return Ok(object_schema(BTreeMap::new()));
    }
    let parsed: JSONSchemaProps = serde_json::from_value(declared.clone())
        .map_err(|err| Error::Definition(format!("spec schema does not parse: {err}")))?;
    if parsed.type_.as_deref() != Some("object") {
        return Err(Error::Definition(
            "spec schema must declare type object".to_string(),
        ));
    }
    if schema::preserves_unknown_fields(&parsed) {
        return Err(Error::Definition(
            "spec schema must not preserve unknown fields".to_string(),
        ));
    }
    Ok(parsed)
}

/// Build the definition of the synthesized kind.
pub fn build_crd(gvk: &GroupVersionKind, spec_schema: JSONSchemaProps) -> CustomResourceDefinition {
    let plural = plural(&gvk.kind);
    CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(format!("{plural}.{}", gvk.group)),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: gvk.group.clone(),
            names: CustomResourceDefinitionNames {
                kind: gvk.kind.clone(),
                list_kind: Some(format!("{}List", gvk.kind)),
                plural: plural.clone(),
                singular: Some(gvk.kind.to_lowercase()),
                ..Default::default()
            },
            scope: "Namespaced".to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: gvk.version.clone(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(root_schema(spec_schema)),
                }),
                subresources: Some(CustomResourceSubresources {
                    status: Some(CustomResourceSubresourceStatus(Default::default())),
                    ..Default::default()
                }),
                additional_printer_columns: Some(printer_columns()),
                ..Default::default()
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn crd_name(gvk: &GroupVersionKind) -> String {
    format!("{}.{}", plural(&gvk.kind), gvk.group)
}

/// Naive pluralization, matching how the kind is exposed to clients.
pub fn plural(kind: &str) -> String {
    format!("{}s", kind.to_lowercase())
}

fn root_schema(spec_schema: JSONSchemaProps) -> JSONSchemaProps {
    object_schema(BTreeMap::from([
        ("apiVersion".to_string(), string_schema()),
        ("kind".to_string(), string_schema()),
        (
            "metadata".to_string(),
            JSONSchemaProps {
                type_: Some("object".to_string()),
                ..Default::default()
            },
        ),
        ("spec".to_string(), spec_schema),
        ("status".to_string(), status_schema()),
    ]))
}

/// The synthesized status schema: `state` plus `conditions`, with unknown
/// fields preserved so declared (expression-derived) status fields pass
/// validation.
fn status_schema() -> JSONSchemaProps {
    let condition = object_schema(BTreeMap::from([
        ("type".to_string(), string_schema()),
        ("status".to_string(), string_schema()),
        ("reason".to_string(), string_schema()),
        ("message".to_string(), string_schema()),
        ("lastTransitionTime".to_string(), string_schema()),
        (
            "observedGeneration".to_string(),
            JSONSchemaProps {
                type_: Some("integer".to_string()),
                ..Default::default()
            },
        ),
    ]));
    let mut status = object_schema(BTreeMap::from([
        ("state".to_string(), string_schema()),
        (
            "conditions".to_string(),
            JSONSchemaProps {
                type_: Some("array".to_string()),
                items: Some(JSONSchemaPropsOrArray::Schema(Box::new(condition))),
                ..Default::default()
            },
        ),
    ]));
    status.x_kubernetes_preserve_unknown_fields = Some(true);
    status
}

fn printer_columns() -> Vec<CustomResourceColumnDefinition> {
    vec![
        CustomResourceColumnDefinition {
            name: "State".to_string(),
            type_: "string".to_string(),
            json_path: ".status.state".to_string(),
            description: Some("The state of the instance".to_string()),
            ..Default::default()
        },
        CustomResourceColumnDefinition {
            name: "Synced".to_string(),
            type_: "string".to_string(),
            json_path: ".status.conditions[?(@.type==\"InstanceSynced\")].status".to_string(),
            description: Some("Whether every member resource is ready".to_string()),
            ..Default::default()
        },
        CustomResourceColumnDefinition {
            name: "Age".to_string(),
            type_: "date".to_string(),
            json_path: ".metadata.creationTimestamp".to_string(),
            description: Some("Age of the instance".to_string()),
            ..Default::default()
        },
    ]
}

fn object_schema(properties: BTreeMap<String, JSONSchemaProps>) -> JSONSchemaProps {
    JSONSchemaProps {
        type_: Some("object".to_string()),
        properties: if properties.is_empty() {
            None
        } else {
            Some(properties)
        },
        ..Default::default()
    }
}

fn string_schema() -> JSONSchemaProps {
    JSONSchemaProps {
        type_: Some("string".to_string()),
        ..Default::default()
    }
}
