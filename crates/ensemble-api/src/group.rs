//! The `ResourceGroup` document.
//!
//! A resource group declares a new instance kind (its spec/status schemas)
//! and the set of resource templates the kind expands into. Templates may
//! contain `${…}` expressions; the graph builder extracts and validates them.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::meta::GroupVersionKind;

/// A user-authored resource group document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ResourceGroupSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResourceGroupStatus>,
}

impl ResourceGroup {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The kind this group synthesizes.
    pub fn instance_gvk(&self) -> GroupVersionKind {
        GroupVersionKind::new(
            crate::GROUP,
            self.spec.schema.api_version.clone(),
            self.spec.schema.kind.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupSpec {
    /// Declaration of the synthesized kind.
    pub schema: SchemaDefinition,
    /// Member resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
}

/// Declared shape of the synthesized kind.
///
/// `spec` is a structural JSON schema document; `status` is a template whose
/// string fields may hold expressions projected into instance status once
/// every member resource is ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

/// One member of a group: a unique identifier plus a typed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: String,
    pub template: Value,
}

/// Status written back by the outer group reconciler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topological_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
