//! Group compilation: from a `ResourceGroup` document to an execution plan.

use std::collections::HashMap;
use std::sync::Arc;

use ensemble_api::{GroupVersionKind, ResourceGroup};
use indexmap::{IndexMap, IndexSet};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, JSONSchemaProps,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::crd;
use crate::dag::DependencyGraph;
use crate::error::{Error, Result};
use crate::parser;
use crate::resolver;
use crate::validation;
use crate::variable::ResourceField;

/// Source of schemas for template kinds.
///
/// The platform's discovery endpoint satisfies this in production; tests
/// and offline builds use [`StaticSchemaResolver`].
pub trait SchemaResolver: Send + Sync {
    fn resolve(&self, gvk: &GroupVersionKind) -> Result<JSONSchemaProps>;
}

/// Fixed table of schemas.
#[derive(Debug, Default)]
pub struct StaticSchemaResolver {
    schemas: HashMap<GroupVersionKind, JSONSchemaProps>,
}

impl StaticSchemaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gvk: GroupVersionKind, schema: JSONSchemaProps) -> Self {
        self.schemas.insert(gvk, schema);
        self
    }
}

impl SchemaResolver for StaticSchemaResolver {
    fn resolve(&self, gvk: &GroupVersionKind) -> Result<JSONSchemaProps> {
        self.schemas.get(gvk).cloned().ok_or_else(|| Error::Schema {
            path: gvk.to_string(),
            message: "no schema registered for kind".to_string(),
        })
    }
}

/// Compiles resource groups into execution plans.
pub struct Builder {
    resolver: Arc<dyn SchemaResolver>,
}

/// Immutable execution plan for one group.
///
/// Published to the registry as a whole; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Graph {
    /// Name of the group this plan was built from (weak back-reference).
    pub group_name: String,
    pub instance_gvk: GroupVersionKind,
    pub crd: CustomResourceDefinition,
    /// Members in declaration order.
    pub resources: IndexMap<String, GraphResource>,
    /// Deterministic creation order.
    pub topological_order: Vec<String>,
    /// Declared status document projected into instance status when every
    /// member is ready.
    pub status_template: Option<StatusTemplate>,
}

#[derive(Debug, Clone)]
pub struct GraphResource {
    pub id: String,
    pub gvk: GroupVersionKind,
    pub template: Value,
    /// Expression-bearing fields, classified.
    pub fields: Vec<ResourceField>,
    /// Sibling resources this one reads, in first-reference order.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StatusTemplate {
    pub template: Value,
    pub fields: Vec<ResourceField>,
}

impl Graph {
    pub fn get(&self, id: &str) -> Option<&GraphResource> {
        self.resources.get(id)
    }

    /// Distinct kinds of member resources, in declaration order.
    pub fn child_kinds(&self) -> IndexSet<GroupVersionKind> {
        self.resources.values().map(|r| r.gvk.clone()).collect()
    }
}

impl GraphResource {
    pub fn static_fields(&self) -> impl Iterator<Item = &ResourceField> {
        self.fields.iter().filter(|f| f.is_static())
    }

    pub fn dynamic_fields(&self) -> impl Iterator<Item = &ResourceField> {
        self.fields.iter().filter(|f| !f.is_static())
    }
}

impl Builder {
    pub fn new(resolver: Arc<dyn SchemaResolver>) -> Self {
        Self { resolver }
    }

    /// Run the full pipeline: naming validation, per-template extraction,
    /// reference resolution, dependency ordering, schema synthesis.
    pub fn build(&self, group: &ResourceGroup) -> Result<Graph> {
        validation::validate_naming(group)?;

        let ids: IndexSet<String> = group
            .spec
            .resources
            .iter()
            .map(|r| r.id.clone())
            .collect();
        let env = resolver::environment(&ids);

        let mut graph_resources: IndexMap<String, GraphResource> = IndexMap::new();
        let mut dag = DependencyGraph::new();
        for resource in &group.spec.resources {
            dag.add_node(&resource.id)?;
        }

        for resource in &group.spec.resources {
            let id = &resource.id;
            let gvk = validation::validate_template(id, &resource.template)?;
            let template_schema = self.resolver.resolve(&gvk)?;
            let descriptors = parser::parse_resource(&resource.template, &template_schema)?;
            let fields = resolver::resolve_fields(descriptors, &env, &ids)?;

            // A resource is located by name during teardown, before any
            // sibling exists; its identity may not depend on one.
            for field in &fields {
                if !field.is_static() && is_metadata_path(&field.descriptor.path) {
                    return Err(Error::Template {
                        id: id.clone(),
                        message: format!(
                            "metadata field {:?} must not depend on sibling resources",
                            field.descriptor.path
                        ),
                    });
                }
            }

            let mut dependencies: IndexSet<String> = IndexSet::new();
            for field in &fields {
                for dep in &field.dependencies {
                    dependencies.insert(dep.clone());
                    dag.add_dependency(id, dep)?;
                }
            }
            debug!(
                resource = %id,
                kind = %gvk,
                fields = fields.len(),
                dependencies = dependencies.len(),
                "resource analyzed"
            );
            graph_resources.insert(
                id.clone(),
                GraphResource {
                    id: id.clone(),
                    gvk,
                    template: resource.template.clone(),
                    fields,
                    dependencies: dependencies.into_iter().collect(),
                },
            );
        }

        let topological_order = dag.topological_sort()?;

        let status_template = match &group.spec.schema.status {
            Some(template) if !template.is_null() => {
                // Paths are relative to the status document itself; the
                // runtime renders into a clone of this template.
                let descriptors = parser::parse_untyped(template, "")?;
                let fields = resolver::resolve_fields(descriptors, &env, &ids)?;
                Some(StatusTemplate {
                    template: template.clone(),
                    fields,
                })
            }
            _ => None,
        };

        let instance_gvk = group.instance_gvk();
        let spec_schema = crd::instance_spec_schema(&group.spec.schema.spec)?;
        let crd = crd::build_crd(&instance_gvk, spec_schema);

        info!(
            group = %group.name(),
            kind = %instance_gvk,
            resources = graph_resources.len(),
            order = ?topological_order,
            "graph built"
        );
        Ok(Graph {
            group_name: group.name().to_string(),
            instance_gvk,
            crd,
            resources: graph_resources,
            topological_order,
            status_template,
        })
    }
}

fn is_metadata_path(path: &str) -> bool {
    path == "metadata" || path.starts_with("metadata.") || path.starts_with("metadata[")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment_like_schema() -> JSONSchemaProps {
        serde_yaml::from_str(
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
  spec:
    type: object
    properties:
      size: {type: integer}
      dsn: {type: string}
      engine: {type: string}
"#,
        )
        .unwrap()
    }

    fn resolver_for(kinds: &[(&str, &str)]) -> Arc<dyn SchemaResolver> {
        let mut resolver = StaticSchemaResolver::new();
        for (api_version, kind) in kinds {
            resolver = resolver.with(
                GroupVersionKind::from_api_version(api_version, *kind),
                deployment_like_schema(),
            );
        }
        Arc::new(resolver)
    }

    fn group_from_yaml(doc: &str) -> ResourceGroup {
        serde_yaml::from_str(doc).unwrap()
    }

    const TWO_TIER: &str = r#"
apiVersion: ensemble.dev/v1alpha1
kind: ResourceGroup
metadata:
  name: webapp
spec:
  schema:
    apiVersion: v1alpha1
    kind: WebApp
    spec:
      type: object
      properties:
        size: {type: integer}
  resources:
    - id: web
      template:
        apiVersion: apps.example.com/v1
        kind: WebServer
        metadata: {name: web}
        spec:
          dsn: "${db.status.endpoint}"
    - id: db
      template:
        apiVersion: data.example.com/v1
        kind: Database
        metadata: {name: db}
        spec:
          size: "${schema.spec.size}"
"#;

    #[test]
    fn forward_reference_orders_db_before_web() {
        let resolver = resolver_for(&[
            ("apps.example.com/v1", "WebServer"),
            ("data.example.com/v1", "Database"),
        ]);
        let graph = Builder::new(resolver)
            .build(&group_from_yaml(TWO_TIER))
            .unwrap();

        assert_eq!(graph.topological_order, vec!["db", "web"]);
        let web = graph.get("web").unwrap();
        assert_eq!(web.dependencies, vec!["db"]);
        assert_eq!(web.dynamic_fields().count(), 1);
        let db = graph.get("db").unwrap();
        assert!(db.fields.iter().all(|f| f.is_static()));
        assert_eq!(
            graph.instance_gvk,
            GroupVersionKind::new("ensemble.dev", "v1alpha1", "WebApp")
        );
        assert_eq!(
            graph.crd.metadata.name.as_deref(),
            Some("webapps.ensemble.dev")
        );
    }

    #[test]
    fn mutual_references_fail_with_cycle_naming_both() {
        let doc = r#"
apiVersion: ensemble.dev/v1alpha1
kind: ResourceGroup
metadata: {name: cyclic}
spec:
  schema:
    apiVersion: v1alpha1
    kind: Cyclic
  resources:
    - id: a
      template:
        apiVersion: apps.example.com/v1
        kind: WebServer
        metadata: {name: a}
        spec:
          dsn: "${b.status.x}"
    - id: b
      template:
        apiVersion: apps.example.com/v1
        kind: WebServer
        metadata: {name: b}
        spec:
          dsn: "${a.status.y}"
"#;
        let resolver = resolver_for(&[("apps.example.com/v1", "WebServer")]);
        let err = Builder::new(resolver)
            .build(&group_from_yaml(doc))
            .unwrap_err();
        match err {
            Error::Cycle { path } => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unresolved_reference_fails() {
        let doc = r#"
apiVersion: ensemble.dev/v1alpha1
kind: ResourceGroup
metadata: {name: dangling}
spec:
  schema:
    apiVersion: v1alpha1
    kind: Dangling
  resources:
    - id: web
      template:
        apiVersion: apps.example.com/v1
        kind: WebServer
        metadata: {name: web}
        spec:
          dsn: "${cache.status.endpoint}"
"#;
        let resolver = resolver_for(&[("apps.example.com/v1", "WebServer")]);
        let err = Builder::new(resolver)
            .build(&group_from_yaml(doc))
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedVariable { .. }));
    }

    #[test]
    fn dynamic_metadata_is_rejected() {
        let doc = r#"
apiVersion: ensemble.dev/v1alpha1
kind: ResourceGroup
metadata: {name: badmeta}
spec:
  schema:
    apiVersion: v1alpha1
    kind: BadMeta
  resources:
    - id: db
      template:
        apiVersion: data.example.com/v1
        kind: Database
        metadata: {name: db}
        spec: {}
    - id: web
      template:
        apiVersion: apps.example.com/v1
        kind: WebServer
        metadata:
          name: "${db.status.endpoint}"
        spec: {}
"#;
        let resolver = resolver_for(&[
            ("apps.example.com/v1", "WebServer"),
            ("data.example.com/v1", "Database"),
        ]);
        let err = Builder::new(resolver)
            .build(&group_from_yaml(doc))
            .unwrap_err();
        match err {
            Error::Template { id, message } => {
                assert_eq!(id, "web");
                assert!(message.contains("metadata.name"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn status_template_fields_resolve_against_resources() {
        let doc = r#"
apiVersion: ensemble.dev/v1alpha1
kind: ResourceGroup
metadata: {name: withstatus}
spec:
  schema:
    apiVersion: v1alpha1
    kind: WithStatus
    status:
      endpoint: "${db.status.endpoint}"
  resources:
    - id: db
      template:
        apiVersion: data.example.com/v1
        kind: Database
        metadata: {name: db}
        spec: {}
"#;
        let resolver = resolver_for(&[("data.example.com/v1", "Database")]);
        let graph = Builder::new(resolver)
            .build(&group_from_yaml(doc))
            .unwrap();
        let status = graph.status_template.unwrap();
        assert_eq!(status.fields.len(), 1);
        assert_eq!(status.fields[0].dependencies, vec!["db"]);
    }

    #[test]
    fn plan_is_stable_under_reparse() {
        let resolver = resolver_for(&[
            ("apps.example.com/v1", "WebServer"),
            ("data.example.com/v1", "Database"),
        ]);
        let builder = Builder::new(resolver);
        let first = builder.build(&group_from_yaml(TWO_TIER)).unwrap();
        let second = builder.build(&group_from_yaml(TWO_TIER)).unwrap();
        assert_eq!(first.topological_order, second.topological_order);
    }
}
