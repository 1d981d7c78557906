//! Plan registry.
//!
//! Process-wide mapping from instance kind to its published execution
//! plan. Single writer (the group reconciler), many readers (workers).
//! Plans are immutable once published; publication swaps the `Arc` for a
//! kind in one step, so a reader sees a fully published plan or none.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ensemble_api::GroupVersionKind;
use ensemble_graph::Graph;
use tracing::info;

#[derive(Default)]
pub struct Registry {
    plans: RwLock<HashMap<GroupVersionKind, Arc<Graph>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a plan, replacing any previous one for the kind.
    pub fn publish(&self, graph: Graph) {
        let gvk = graph.instance_gvk.clone();
        info!(kind = %gvk, group = %graph.group_name, "plan published");
        self.plans.write().unwrap().insert(gvk, Arc::new(graph));
    }

    pub fn get(&self, gvk: &GroupVersionKind) -> Option<Arc<Graph>> {
        self.plans.read().unwrap().get(gvk).cloned()
    }

    pub fn remove(&self, gvk: &GroupVersionKind) -> Option<Arc<Graph>> {
        let removed = self.plans.write().unwrap().remove(gvk);
        if removed.is_some() {
            info!(kind = %gvk, "plan removed");
        }
        removed
    }

    pub fn kinds(&self) -> Vec<GroupVersionKind> {
        self.plans.read().unwrap().keys().cloned().collect()
    }

    pub fn graphs(&self) -> Vec<Arc<Graph>> {
        self.plans.read().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_api::{ResourceGroup, ResourceGroupSpec, SchemaDefinition};
    use ensemble_graph::{Builder, StaticSchemaResolver};

    fn empty_graph(kind: &str) -> Graph {
        let group = ResourceGroup {
            api_version: "ensemble.dev/v1alpha1".to_string(),
            kind: "ResourceGroup".to_string(),
            metadata: Default::default(),
            spec: ResourceGroupSpec {
                schema: SchemaDefinition {
                    api_version: "v1".to_string(),
                    kind: kind.to_string(),
                    spec: serde_json::Value::Null,
                    status: None,
                },
                resources: Vec::new(),
            },
            status: None,
        };
        Builder::new(Arc::new(StaticSchemaResolver::new()))
            .build(&group)
            .unwrap()
    }

    #[test]
    fn publish_swap_and_remove() {
        let registry = Registry::new();
        let graph = empty_graph("Store");
        let gvk = graph.instance_gvk.clone();

        assert!(registry.get(&gvk).is_none());
        registry.publish(graph);
        let first = registry.get(&gvk).unwrap();

        // Republishing swaps the plan; earlier readers keep their Arc.
        registry.publish(empty_graph("Store"));
        let second = registry.get(&gvk).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        assert!(registry.remove(&gvk).is_some());
        assert!(registry.get(&gvk).is_none());
    }
}
