//! Wiring a built graph into the running system.
//!
//! Installation is ordered so readers never observe a half-wired kind: the
//! kind definition first, then the plan, then the instance watch, then the
//! child relays. Uninstallation reverses the order and leaves child kinds
//! still used by other graphs untouched.

use std::sync::Arc;

use ensemble_api::GroupVersionKind;
use ensemble_graph::crd::crd_name;
use ensemble_graph::Graph;
use indexmap::IndexSet;
use tracing::info;

use crate::controller::DynamicController;
use crate::instance::InstanceHandler;
use crate::platform::{PlatformClient, PlatformError};
use crate::registry::Registry;
use crate::relay::RelayHandler;

/// Install a graph: definition, plan, instance watch, child relays.
pub async fn install(
    controller: &Arc<DynamicController>,
    registry: &Arc<Registry>,
    client: &Arc<dyn PlatformClient>,
    graph: Graph,
) -> Result<(), PlatformError> {
    let instance_gvk = graph.instance_gvk.clone();
    let child_kinds = graph.child_kinds();

    client.install_crd(&graph.crd).await?;
    registry.publish(graph);

    let handler = Arc::new(InstanceHandler::new(
        client.clone(),
        registry.clone(),
        instance_gvk.clone(),
    ));
    controller.register_kind(instance_gvk.clone(), handler).await?;

    for child in child_kinds {
        if child == instance_gvk {
            continue;
        }
        let relay = Arc::new(RelayHandler::new(
            client.clone(),
            Arc::downgrade(controller),
            child.clone(),
        ));
        controller.register_kind(child, relay).await?;
    }

    info!(kind = %instance_gvk, "graph installed");
    Ok(())
}

/// Remove a graph: instance watch, plan, orphaned child relays, and (when
/// permitted) the kind definition.
pub async fn uninstall(
    controller: &Arc<DynamicController>,
    registry: &Arc<Registry>,
    client: &Arc<dyn PlatformClient>,
    gvk: &GroupVersionKind,
) -> Result<(), PlatformError> {
    let Some(graph) = registry.remove(gvk) else {
        return Ok(());
    };
    controller.unregister_kind(gvk).await;

    let still_needed: IndexSet<GroupVersionKind> = registry
        .graphs()
        .iter()
        .flat_map(|g| g.child_kinds())
        .collect();
    for child in graph.child_kinds() {
        if child != *gvk && !still_needed.contains(&child) {
            controller.unregister_kind(&child).await;
        }
    }

    if controller.config().allow_crd_deletion {
        client.uninstall_crd(&crd_name(gvk)).await?;
    }
    info!(kind = %gvk, "graph uninstalled");
    Ok(())
}
