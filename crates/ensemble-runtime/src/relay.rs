//! Child-event relay.
//!
//! Registered for each child kind a graph materializes. Every event on a
//! child is mapped back to its owning instance through the owner labels and
//! re-enqueued onto the instance kind's queue, which is what resumes a
//! blocked reconcile once upstream status arrives. The controller is held
//! weakly: the relay never keeps the controller alive, and removal is
//! driven top-down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use ensemble_api::{labels, unstructured, GroupVersionKind, ObjectRef};
use tracing::{debug, trace};

use crate::controller::DynamicController;
use crate::handler::{ReconcileError, ReconcileHandler};
use crate::platform::PlatformClient;

pub struct RelayHandler {
    client: Arc<dyn PlatformClient>,
    controller: Weak<DynamicController>,
    child_gvk: GroupVersionKind,
    /// Last known owner per child, so deletion events still reach the
    /// owning instance after the child (and its labels) are gone.
    owners: Mutex<HashMap<ObjectRef, (GroupVersionKind, ObjectRef)>>,
}

impl RelayHandler {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        controller: Weak<DynamicController>,
        child_gvk: GroupVersionKind,
    ) -> Self {
        Self {
            client,
            controller,
            child_gvk,
            owners: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ReconcileHandler for RelayHandler {
    async fn reconcile(&self, key: ObjectRef) -> Result<(), ReconcileError> {
        let Some(controller) = self.controller.upgrade() else {
            return Ok(());
        };

        let owner = match self
            .client
            .get(&self.child_gvk, &key.namespace, &key.name)
            .await?
        {
            Some(child) => {
                let Some(owner) = labels::owner_of(&unstructured::labels(&child)) else {
                    trace!(kind = %self.child_gvk, key = %key, "child has no owner labels");
                    return Ok(());
                };
                self.owners
                    .lock()
                    .unwrap()
                    .insert(key.clone(), owner.clone());
                owner
            }
            None => match self.owners.lock().unwrap().remove(&key) {
                Some(owner) => owner,
                None => return Ok(()),
            },
        };

        let (instance_gvk, instance_key) = owner;
        debug!(
            child = %self.child_gvk,
            key = %key,
            instance = %instance_key,
            "relaying child event to owner"
        );
        controller.enqueue(&instance_gvk, instance_key).await;
        Ok(())
    }
}
