//! In-memory platform for tests and offline runs.
//!
//! Mimics the platform behaviors the engine depends on: apply merges are
//! no-ops when nothing changed (and emit no event), deletion honors
//! finalizers by stamping a deletion timestamp instead of removing, and
//! status written through the status subresource survives later applies
//! that do not carry a status. Optimistic-concurrency failures can be
//! injected to exercise the conflict requeue path.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ensemble_api::{unstructured, GroupVersionKind};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use super::{PlatformClient, PlatformError, WatchEvent};

type Key = (GroupVersionKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    watchers: HashMap<GroupVersionKind, Vec<mpsc::UnboundedSender<WatchEvent>>>,
    crds: BTreeMap<String, CustomResourceDefinition>,
}

/// In-memory [`PlatformClient`].
#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
    uid_counter: AtomicU64,
    pending_apply_conflicts: AtomicU32,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` applies fail with [`PlatformError::Conflict`],
    /// as if a concurrent writer won the race each time.
    pub fn inject_apply_conflicts(&self, count: u32) {
        self.pending_apply_conflicts.store(count, Ordering::SeqCst);
    }

    /// Objects carrying the given label value, any kind.
    pub fn objects_with_label(&self, label: &str, value: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .values()
            .filter(|obj| unstructured::labels(obj).get(label).map(String::as_str) == Some(value))
            .cloned()
            .collect()
    }

    pub fn installed_crds(&self) -> Vec<String> {
        self.state.lock().unwrap().crds.keys().cloned().collect()
    }

    fn notify(state: &mut State, gvk: &GroupVersionKind, event: WatchEvent) {
        if let Some(senders) = state.watchers.get_mut(gvk) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, PlatformError> {
        let key = (gvk.clone(), namespace.to_string(), name.to_string());
        Ok(self.state.lock().unwrap().objects.get(&key).cloned())
    }

    async fn list(&self, gvk: &GroupVersionKind) -> Result<Vec<Value>, PlatformError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|((k, _, _), _)| k == gvk)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn apply(
        &self,
        gvk: &GroupVersionKind,
        object: &Value,
        _field_owner: &str,
    ) -> Result<Value, PlatformError> {
        if self
            .pending_apply_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PlatformError::Conflict(
                "object was modified by a concurrent writer".to_string(),
            ));
        }
        let name = unstructured::name(object)
            .ok_or_else(|| PlatformError::Api("applied object has no name".to_string()))?
            .to_string();
        let namespace = unstructured::namespace(object).unwrap_or_default().to_string();
        let key = (gvk.clone(), namespace, name);

        let mut state = self.state.lock().unwrap();
        let mut incoming = object.clone();
        if let Some(existing) = state.objects.get(&key) {
            carry_over(&mut incoming, existing);
            if *existing == incoming {
                trace!(kind = %gvk, "apply is a no-op");
                return Ok(incoming);
            }
            if unstructured::deletion_timestamp(&incoming).is_some()
                && unstructured::finalizers(&incoming).is_empty()
            {
                state.objects.remove(&key);
                Self::notify(&mut state, gvk, WatchEvent::Deleted(incoming.clone()));
                return Ok(incoming);
            }
        } else {
            let uid = self.uid_counter.fetch_add(1, Ordering::Relaxed);
            if let Some(meta) = incoming
                .get_mut("metadata")
                .and_then(Value::as_object_mut)
            {
                meta.insert("uid".to_string(), Value::String(format!("uid-{uid}")));
                meta.entry("generation".to_string())
                    .or_insert_with(|| Value::Number(1.into()));
            }
        }
        state.objects.insert(key, incoming.clone());
        Self::notify(&mut state, gvk, WatchEvent::Applied(incoming.clone()));
        Ok(incoming)
    }

    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), PlatformError> {
        let key = (gvk.clone(), namespace.to_string(), name.to_string());
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.objects.get_mut(&key) else {
            return Err(PlatformError::Api(format!(
                "cannot patch status of absent object {namespace}/{name}"
            )));
        };
        if existing.get("status") == Some(status) {
            return Ok(());
        }
        existing["status"] = status.clone();
        let updated = existing.clone();
        Self::notify(&mut state, gvk, WatchEvent::Applied(updated));
        Ok(())
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), PlatformError> {
        let key = (gvk.clone(), namespace.to_string(), name.to_string());
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.objects.get_mut(&key) else {
            return Ok(());
        };
        if unstructured::finalizers(existing).is_empty() {
            let gone = state.objects.remove(&key).unwrap();
            Self::notify(&mut state, gvk, WatchEvent::Deleted(gone));
        } else if unstructured::deletion_timestamp(existing).is_none() {
            existing["metadata"]["deletionTimestamp"] =
                Value::String("1970-01-01T00:00:00Z".to_string());
            let updated = existing.clone();
            Self::notify(&mut state, gvk, WatchEvent::Applied(updated));
        }
        Ok(())
    }

    async fn watch(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, PlatformError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        for ((k, _, _), obj) in &state.objects {
            if k == gvk {
                let _ = tx.send(WatchEvent::Applied(obj.clone()));
            }
        }
        state.watchers.entry(gvk.clone()).or_default().push(tx);
        Ok(rx)
    }

    async fn install_crd(&self, crd: &CustomResourceDefinition) -> Result<(), PlatformError> {
        let name = crd
            .metadata
            .name
            .clone()
            .ok_or_else(|| PlatformError::Api("definition has no name".to_string()))?;
        self.state.lock().unwrap().crds.insert(name, crd.clone());
        Ok(())
    }

    async fn uninstall_crd(&self, name: &str) -> Result<(), PlatformError> {
        self.state.lock().unwrap().crds.remove(name);
        Ok(())
    }
}

/// Preserve server-owned fields the caller does not manage: identity
/// metadata and a status written through the status subresource.
fn carry_over(incoming: &mut Value, existing: &Value) {
    for field in ["uid", "generation", "creationTimestamp", "deletionTimestamp"] {
        if let Some(value) = existing.get("metadata").and_then(|m| m.get(field)) {
            if incoming
                .get("metadata")
                .and_then(|m| m.get(field))
                .is_none()
            {
                incoming["metadata"][field] = value.clone();
            }
        }
    }
    if incoming.get("status").is_none() {
        if let Some(status) = existing.get("status") {
            incoming["status"] = status.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("data.example.com", "v1", "Database")
    }

    fn object(name: &str) -> Value {
        json!({
            "apiVersion": "data.example.com/v1",
            "kind": "Database",
            "metadata": {"name": name, "namespace": "default"},
            "spec": {"size": 1},
        })
    }

    #[tokio::test]
    async fn apply_assigns_uid_and_emits_once_per_change() {
        let platform = MemoryPlatform::new();
        let mut events = platform.watch(&gvk()).await.unwrap();

        let applied = platform.apply(&gvk(), &object("db"), "test").await.unwrap();
        assert!(unstructured::uid(&applied).unwrap().starts_with("uid-"));
        assert!(matches!(events.recv().await, Some(WatchEvent::Applied(_))));

        // Identical apply: no event.
        platform.apply(&gvk(), &object("db"), "test").await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn status_survives_spec_only_apply() {
        let platform = MemoryPlatform::new();
        platform.apply(&gvk(), &object("db"), "test").await.unwrap();
        platform
            .patch_status(&gvk(), "default", "db", &json!({"endpoint": "db:5432"}))
            .await
            .unwrap();

        platform.apply(&gvk(), &object("db"), "test").await.unwrap();
        let live = platform.get(&gvk(), "default", "db").await.unwrap().unwrap();
        assert_eq!(live["status"]["endpoint"], json!("db:5432"));
    }

    #[tokio::test]
    async fn delete_honors_finalizers() {
        let platform = MemoryPlatform::new();
        let mut obj = object("db");
        unstructured::add_finalizer(&mut obj, "ensemble.dev/cleanup");
        platform.apply(&gvk(), &obj, "test").await.unwrap();

        platform.delete(&gvk(), "default", "db").await.unwrap();
        let live = platform.get(&gvk(), "default", "db").await.unwrap().unwrap();
        assert!(unstructured::deletion_timestamp(&live).is_some());

        // Removing the finalizer completes the deletion.
        let mut updated = live.clone();
        unstructured::remove_finalizer(&mut updated, "ensemble.dev/cleanup");
        platform.apply(&gvk(), &updated, "test").await.unwrap();
        assert!(platform.get(&gvk(), "default", "db").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_conflicts_fail_then_clear() {
        let platform = MemoryPlatform::new();
        platform.inject_apply_conflicts(1);

        let err = platform
            .apply(&gvk(), &object("db"), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Conflict(_)));
        assert!(err.is_retryable());
        assert!(platform.get(&gvk(), "default", "db").await.unwrap().is_none());

        // The retry goes through once the concurrent writer is gone.
        platform.apply(&gvk(), &object("db"), "test").await.unwrap();
        assert!(platform.get(&gvk(), "default", "db").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn watch_replays_existing_objects() {
        let platform = MemoryPlatform::new();
        platform.apply(&gvk(), &object("db"), "test").await.unwrap();
        let mut events = platform.watch(&gvk()).await.unwrap();
        match events.recv().await {
            Some(WatchEvent::Applied(obj)) => {
                assert_eq!(unstructured::name(&obj), Some("db"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
