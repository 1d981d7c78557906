//! Platform client seam.
//!
//! Everything the runtime needs from the orchestration platform, injected
//! as a trait object: unstructured CRUD with server-side apply semantics, a
//! watch stream per kind, and kind (CRD) installation. Network concerns
//! (timeouts, rate limits) belong to the implementation.

pub mod mem;

use async_trait::async_trait;
use ensemble_api::GroupVersionKind;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// Optimistic-concurrency or field-ownership conflict; recovered by
    /// requeue with backoff.
    #[error("apply conflict: {0}")]
    Conflict(String),

    /// Timeout or unreachable endpoint; retried with backoff.
    #[error("transient platform error: {0}")]
    Transient(String),

    /// The platform rejected the request outright.
    #[error("platform error: {0}")]
    Api(String),
}

impl PlatformError {
    /// Whether a retry can reasonably succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Conflict(_) | PlatformError::Transient(_)
        )
    }
}

/// One change observed on a watch.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Object created or updated; also delivered for every existing object
    /// when a watch is opened.
    Applied(Value),
    Deleted(Value),
}

/// Injected platform capabilities.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, PlatformError>;

    async fn list(&self, gvk: &GroupVersionKind) -> Result<Vec<Value>, PlatformError>;

    /// Create or update with server-side semantics under a field owner.
    /// Creates, updates and no-ops are indistinguishable to the caller.
    async fn apply(
        &self,
        gvk: &GroupVersionKind,
        object: &Value,
        field_owner: &str,
    ) -> Result<Value, PlatformError>;

    /// Replace the status subresource.
    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), PlatformError>;

    /// Request deletion. Deleting an absent object is not an error.
    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), PlatformError>;

    /// Open a watch on a kind. The stream starts with a synthetic
    /// [`WatchEvent::Applied`] per existing object.
    async fn watch(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, PlatformError>;

    async fn install_crd(&self, crd: &CustomResourceDefinition) -> Result<(), PlatformError>;

    async fn uninstall_crd(&self, name: &str) -> Result<(), PlatformError>;
}
