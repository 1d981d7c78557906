//! Reconcile handler seam.
//!
//! Kinds are values in a map, not types: the dynamic controller dispatches
//! every work item through this one interface. The error variants carry the
//! requeue policy, so the worker loop and the handlers agree on what
//! happens next without sharing any other state.

use std::time::Duration;

use async_trait::async_trait;
use ensemble_api::ObjectRef;
use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Not failed, just not ready to proceed; try again after the delay
    /// without consuming retry budget.
    #[error("requeue after {after:?}: {reason}")]
    RequeueAfter { after: Duration, reason: String },

    /// Likely to succeed on retry; consumes retry budget with backoff.
    #[error("transient error: {0}")]
    Transient(#[from] PlatformError),

    /// No retry until the user changes something; surfaced on the object.
    #[error("{0}")]
    Terminal(String),
}

impl ReconcileError {
    pub fn requeue_after(after: Duration, reason: impl Into<String>) -> Self {
        ReconcileError::RequeueAfter {
            after,
            reason: reason.into(),
        }
    }
}

/// Per-kind reconcile entry point.
#[async_trait]
pub trait ReconcileHandler: Send + Sync {
    async fn reconcile(&self, key: ObjectRef) -> Result<(), ReconcileError>;

    /// Called once when an item exhausts its retry budget and is dropped
    /// from the queue. Handlers surface this on the object; the default
    /// does nothing.
    async fn on_drop(&self, _key: ObjectRef) {}
}
