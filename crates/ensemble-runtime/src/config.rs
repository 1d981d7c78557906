//! Runtime configuration.

use std::time::Duration;

/// Tunables for the dynamic controller and its platform client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Reconcile workers per registered kind.
    pub workers: usize,
    /// Interval at which every known object of a kind is re-enqueued.
    pub resync_period: Duration,
    /// Retries before a work item is dropped.
    pub queue_max_retries: u32,
    /// Bound on per-kind teardown, and on total shutdown.
    pub shutdown_timeout: Duration,
    /// Queries per second allowed to the platform client.
    pub client_qps: f32,
    /// Requests buffered above the QPS ceiling.
    pub client_burst: u32,
    /// Whether uninstalling a group may delete its kind definition.
    pub allow_crd_deletion: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 1,
            resync_period: Duration::from_secs(10 * 60 * 60),
            queue_max_retries: 20,
            shutdown_timeout: Duration::from_secs(60),
            client_qps: 100.0,
            client_burst: 150,
            allow_crd_deletion: false,
        }
    }
}
