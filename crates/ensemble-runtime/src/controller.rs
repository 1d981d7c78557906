//! Dynamic controller.
//!
//! Opens and closes watches on kinds discovered at runtime, without a
//! process restart. Each registered kind owns a watch task feeding an
//! informer store and a work queue, a resync timer, and a pool of reconcile
//! workers. Per `(kind, namespace, name)` at most one reconcile runs at a
//! time; distinct keys reconcile in parallel up to the worker count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use ensemble_api::{unstructured, GroupVersionKind, ObjectRef};
use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::handler::{ReconcileError, ReconcileHandler};
use crate::platform::{PlatformClient, PlatformError, WatchEvent};
use crate::queue::{QueueStats, WorkQueue};

type Store = Arc<RwLock<HashMap<ObjectRef, Value>>>;

struct KindEntry {
    queue: Arc<WorkQueue<ObjectRef>>,
    store: Store,
    stop: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

/// Watch multiplexer and reconcile dispatcher for runtime-registered kinds.
pub struct DynamicController {
    client: Arc<dyn PlatformClient>,
    config: Config,
    kinds: Mutex<IndexMap<GroupVersionKind, Arc<KindEntry>>>,
}

impl DynamicController {
    pub fn new(client: Arc<dyn PlatformClient>, config: Config) -> Self {
        Self {
            client,
            config,
            kinds: Mutex::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start watching a kind and dispatching its events to `handler`.
    /// Registering an already-registered kind is a no-op.
    pub async fn register_kind(
        &self,
        gvk: GroupVersionKind,
        handler: Arc<dyn ReconcileHandler>,
    ) -> Result<(), PlatformError> {
        let mut kinds = self.kinds.lock().await;
        if kinds.contains_key(&gvk) {
            debug!(kind = %gvk, "kind already registered");
            return Ok(());
        }

        let events = self.client.watch(&gvk).await?;
        let queue = Arc::new(WorkQueue::new(self.config.queue_max_retries));
        let store: Store = Arc::new(RwLock::new(HashMap::new()));
        let (stop, _) = watch::channel(false);

        let mut tasks = Vec::with_capacity(self.config.workers.max(1) + 2);
        tasks.push(tokio::spawn(watch_loop(
            gvk.clone(),
            events,
            store.clone(),
            queue.clone(),
            stop.subscribe(),
        )));
        tasks.push(tokio::spawn(resync_loop(
            gvk.clone(),
            self.config.resync_period,
            store.clone(),
            queue.clone(),
            stop.subscribe(),
        )));
        for worker in 0..self.config.workers.max(1) {
            tasks.push(tokio::spawn(worker_loop(
                gvk.clone(),
                worker,
                queue.clone(),
                handler.clone(),
            )));
        }

        info!(kind = %gvk, workers = self.config.workers.max(1), "kind registered");
        kinds.insert(
            gvk,
            Arc::new(KindEntry {
                queue,
                store,
                stop,
                tasks: StdMutex::new(tasks),
            }),
        );
        Ok(())
    }

    /// Stop the kind's informer, shut its queue, and reclaim its workers
    /// within the shutdown timeout. Unregistering an unknown kind is a
    /// no-op; a later `register_kind` for the same kind starts fresh.
    pub async fn unregister_kind(&self, gvk: &GroupVersionKind) {
        let Some(entry) = self.kinds.lock().await.shift_remove(gvk) else {
            return;
        };
        info!(kind = %gvk, "unregistering kind");
        let _ = entry.stop.send(true);
        entry.queue.shutdown();

        let mut tasks = std::mem::take(&mut *entry.tasks.lock().unwrap());
        if timeout(self.config.shutdown_timeout, join_all(tasks.iter_mut()))
            .await
            .is_err()
        {
            warn!(kind = %gvk, "shutdown timeout exceeded, abandoning workers");
            for task in &tasks {
                task.abort();
            }
        }
        info!(kind = %gvk, "kind unregistered");
    }

    /// Route a work item to a registered kind's queue. Returns false when
    /// the kind is not registered.
    pub async fn enqueue(&self, gvk: &GroupVersionKind, key: ObjectRef) -> bool {
        let kinds = self.kinds.lock().await;
        match kinds.get(gvk) {
            Some(entry) => {
                entry.queue.add(key);
                true
            }
            None => false,
        }
    }

    pub async fn registered_kinds(&self) -> Vec<GroupVersionKind> {
        self.kinds.lock().await.keys().cloned().collect()
    }

    pub async fn queue_stats(&self, gvk: &GroupVersionKind) -> Option<QueueStats> {
        let kinds = self.kinds.lock().await;
        kinds.get(gvk).map(|entry| entry.queue.stats())
    }

    /// Keys currently in a kind's informer cache. Snapshots are eventually
    /// consistent with the platform.
    pub async fn cached_keys(&self, gvk: &GroupVersionKind) -> Option<Vec<ObjectRef>> {
        let kinds = self.kinds.lock().await;
        kinds
            .get(gvk)
            .map(|entry| entry.store.read().unwrap().keys().cloned().collect())
    }

    /// Block until the shutdown signal, then tear down every kind
    /// concurrently, each bounded by the shutdown timeout.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("dynamic controller started");
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        info!("shutdown signal received");
        let gvks = self.registered_kinds().await;
        join_all(gvks.iter().map(|gvk| self.unregister_kind(gvk))).await;
        info!("dynamic controller stopped");
    }
}

async fn watch_loop(
    gvk: GroupVersionKind,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    store: Store,
    queue: Arc<WorkQueue<ObjectRef>>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(WatchEvent::Applied(object)) => {
                    let Some(key) = unstructured::object_ref(&object) else {
                        warn!(kind = %gvk, "dropping nameless object from watch");
                        continue;
                    };
                    trace!(kind = %gvk, key = %key, "observed apply");
                    store.write().unwrap().insert(key.clone(), object);
                    queue.add(key);
                }
                Some(WatchEvent::Deleted(object)) => {
                    let Some(key) = unstructured::object_ref(&object) else {
                        continue;
                    };
                    trace!(kind = %gvk, key = %key, "observed delete");
                    store.write().unwrap().remove(&key);
                    queue.add(key);
                }
                None => {
                    warn!(kind = %gvk, "watch stream closed");
                    break;
                }
            },
        }
    }
    debug!(kind = %gvk, "watch loop exited");
}

async fn resync_loop(
    gvk: GroupVersionKind,
    period: std::time::Duration,
    store: Store,
    queue: Arc<WorkQueue<ObjectRef>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let keys: Vec<ObjectRef> = store.read().unwrap().keys().cloned().collect();
                debug!(kind = %gvk, objects = keys.len(), "resync");
                for key in keys {
                    queue.add(key);
                }
            }
        }
    }
}

async fn worker_loop(
    gvk: GroupVersionKind,
    worker: usize,
    queue: Arc<WorkQueue<ObjectRef>>,
    handler: Arc<dyn ReconcileHandler>,
) {
    while let Some(item) = queue.next().await {
        trace!(kind = %gvk, worker, key = %item, "reconcile start");
        match handler.reconcile(item.clone()).await {
            Ok(()) => {
                queue.forget(&item);
                trace!(kind = %gvk, key = %item, "reconcile done");
            }
            Err(ReconcileError::RequeueAfter { after, reason }) => {
                debug!(kind = %gvk, key = %item, ?after, reason = %reason, "requeue");
                schedule(queue.clone(), item.clone(), after);
            }
            Err(ReconcileError::Transient(err)) => match queue.next_delay(&item) {
                Some(delay) => {
                    warn!(kind = %gvk, key = %item, %err, ?delay, "reconcile failed, will retry");
                    schedule(queue.clone(), item.clone(), delay);
                }
                None => {
                    error!(kind = %gvk, key = %item, %err, "reconcile failed, retries exhausted");
                    handler.on_drop(item.clone()).await;
                }
            },
            Err(ReconcileError::Terminal(message)) => {
                error!(kind = %gvk, key = %item, message = %message, "reconcile failed terminally");
                queue.forget(&item);
            }
        }
        queue.done(&item);
    }
    debug!(kind = %gvk, worker, "worker exited");
}

fn schedule(queue: Arc<WorkQueue<ObjectRef>>, item: ObjectRef, delay: std::time::Duration) {
    tokio::spawn(async move {
        sleep(delay).await;
        queue.add(item);
    });
}
