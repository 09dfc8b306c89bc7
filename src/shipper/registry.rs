//! Shared map of running tail workers.
//!
//! The registry is the only state touched by both the controller and the
//! workers. Every read and write goes through one mutex; the lock is never
//! held across an `.await`. Each mutation also publishes the new size on a
//! watch channel so shutdown can wait for drain without polling.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use super::InstanceId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a worker is already registered for instance '{0}'")]
    AlreadyRegistered(InstanceId),
}

/// Control handle of one running worker.
///
/// The registry owns the sending half of the stop signal; the worker keeps
/// the receiving half returned by [`WorkerHandle::new`].
#[derive(Debug)]
pub struct WorkerHandle {
    instance_id: InstanceId,
    stop_tx: Option<oneshot::Sender<()>>,
    started_at: DateTime<Utc>,
}

impl WorkerHandle {
    pub fn new(instance_id: impl Into<InstanceId>) -> (Self, oneshot::Receiver<()>) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = Self {
            instance_id: instance_id.into(),
            stop_tx: Some(stop_tx),
            started_at: Utc::now(),
        };
        (handle, stop_rx)
    }

    /// `true` until a stop is signalled or the worker drops its receiver.
    pub fn is_live(&self) -> bool {
        self.stop_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Fire the stop signal. Single use: later calls return `false`.
    pub fn signal_stop(&mut self) -> bool {
        match self.stop_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            instance_id: self.instance_id.clone(),
            started_at: self.started_at,
            live: self.is_live(),
        }
    }
}

/// Point-in-time view of a registered worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub instance_id: InstanceId,
    pub started_at: DateTime<Utc>,
    pub live: bool,
}

struct Inner {
    workers: Mutex<HashMap<InstanceId, WorkerHandle>>,
    size_tx: watch::Sender<usize>,
}

/// Concurrency-safe `InstanceId → WorkerHandle` map. Clones share state.
#[derive(Clone)]
pub struct WorkerRegistry {
    inner: Arc<Inner>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        let (size_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                workers: Mutex::new(HashMap::new()),
                size_tx,
            }),
        }
    }

    /// Insert `handle` under its instance id. Never replaces a live entry.
    pub fn register(&self, handle: WorkerHandle) -> Result<(), RegistryError> {
        let mut workers = self.inner.workers.lock();
        match workers.entry(handle.instance_id.clone()) {
            Entry::Occupied(entry) => Err(RegistryError::AlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(handle);
                self.inner.size_tx.send_replace(workers.len());
                Ok(())
            }
        }
    }

    /// Remove the entry for `id`, if any.
    pub fn unregister(&self, id: &str) -> Option<WorkerHandle> {
        let mut workers = self.inner.workers.lock();
        let removed = workers.remove(id);
        if removed.is_some() {
            self.inner.size_tx.send_replace(workers.len());
        }
        removed
    }

    pub fn lookup(&self, id: &str) -> Option<WorkerInfo> {
        self.inner.workers.lock().get(id).map(WorkerHandle::info)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.workers.lock().contains_key(id)
    }

    /// Copy of the registered ids, safe to iterate while workers come and go.
    pub fn snapshot_ids(&self) -> BTreeSet<InstanceId> {
        self.inner.workers.lock().keys().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Signal one worker to stop. Returns `false` if it is not registered or
    /// was already signalled.
    pub fn signal_stop(&self, id: &str) -> bool {
        self.inner
            .workers
            .lock()
            .get_mut(id)
            .is_some_and(WorkerHandle::signal_stop)
    }

    /// Signal every registered worker; returns how many signals were delivered.
    pub fn signal_all(&self) -> usize {
        self.inner
            .workers
            .lock()
            .values_mut()
            .map(WorkerHandle::signal_stop)
            .filter(|delivered| *delivered)
            .count()
    }

    /// Resolve once no worker is registered.
    pub async fn wait_drained(&self) {
        let mut size_rx = self.inner.size_tx.subscribe();
        loop {
            let size = *size_rx.borrow_and_update();
            if size == 0 {
                return;
            }
            if size_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Resolve once `id` is no longer registered.
    pub async fn wait_unregistered(&self, id: &str) {
        let mut size_rx = self.inner.size_tx.subscribe();
        loop {
            // Mark the current version seen before checking, so a removal
            // racing with the check still wakes `changed()`.
            drop(size_rx.borrow_and_update());
            if !self.contains(id) {
                return;
            }
            if size_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
