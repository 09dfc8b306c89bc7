//! Worker lifecycle controller.
//!
//! [`LogShipper`] has no state of its own beyond the configuration and the
//! registry. Each operation is meant to be called repeatedly from a trigger:
//!
//! - [`LogShipper::spawn_workers`] adds workers for ready instances that lack one;
//! - [`LogShipper::stop_obsolete_workers`] stops workers whose output
//!   directory was removed by the collector;
//! - [`LogShipper::stop_all_workers`] is the shutdown path and waits for drain.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use super::InstanceId;
use super::registry::{RegistryError, WorkerRegistry};
use super::worker::TailWorker;
use crate::config::ShipperConfig;

/// Outcome of one discovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpawnReport {
    /// Instances that got a new worker, in discovery order.
    pub started: Vec<InstanceId>,
    /// Instances that already had a registered worker.
    pub already_running: usize,
    /// Instances without a raw log or without an output directory yet.
    pub not_ready: usize,
    /// Instances whose worker failed during start-up.
    pub failed: usize,
    /// Ready instances left for a later pass because `max_workers` was reached.
    pub deferred: usize,
}

pub struct LogShipper {
    config: Arc<ShipperConfig>,
    registry: WorkerRegistry,
    shutting_down: AtomicBool,
}

impl LogShipper {
    pub fn new(config: ShipperConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: WorkerRegistry::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Start a worker for every ready instance under the raw root that does
    /// not have one yet. Only a failure to list the raw root is returned as an
    /// error; per-instance problems are logged and counted.
    pub async fn spawn_workers(&self) -> anyhow::Result<SpawnReport> {
        let mut report = SpawnReport::default();
        if self.is_shutting_down() {
            debug!("shutdown in progress; not spawning workers");
            return Ok(report);
        }

        let raw_root = &self.config.raw_root;
        let mut entries = tokio::fs::read_dir(raw_root)
            .await
            .with_context(|| format!("list raw log root {}", raw_root.display()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("list raw log root {}", raw_root.display()))?
        {
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if !is_dir {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
                debug!(path = %entry.path().display(), "skipping non UTF-8 instance directory");
                continue;
            };

            if self.registry.contains(&id) {
                report.already_running += 1;
                continue;
            }

            let input = self.config.input_path(&id);
            let output_dir = self.config.output_dir(&id);
            if !is_file(&input).await || !is_dir_path(&output_dir).await {
                debug!(instance = %id, "instance not ready");
                report.not_ready += 1;
                continue;
            }

            if let Some(max) = self.config.max_workers {
                if self.registry.size() >= max {
                    warn!(instance = %id, max_workers = max, "worker limit reached; deferring");
                    report.deferred += 1;
                    continue;
                }
            }

            let started = TailWorker::start(
                id.clone(),
                &input,
                &self.config.output_path(&id),
                self.config.poll_interval(),
                &self.registry,
            )
            .await;

            match started {
                Ok(worker) => {
                    worker.spawn();
                    self.stop_if_shutting_down(&id);
                    report.started.push(id);
                }
                Err(e) if e.downcast_ref::<RegistryError>().is_some() => {
                    error!(instance = %id, error = %e, "worker registration conflict");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(instance = %id, error = %format!("{e:#}"), "failed to start worker");
                    report.failed += 1;
                }
            }
        }

        if !report.started.is_empty() {
            info!(
                started = report.started.len(),
                running = self.registry.size(),
                "spawned workers"
            );
        }
        Ok(report)
    }

    /// Stop a worker that registered after `stop_all_workers` already
    /// signalled everyone else. Returns `true` if it was signalled.
    fn stop_if_shutting_down(&self, id: &str) -> bool {
        if !self.is_shutting_down() {
            return false;
        }
        debug!(instance = %id, "worker started during shutdown; stopping it");
        self.registry.signal_stop(id)
    }

    /// Signal every worker whose output directory no longer exists. Returns
    /// the instances signalled; does not wait for them to exit.
    pub async fn stop_obsolete_workers(&self) -> Vec<InstanceId> {
        let mut stopped = Vec::new();
        for id in self.registry.snapshot_ids() {
            let output_dir = self.config.output_dir(&id);
            match tokio::fs::metadata(&output_dir).await {
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if self.registry.signal_stop(&id) {
                        info!(instance = %id, "output directory removed; stopping worker");
                        stopped.push(id);
                    }
                }
                Err(e) => {
                    warn!(instance = %id, path = %output_dir.display(), error = %e, "cannot stat output directory");
                }
                Ok(_) => {}
            }
        }
        stopped
    }

    /// Signal one worker. Fire-and-forget.
    pub fn stop_worker(&self, id: &str) -> bool {
        self.registry.signal_stop(id)
    }

    /// Signal one worker and wait until it has unregistered.
    pub async fn stop_worker_and_wait(&self, id: &str) {
        self.registry.signal_stop(id);
        self.registry.wait_unregistered(id).await;
    }

    /// Signal every worker and wait until the registry is empty.
    ///
    /// Meant to be called once, at shutdown. Later calls only wait for drain.
    pub async fn stop_all_workers(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!("stop_all_workers called more than once");
        } else {
            let signalled = self.registry.signal_all();
            info!(workers = signalled, "stopping all workers");
        }
        self.registry.wait_drained().await;
        info!("all workers stopped");
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

async fn is_dir_path(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
