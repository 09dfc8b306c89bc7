//! Per-instance tail worker.
//!
//! A worker is started in two steps. [`TailWorker::start`] opens both files
//! and registers the worker's stop signal; any failure there is fatal to this
//! worker only and leaves the registry untouched. [`TailWorker::run`] is the
//! long-lived loop that moves lines from the raw log to the structured log
//! until the stream ends, an append fails, or a stop is signalled.
//!
//! Every record is flushed and synced before the next line is read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::InstanceId;
use super::convert::convert_line;
use super::follow::LineFollower;
use super::registry::{WorkerHandle, WorkerRegistry};

/// Why a worker's run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The stop signal fired (or its sender went away).
    Stopped,
    /// The raw input file was removed.
    EndOfStream,
    /// Reading the raw input failed.
    ReadFailed,
    /// Appending to the structured output failed.
    WriteFailed,
}

/// Removes the worker's registry entry when dropped, on every exit path.
struct Registration {
    registry: WorkerRegistry,
    instance_id: InstanceId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.instance_id);
        debug!(instance = %self.instance_id, "worker unregistered");
    }
}

pub struct TailWorker {
    instance_id: InstanceId,
    follower: LineFollower,
    output: File,
    output_path: PathBuf,
    stop_rx: oneshot::Receiver<()>,
    // Declared last so the output handle is closed before the entry goes away.
    _registration: Registration,
}

impl TailWorker {
    /// Open the output for append (creating it empty if absent), start
    /// following the input at its end, and register under `instance_id`.
    pub async fn start(
        instance_id: impl Into<InstanceId>,
        input_path: &Path,
        output_path: &Path,
        poll_interval: Duration,
        registry: &WorkerRegistry,
    ) -> anyhow::Result<Self> {
        let instance_id = instance_id.into();

        let output = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_path)
            .await
            .with_context(|| format!("open output file {}", output_path.display()))?;

        let follower = LineFollower::open(input_path, poll_interval).await?;

        let (handle, stop_rx) = WorkerHandle::new(instance_id.clone());
        registry.register(handle)?;

        info!(
            instance = %instance_id,
            input = %input_path.display(),
            output = %output_path.display(),
            "worker started"
        );

        Ok(Self {
            _registration: Registration {
                registry: registry.clone(),
                instance_id: instance_id.clone(),
            },
            instance_id,
            follower,
            output,
            output_path: output_path.to_path_buf(),
            stop_rx,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Run the worker on its own tokio task.
    pub fn spawn(self) -> JoinHandle<ExitReason> {
        tokio::spawn(self.run())
    }

    /// Ship lines until stopped. Unregisters on return.
    pub async fn run(mut self) -> ExitReason {
        let mut shipped: u64 = 0;

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = &mut self.stop_rx => break ExitReason::Stopped,
                next = self.follower.next_line() => next,
            };

            match next {
                Ok(Some(raw)) => {
                    let record = convert_line(&raw, Utc::now());
                    if let Err(e) = self.append(&record).await {
                        error!(
                            instance = %self.instance_id,
                            output = %self.output_path.display(),
                            error = %e,
                            "append failed; stopping worker"
                        );
                        break ExitReason::WriteFailed;
                    }
                    shipped += 1;
                }
                Ok(None) => break ExitReason::EndOfStream,
                Err(e) => {
                    warn!(
                        instance = %self.instance_id,
                        input = %self.follower.path().display(),
                        error = %e,
                        "read failed; stopping worker"
                    );
                    break ExitReason::ReadFailed;
                }
            }
        };

        info!(
            instance = %self.instance_id,
            reason = ?reason,
            records = shipped,
            "worker stopped"
        );
        reason
    }

    async fn append(&mut self, record: &str) -> std::io::Result<()> {
        self.output.write_all(record.as_bytes()).await?;
        self.output.flush().await?;
        self.output.sync_data().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
