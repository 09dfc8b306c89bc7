//! Filesystem-change triggers for discovery passes.
//!
//! Watches the raw root (recursively, so a new `raw.log` inside an instance
//! directory counts) and the output root (its direct children only). Any
//! create, remove or rename wakes the control loop. Bursts collapse into one
//! pending trigger: the channel holds a single slot and extra events are
//! dropped while a pass is already queued.
//!
//! The periodic scan in `main` still runs; events only make passes happen
//! sooner.

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ShipperConfig;

/// `true` for events that can change which instances are ready or obsolete.
pub fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

/// Owns the underlying watcher; dropping it stops the triggers.
pub struct TriggerWatcher {
    _watcher: RecommendedWatcher,
}

impl TriggerWatcher {
    /// Start watching both roots of `config`.
    ///
    /// Returns the watcher and the receiving end of the trigger channel.
    pub fn start(config: &ShipperConfig) -> notify::Result<(Self, mpsc::Receiver<()>)> {
        let (tx, rx) = mpsc::channel(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !is_relevant(&event.kind) {
                        return;
                    }
                    debug!(kind = ?event.kind, paths = ?event.paths, "filesystem change");
                    // Full means a pass is already pending.
                    let _ = tx.try_send(());
                }
                Err(e) => {
                    warn!(error = %e, "filesystem watch error");
                }
            }
        })?;

        watcher.watch(&config.raw_root, RecursiveMode::Recursive)?;
        watcher.watch(&config.output_root, RecursiveMode::NonRecursive)?;
        info!(
            raw_root = %config.raw_root.display(),
            output_root = %config.output_root.display(),
            "watching for instance changes"
        );

        Ok((Self { _watcher: watcher }, rx))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind, RenameMode};

    use super::*;

    #[test]
    fn relevant_event_kinds() {
        assert!(is_relevant(&EventKind::Create(CreateKind::Folder)));
        assert!(is_relevant(&EventKind::Remove(RemoveKind::Folder)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Name(RenameMode::To))));
        assert!(!is_relevant(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Any)));
    }

    #[tokio::test]
    async fn new_instance_directory_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShipperConfig::new(dir.path().join("vms"), dir.path().join("pods"));
        std::fs::create_dir_all(&config.raw_root).unwrap();
        std::fs::create_dir_all(&config.output_root).unwrap();

        let (_watcher, mut triggers) = TriggerWatcher::start(&config).unwrap();

        std::fs::create_dir(config.output_dir("vm-a")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), triggers.recv())
            .await
            .expect("trigger should fire")
            .expect("channel open");
    }

    #[test]
    fn missing_root_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShipperConfig::new(dir.path().join("absent"), dir.path().join("pods"));
        assert!(TriggerWatcher::start(&config).is_err());
    }
}
