//! Tailing worker lifecycle management.
//!
//! One [`worker::TailWorker`] per guest instance follows
//! `<raw_root>/<id>/raw.log` and appends converted records to
//! `<output_root>/<id>/_0.log`. The [`controller::LogShipper`] discovers
//! instances, starts missing workers and stops obsolete ones.
//!
//! ```text
//! LogShipper::spawn_workers()
//!     └─► TailWorker::start(id)  ── registers ──►  WorkerRegistry
//!             └─► tokio::spawn(run)
//!                     LineFollower ─► convert_line ─► write + sync
//! LogShipper::stop_obsolete_workers() / stop_all_workers()
//!     └─► WorkerRegistry::signal_stop(id)  ──►  worker exits, unregisters
//! ```

pub mod controller;
pub mod convert;
pub mod follow;
pub mod registry;
pub mod worker;

// ---------------------------------------------------------------------------
// Shared types used across submodules
// ---------------------------------------------------------------------------

/// Identifier of one guest instance. Doubles as its directory name under both
/// the raw-input root and the structured-output root.
pub type InstanceId = String;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use controller::{LogShipper, SpawnReport};
pub use convert::{LogRecord, Stream, convert_line, escape_line};
pub use registry::{RegistryError, WorkerHandle, WorkerInfo, WorkerRegistry};
pub use worker::{ExitReason, TailWorker};
