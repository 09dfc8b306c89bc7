//! vmlog-shipper: per-instance console log shipping.
//!
//! Follows the raw serial console log of every guest instance on the host and
//! rewrites each line as a structured record into the per-instance log file a
//! container-log collector reads.
//!
//! The binary in `main.rs` wires these modules to a CLI, a tokio runtime and
//! signal handling; everything else lives here so integration tests can drive
//! it directly.

pub mod config;
pub mod logging;
pub mod shipper;
pub mod storage;
pub mod watcher;

pub use config::ShipperConfig;
pub use shipper::{LogShipper, WorkerRegistry};
