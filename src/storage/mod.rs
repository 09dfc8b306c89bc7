//! Image and volume storage seam shared with the rest of the host.
//!
//! The log shipper does not depend on anything here. This module carries the
//! small surface other host components use: resolving an image reference to
//! the name of the volume that holds it, and basic volume CRUD behind the
//! [`VolumeStore`] trait.

use std::path::{Path, PathBuf};

pub mod image;
pub mod volume;

// ---------------------------------------------------------------------------
// Shared types used across submodules
// ---------------------------------------------------------------------------

/// A stored volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    /// Backing file on the host.
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// CRUD over named volumes.
pub trait VolumeStore {
    /// Create volume `name` with the contents of `source`. Fails if it exists.
    fn create_from_file(&self, source: &Path, name: &str) -> anyhow::Result<VolumeInfo>;

    fn lookup(&self, name: &str) -> anyhow::Result<Option<VolumeInfo>>;

    /// All volumes, sorted by name.
    fn list(&self) -> anyhow::Result<Vec<VolumeInfo>>;

    /// Delete volume `name`. Fails if it does not exist.
    fn remove(&self, name: &str) -> anyhow::Result<()>;
}

/// Brings an image to a local file so it can be imported as a volume.
/// Transport is up to the host.
pub trait ImageFetcher {
    fn fetch(&self, image: &str, volume_name: &str) -> anyhow::Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use image::{ImageNameError, ImageTool, image_name_to_volume_name, strip_tag};
pub use volume::DirVolumeStore;
