//! Directory-backed volume pool: one regular file per volume.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::debug;

use super::{VolumeInfo, VolumeStore};

#[derive(Debug, Clone)]
pub struct DirVolumeStore {
    pool: PathBuf,
}

impl DirVolumeStore {
    /// Open the pool at `pool`, creating the directory if needed.
    pub fn new(pool: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let pool = pool.into();
        std::fs::create_dir_all(&pool)
            .with_context(|| format!("create volume pool {}", pool.display()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Path {
        &self.pool
    }

    fn volume_path(&self, name: &str) -> anyhow::Result<PathBuf> {
        let is_bare = !name.is_empty() && Path::new(name).file_name().is_some_and(|f| f == name);
        if !is_bare {
            bail!("invalid volume name '{name}'");
        }
        Ok(self.pool.join(name))
    }
}

fn info_for(name: &str, path: PathBuf, metadata: &std::fs::Metadata) -> VolumeInfo {
    VolumeInfo {
        name: name.to_string(),
        path,
        size_bytes: metadata.len(),
    }
}

impl VolumeStore for DirVolumeStore {
    fn create_from_file(&self, source: &Path, name: &str) -> anyhow::Result<VolumeInfo> {
        let path = self.volume_path(name)?;
        if path.exists() {
            bail!("volume '{name}' already exists");
        }
        std::fs::copy(source, &path)
            .with_context(|| format!("copy {} into volume '{name}'", source.display()))?;
        let metadata = std::fs::metadata(&path)?;
        debug!(volume = name, path = %path.display(), "volume created");
        Ok(info_for(name, path, &metadata))
    }

    fn lookup(&self, name: &str) -> anyhow::Result<Option<VolumeInfo>> {
        let path = self.volume_path(name)?;
        match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => Ok(Some(info_for(name, path, &metadata))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("stat volume '{name}'")),
        }
    }

    fn list(&self) -> anyhow::Result<Vec<VolumeInfo>> {
        let mut volumes = Vec::new();
        let entries = std::fs::read_dir(&self.pool)
            .with_context(|| format!("list volume pool {}", self.pool.display()))?;
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            volumes.push(info_for(&name, entry.path(), &metadata));
        }
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    fn remove(&self, name: &str) -> anyhow::Result<()> {
        let path = self.volume_path(name)?;
        std::fs::remove_file(&path).with_context(|| format!("remove volume '{name}'"))?;
        debug!(volume = name, "volume removed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
