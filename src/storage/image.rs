//! Image reference handling and the image → volume delegation layer.

use std::path::PathBuf;

use anyhow::{Context, anyhow};
use thiserror::Error;
use tracing::info;
use url::Url;

use super::{ImageFetcher, VolumeInfo, VolumeStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageNameError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid image reference '{image}': {source}")]
    Url {
        image: String,
        #[source]
        source: url::ParseError,
    },
    #[error("image reference '{0}' has no final path segment")]
    NoVolumeName(String),
}

/// Drop a `:tag` or `@digest` suffix from an image reference.
///
/// Only a separator after the last `/` counts, so registry ports and URL
/// schemes are left alone.
pub fn strip_tag(image: &str) -> &str {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    let name = &image[name_start..];
    let cut = name.find('@').or_else(|| name.rfind(':'));
    match cut {
        Some(i) => &image[..name_start + i],
        None => image,
    }
}

/// Volume name for an image reference: the last path segment of the
/// reference with its tag removed.
///
/// ```rust
/// # use vmlog_shipper::storage::image_name_to_volume_name;
/// assert_eq!(
///     image_name_to_volume_name("docker.io/virtlet/cirros:0.4").unwrap(),
///     "cirros"
/// );
/// ```
pub fn image_name_to_volume_name(image: &str) -> Result<String, ImageNameError> {
    let image = image.trim();
    if image.is_empty() {
        return Err(ImageNameError::Empty);
    }

    let reference = strip_tag(image);
    let path = match Url::parse(reference) {
        Ok(url) => url.path().to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => reference.to_string(),
        Err(source) => {
            return Err(ImageNameError::Url {
                image: image.to_string(),
                source,
            });
        }
    };

    match path.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => Ok(segment.to_string()),
        _ => Err(ImageNameError::NoVolumeName(image.to_string())),
    }
}

/// Images stored as volumes: fetches through `F`, stores through `S`.
pub struct ImageTool<S, F> {
    store: S,
    fetcher: F,
}

impl<S: VolumeStore, F: ImageFetcher> ImageTool<S, F> {
    pub fn new(store: S, fetcher: F) -> Self {
        Self { store, fetcher }
    }

    pub fn list_images(&self) -> anyhow::Result<Vec<VolumeInfo>> {
        self.store.list()
    }

    pub fn image_info(&self, volume_name: &str) -> anyhow::Result<VolumeInfo> {
        self.store
            .lookup(volume_name)?
            .ok_or_else(|| anyhow!("no volume named '{volume_name}'"))
    }

    pub fn image_file_path(&self, volume_name: &str) -> anyhow::Result<PathBuf> {
        Ok(self.image_info(volume_name)?.path)
    }

    /// Fetch `image` (tag removed) and import it as `volume_name`.
    pub fn pull_image_to_volume(&self, image: &str, volume_name: &str) -> anyhow::Result<VolumeInfo> {
        let local = self
            .fetcher
            .fetch(strip_tag(image), volume_name)
            .with_context(|| format!("fetch image {image}"))?;
        let volume = self.store.create_from_file(&local, volume_name)?;
        info!(image, volume = volume_name, size_bytes = volume.size_bytes, "image stored");
        Ok(volume)
    }

    /// [`Self::pull_image_to_volume`] under the volume name derived from `image`.
    pub fn pull_image(&self, image: &str) -> anyhow::Result<VolumeInfo> {
        let volume_name = image_name_to_volume_name(image)?;
        self.pull_image_to_volume(image, &volume_name)
    }

    pub fn remove_image(&self, volume_name: &str) -> anyhow::Result<()> {
        self.store.remove(volume_name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
