//! Tile pyramid generator.
//!
//! Wraps a [`TileTransform`] with the filesystem protocol that makes a
//! published pyramid all-or-nothing:
//!
//! ```text
//! <output_dir>/.staging-<uuid>/<base>_files/...   transform writes here
//! <output_dir>/.staging-<uuid>/<base>.dzi         descriptor, written last
//!                    │
//!                    │ publish (serialized)
//!                    ▼
//! <output_dir>/<base>_files/<level>/<col>_<row>.jpeg
//! <output_dir>/<base>.dzi
//! ```
//!
//! The descriptor is the last thing moved into place. A reader that can open
//! `<base>.dzi` therefore always finds a complete tile tree next to it.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TilingError;
use crate::upload::AssembledImage;

use super::dzi::DziDescriptor;
use super::transform::{DeepZoomTransform, PyramidSummary, TileTransform, TILE_FORMAT};

const STAGING_PREFIX: &str = ".staging-";

/// A published Deep Zoom pyramid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileHierarchy {
    pub base_name: String,

    /// `<output_dir>/<base>.dzi`
    pub descriptor_path: PathBuf,

    /// `<output_dir>/<base>_files`
    pub files_dir: PathBuf,

    pub width: u32,
    pub height: u32,
    pub levels: usize,
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,
}

/// Turns assembled images into published tile pyramids under one directory.
pub struct TilePyramidGenerator {
    transform: Arc<dyn TileTransform>,
    output_dir: PathBuf,
    publish: Mutex<()>,
    /// Staging directories of transforms still running in this process
    in_flight: std::sync::Mutex<HashSet<PathBuf>>,
}

impl TilePyramidGenerator {
    /// Create a generator writing into `output_dir` (created if missing).
    pub async fn new(
        output_dir: impl Into<PathBuf>,
        transform: Arc<dyn TileTransform>,
    ) -> Result<Self, TilingError> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| TilingError::io(&output_dir, e))?;

        Ok(Self {
            transform,
            output_dir,
            publish: Mutex::new(()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
        })
    }

    /// Generator using the built-in [`DeepZoomTransform`].
    pub async fn with_deep_zoom(output_dir: impl Into<PathBuf>) -> Result<Self, TilingError> {
        Self::new(output_dir, Arc::new(DeepZoomTransform::new())).await
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn descriptor_path(&self, base_name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.dzi", base_name))
    }

    pub fn files_dir(&self, base_name: &str) -> PathBuf {
        self.output_dir.join(format!("{}_files", base_name))
    }

    /// Tile an assembled upload and publish it as `base_name`.
    ///
    /// The assembled file is consumed: it is removed whether tiling succeeds
    /// or not.
    pub async fn tile(
        &self,
        assembled: &AssembledImage,
        base_name: &str,
    ) -> Result<TileHierarchy, TilingError> {
        let result = self.tile_file(&assembled.path, assembled, base_name).await;
        remove_file_quietly(&assembled.path).await;
        result
    }

    async fn tile_file(
        &self,
        source: &Path,
        assembled: &AssembledImage,
        base_name: &str,
    ) -> Result<TileHierarchy, TilingError> {
        let staging = self
            .output_dir
            .join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4().simple()));
        self.in_flight_set().insert(staging.clone());
        let result = match fs::create_dir_all(&staging).await {
            Ok(()) => {
                self.stage_and_publish(source, assembled, base_name, &staging)
                    .await
            }
            Err(e) => Err(TilingError::io(&staging, e)),
        };

        remove_dir_quietly(&staging).await;
        self.in_flight_set().remove(&staging);
        result
    }

    /// Remove staging directories older than `older_than` that no running
    /// transform owns.
    ///
    /// These are left behind when the process dies mid-transform. Returns the
    /// number of directories removed.
    pub async fn reclaim_staging(&self, older_than: Duration) -> Result<usize, TilingError> {
        let mut entries = fs::read_dir(&self.output_dir)
            .await
            .map_err(|e| TilingError::io(&self.output_dir, e))?;

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TilingError::io(&self.output_dir, e))?
        {
            if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            let path = entry.path();
            if self.in_flight_set().contains(&path) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat staging directory");
                    continue;
                }
            };
            if now.duration_since(modified).unwrap_or_default() < older_than {
                continue;
            }

            debug!(path = %path.display(), "removing abandoned staging directory");
            remove_existing_dir(&path).await?;
            removed += 1;
        }

        Ok(removed)
    }

    fn in_flight_set(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn stage_and_publish(
        &self,
        source: &Path,
        assembled: &AssembledImage,
        base_name: &str,
        staging: &Path,
    ) -> Result<TileHierarchy, TilingError> {
        let staged_files = staging.join(format!("{}_files", base_name));
        let staged_descriptor = staging.join(format!("{}.dzi", base_name));

        let summary = self
            .run_transform(source.to_path_buf(), assembled, staged_files.clone())
            .await?;

        let spec = self.transform.spec();
        let descriptor = DziDescriptor {
            width: summary.width,
            height: summary.height,
            tile_size: spec.tile_size,
            overlap: spec.overlap,
            format: TILE_FORMAT.to_string(),
        };
        fs::write(&staged_descriptor, descriptor.to_xml())
            .await
            .map_err(|e| TilingError::io(&staged_descriptor, e))?;

        let descriptor_path = self.descriptor_path(base_name);
        let files_dir = self.files_dir(base_name);

        {
            let _publish = self.publish.lock().await;

            // Retract any previous descriptor before its tiles disappear.
            remove_existing_file(&descriptor_path).await?;
            remove_existing_dir(&files_dir).await?;

            fs::rename(&staged_files, &files_dir)
                .await
                .map_err(|e| TilingError::io(&files_dir, e))?;
            fs::rename(&staged_descriptor, &descriptor_path)
                .await
                .map_err(|e| TilingError::io(&descriptor_path, e))?;
        }

        info!(
            base_name,
            width = summary.width,
            height = summary.height,
            levels = summary.levels,
            tiles = summary.tiles,
            "tile pyramid published"
        );

        Ok(TileHierarchy {
            base_name: base_name.to_string(),
            descriptor_path,
            files_dir,
            width: summary.width,
            height: summary.height,
            levels: summary.levels,
            tile_size: spec.tile_size,
            overlap: spec.overlap,
            format: TILE_FORMAT.to_string(),
        })
    }

    async fn run_transform(
        &self,
        source: PathBuf,
        assembled: &AssembledImage,
        staged_files: PathBuf,
    ) -> Result<PyramidSummary, TilingError> {
        let transform = Arc::clone(&self.transform);
        let extension = assembled.extension;

        debug!(source = %source.display(), bytes = assembled.len, "starting tile transform");

        tokio::task::spawn_blocking(move || transform.transform(&source, extension, &staged_files))
            .await
            .map_err(|e| TilingError::Aborted(e.to_string()))?
    }
}

async fn remove_existing_file(path: &Path) -> Result<(), TilingError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TilingError::io(path, e)),
    }
}

async fn remove_existing_dir(path: &Path) -> Result<(), TilingError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TilingError::io(path, e)),
    }
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = remove_existing_file(path).await {
        warn!(error = %e, "failed to remove assembled image");
    }
}

async fn remove_dir_quietly(path: &Path) {
    if let Err(e) = remove_existing_dir(path).await {
        warn!(error = %e, "failed to remove staging directory");
    }
}

// =============================================================================
// Tests
// =============================================================================
