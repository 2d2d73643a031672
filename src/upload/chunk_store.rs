//! Durable scratch storage for uploaded chunks.
//!
//! Layout under the scratch root:
//!
//! ```text
//! <root>/<upload_id>/0.part
//! <root>/<upload_id>/1.part
//! <root>/<upload_id>/assembled.<ext>
//! ```
//!
//! Every session owns one directory, so sessions never contend with each
//! other and reclaiming a session is a single directory removal.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;

use super::session::SessionId;

/// Extension of stored chunk files.
const CHUNK_SUFFIX: &str = "part";

/// A session directory found on disk.
#[derive(Debug, Clone)]
pub struct ScratchEntry {
    pub id: SessionId,
    pub modified: SystemTime,
}

/// Chunk store rooted at a scratch directory.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open (and create if needed) a chunk store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every scratch file of a session.
    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Deterministic location of chunk `index` of a session.
    pub fn chunk_path(&self, id: &SessionId, index: u32) -> PathBuf {
        self.session_dir(id)
            .join(format!("{}.{}", index, CHUNK_SUFFIX))
    }

    /// Store one chunk, replacing any earlier submission of the same index.
    ///
    /// The bytes land in a temporary file first and are renamed into place,
    /// so the assembler never observes a partially written chunk.
    pub async fn put(&self, id: &SessionId, index: u32, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let final_path = self.chunk_path(id, index);
        let tmp_path = dir.join(format!(".{}.{}.tmp", index, Uuid::new_v4().simple()));

        let result = write_file(&tmp_path, bytes).await;
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(&final_path, e));
        }

        debug!(
            upload_id = %id,
            chunk_index = index,
            bytes = bytes.len(),
            "chunk stored"
        );
        Ok(())
    }

    /// Whether chunk `index` is present.
    pub async fn contains(&self, id: &SessionId, index: u32) -> bool {
        fs::metadata(self.chunk_path(id, index))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Indices of all chunks currently stored for a session, ascending.
    pub async fn chunk_indices(&self, id: &SessionId) -> Result<Vec<u32>, StoreError> {
        let dir = self.session_dir(id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(index) = name
                .strip_suffix(CHUNK_SUFFIX)
                .and_then(|stem| stem.strip_suffix('.'))
                .and_then(|stem| stem.parse::<u32>().ok())
            {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Remove every scratch file of a session. Removing an absent session is
    /// not an error, so this can be repeated safely.
    pub async fn discard(&self, id: &SessionId) -> Result<(), StoreError> {
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(upload_id = %id, "session scratch discarded");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    /// Enumerate session directories present on disk.
    ///
    /// Entries whose name is not an upload id are ignored; the store never
    /// touches files it did not create.
    pub async fn scratch_entries(&self) -> Result<Vec<ScratchEntry>, StoreError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let name = entry.file_name();
            let Ok(id) = SessionId::parse(&name.to_string_lossy()) else {
                continue;
            };
            if id.as_str() != name.to_string_lossy() {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push(ScratchEntry { id, modified });
        }
        Ok(found)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.flush().await.map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
