use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PersistenceError;

use super::{ImageRecord, ImageRegistry};

type DocumentLocks = std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

/// One writer lock per registry document, shared by every
/// [`JsonFileRegistry`] in the process that points at the same file.
fn document_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<DocumentLocks> = OnceLock::new();

    let key = absolute(path);
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(key).or_default())
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Registry stored as a single JSON array document.
///
/// Appends are read-modify-write cycles under a process-wide lock. The new
/// document is written to a sibling temp file and renamed over the old one,
/// so readers see either the previous or the next document, never a torn one.
#[derive(Debug, Clone)]
pub struct JsonFileRegistry {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = document_lock(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Vec<ImageRecord>, PersistenceError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    async fn write_document(&self, records: &[ImageRecord]) -> Result<(), PersistenceError> {
        let io_err = |path: &Path, source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await.map_err(|e| io_err(&dir, e))?;

        let body = serde_json::to_vec_pretty(records)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "registry".to_string());
        let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&tmp_path)
                .await
                .map_err(|e| io_err(&tmp_path, e))?;
            file.write_all(&body)
                .await
                .map_err(|e| io_err(&tmp_path, e))?;
            file.sync_all().await.map_err(|e| io_err(&tmp_path, e))?;
            fs::rename(&tmp_path, &self.path)
                .await
                .map_err(|e| io_err(&self.path, e))
        }
        .await;

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        written
    }
}

#[async_trait]
impl ImageRegistry for JsonFileRegistry {
    async fn append(&self, record: ImageRecord) -> Result<(), PersistenceError> {
        let _writer = self.lock.lock().await;

        let mut records = self.read_document().await?;
        let base_name = record.dzi_base_name.clone();
        records.push(record);
        self.write_document(&records).await?;

        debug!(
            base_name = %base_name,
            records = records.len(),
            path = %self.path.display(),
            "image registered"
        );
        Ok(())
    }

    async fn list_all(&self) -> Vec<ImageRecord> {
        match self.read_document().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "image registry unreadable; listing as empty");
                Vec::new()
            }
        }
    }
}
