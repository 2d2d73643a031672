//! Chunk assembler.
//!
//! Concatenates chunks `0..total_chunks` of a session, in index order, into
//! one file next to the chunks. Chunks are only read here; reclaiming them is
//! the job of [`ChunkStore::discard`] once the whole pipeline has a result, so
//! running the assembler twice over the same chunks yields the same file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::error::{IngestError, StoreError};

use super::chunk_store::ChunkStore;
use super::format::ImageExtension;
use super::session::SessionId;

/// Read buffer size when copying chunks into the output.
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// An assembled upload waiting to be tiled.
#[derive(Debug, Clone)]
pub struct AssembledImage {
    /// Location of the concatenated file
    pub path: PathBuf,

    /// Extension the client declared for the upload
    pub extension: ImageExtension,

    /// Total number of bytes written
    pub len: u64,

    /// Lowercase hex SHA-256 of the assembled bytes
    pub sha256: String,
}

/// Reassembles chunk files into a single stream.
#[derive(Debug, Clone)]
pub struct Assembler {
    store: Arc<ChunkStore>,
}

impl Assembler {
    pub fn new(store: Arc<ChunkStore>) -> Self {
        Self { store }
    }

    /// Path the assembled output of a session is written to.
    pub fn output_path(&self, id: &SessionId, extension: ImageExtension) -> PathBuf {
        self.store
            .session_dir(id)
            .join(format!("assembled.{}", extension.as_str()))
    }

    /// Concatenate chunks `0..total_chunks` of `id`.
    ///
    /// # Errors
    ///
    /// - [`IngestError::MissingChunk`] for the first absent index. Whatever had
    ///   been written to the output is removed before returning.
    /// - [`IngestError::InvalidRequest`] if `total_chunks` is zero.
    /// - [`IngestError::Storage`] for any other I/O failure, again without
    ///   leaving the output behind.
    pub async fn assemble(
        &self,
        id: &SessionId,
        total_chunks: u32,
        extension: ImageExtension,
    ) -> Result<AssembledImage, IngestError> {
        if total_chunks == 0 {
            return Err(IngestError::invalid("totalChunks must be at least 1"));
        }

        let dir = self.store.session_dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let output_path = self.output_path(id, extension);

        match self.write_output(id, total_chunks, &output_path).await {
            Ok((len, sha256)) => {
                debug!(upload_id = %id, total_chunks, bytes = len, "chunks assembled");
                Ok(AssembledImage {
                    path: output_path,
                    extension,
                    len,
                    sha256,
                })
            }
            Err(err) => {
                remove_partial(&output_path).await;
                Err(err)
            }
        }
    }

    async fn write_output(
        &self,
        id: &SessionId,
        total_chunks: u32,
        output_path: &Path,
    ) -> Result<(u64, String), IngestError> {
        let file = File::create(output_path)
            .await
            .map_err(|e| StoreError::io(output_path, e))?;
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total: u64 = 0;

        for index in 0..total_chunks {
            let chunk_path = self.store.chunk_path(id, index);
            let mut chunk = match File::open(&chunk_path).await {
                Ok(chunk) => chunk,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(upload_id = %id, chunk_index = index, total_chunks, "missing chunk");
                    return Err(IngestError::MissingChunk { index });
                }
                Err(e) => return Err(StoreError::io(&chunk_path, e).into()),
            };

            loop {
                let read = chunk
                    .read(&mut buffer)
                    .await
                    .map_err(|e| StoreError::io(&chunk_path, e))?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
                writer
                    .write_all(&buffer[..read])
                    .await
                    .map_err(|e| StoreError::io(output_path, e))?;
                total += read as u64;
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| StoreError::io(output_path, e))?;
        writer
            .get_mut()
            .sync_all()
            .await
            .map_err(|e| StoreError::io(output_path, e))?;

        Ok((total, hex::encode(hasher.finalize())))
    }
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial assembly"),
    }
}

// =============================================================================
// Tests
// =============================================================================
