use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the scratch chunk store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Upload id is not a token this service could have issued
    #[error("Invalid upload id: {0}")]
    InvalidSessionId(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors produced while turning an assembled image into a tile pyramid.
#[derive(Debug, Error)]
pub enum TilingError {
    /// Source bytes could not be decoded as an image
    #[error("failed to decode source image: {0}")]
    Decode(String),

    /// A tile could not be encoded
    #[error("failed to encode tile: {0}")]
    Encode(String),

    /// Decoded image has a zero dimension
    #[error("source image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// Filesystem operation failed while writing the pyramid
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transform task itself died (panic or runtime shutdown)
    #[error("tile transform aborted: {0}")]
    Aborted(String),
}

impl TilingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TilingError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the image registry document.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Registry document could not be read or written
    #[error("registry I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Registry document exists but is not a JSON array of records
    #[error("registry document {} is corrupt: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    /// Records could not be serialized
    #[error("failed to serialize registry: {0}")]
    Serialize(String),
}

/// Errors surfaced by the ingestion pipeline and its HTTP contract.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Declared file extension is outside the allow-list (HTTP 400)
    #[error("Unsupported file type: {filename:?} (allowed: .jpg, .jpeg, .png, .tif, .tiff, .bmp)")]
    UnsupportedFormat { filename: String },

    /// A chunk in `0..total_chunks` was never stored (HTTP 500)
    #[error("Failed to assemble chunks: missing chunk {index}")]
    MissingChunk { index: u32 },

    /// Tile transform failed (HTTP 500)
    #[error("DZI generation failed: {0}")]
    Tiling(#[from] TilingError),

    /// Image registry append failed after tiling (HTTP 500)
    #[error("Failed to register image: {0}")]
    Persistence(#[from] PersistenceError),

    /// Upload id was never issued or has been retired (HTTP 404)
    #[error("Unknown upload id: {upload_id}")]
    UnknownSession { upload_id: String },

    /// Session is not in a state that accepts this request (HTTP 409)
    #[error("Upload {upload_id} is {state}; start a new upload")]
    SessionConflict { upload_id: String, state: String },

    /// Malformed or out-of-limit request (HTTP 400)
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Scratch storage failure (HTTP 500)
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Pipeline task died before producing a result (HTTP 500)
    #[error("Upload pipeline aborted: {0}")]
    Internal(String),
}

impl IngestError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        IngestError::InvalidRequest {
            reason: reason.into(),
        }
    }
}
