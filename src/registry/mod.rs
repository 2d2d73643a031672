//! Image registry: the durable list of images that finished ingestion.
//!
//! Records are append-only. The orchestrator appends one record per
//! successfully tiled upload; consumers (the viewer's image list) read the
//! whole sequence back.
//!
//! # Implementations
//!
//! - [`JsonFileRegistry`]: one JSON array on disk, rewritten atomically on
//!   every append
//! - [`MemoryRegistry`]: in-process list, for tests and embedding

mod json;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

pub use json::JsonFileRegistry;
pub use memory::MemoryRegistry;

/// Metadata for one ingested image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Base name the tile hierarchy was published under
    pub dzi_base_name: String,

    /// Public path of the `.dzi` descriptor
    pub dzi_path: String,

    /// Filename as declared by the uploader
    pub original_filename: String,

    pub upload_id: String,

    /// Completion time (ISO-8601)
    pub uploaded_at: DateTime<Utc>,
}

/// Append-only store of [`ImageRecord`]s.
///
/// Implementations must serialize concurrent appends so that N successful
/// calls always leave exactly N new records.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Append a record.
    async fn append(&self, record: ImageRecord) -> Result<(), PersistenceError>;

    /// All records in append order. An absent or unreadable store reads as
    /// empty.
    async fn list_all(&self) -> Vec<ImageRecord>;
}
