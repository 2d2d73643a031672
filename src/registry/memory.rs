use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PersistenceError;

use super::{ImageRecord, ImageRegistry};

/// In-memory [`ImageRegistry`].
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: Mutex<Vec<ImageRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl ImageRegistry for MemoryRegistry {
    async fn append(&self, record: ImageRecord) -> Result<(), PersistenceError> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn list_all(&self) -> Vec<ImageRecord> {
        self.records.lock().await.clone()
    }
}
