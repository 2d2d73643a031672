//! Ingestion orchestrator.
//!
//! Drives one upload from its first chunk to a registered tile pyramid:
//!
//! ```text
//! Receiving ──complete──▶ Completing
//!                            │
//!        ┌───────────────────┼──────────────────────────────────────┐
//!        ▼                   ▼                 ▼                    ▼
//!   Validating ──▶ Assembling ──▶ Tiling ──▶ Registering ──▶ Done (retired)
//!        │             │            │            │
//!        └─────────────┴────────────┴────────────┴──▶ Failed { stage }
//! ```
//!
//! Every terminal state except a format rejection discards the session's
//! scratch directory. A format rejection leaves the chunks where they are;
//! the expiry sweep reclaims them with the session.

mod sweep;

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::IngestError;
use crate::registry::{ImageRecord, ImageRegistry};
use crate::tile::TilePyramidGenerator;
use crate::upload::{self, Assembler, ChunkStore, SessionId, SessionRegistry, Stage};

pub use sweep::{spawn_expiry_sweep, SweepReport};

// =============================================================================
// Configuration
// =============================================================================

/// Default public prefix of descriptor paths handed to clients.
pub const DEFAULT_PUBLIC_PREFIX: &str = "./tiles/uploaded";

/// Default ceiling on a single chunk (64 MiB).
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

/// Default ceiling on the number of chunks in one upload.
pub const DEFAULT_MAX_TOTAL_CHUNKS: u32 = 1024;

/// How the published pyramid is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NamingPolicy {
    /// `<base>` from the uploaded filename; a later upload with the same
    /// name replaces the earlier pyramid
    #[default]
    Filename,

    /// `<base>-<first 12 hex digits of the content SHA-256>`
    ContentHash,
}

/// Knobs of the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Prefix joined with `<base>.dzi` to form `dziPath`
    pub public_prefix: String,

    pub naming: NamingPolicy,

    /// Largest accepted chunk body
    pub max_chunk_bytes: usize,

    /// Largest accepted `totalChunks`; chunk indices must stay below it
    pub max_total_chunks: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            public_prefix: DEFAULT_PUBLIC_PREFIX.to_string(),
            naming: NamingPolicy::default(),
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            max_total_chunks: DEFAULT_MAX_TOTAL_CHUNKS,
        }
    }
}

// =============================================================================
// Requests and Results
// =============================================================================

/// Body of `POST /upload/complete`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub upload_id: String,

    #[serde(deserialize_with = "number_or_string")]
    pub total_chunks: u32,

    pub filename: String,
}

/// Successful completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    pub success: bool,
    pub dzi_path: String,
    pub dzi_base_name: String,
}

/// A completion that stopped at `stage`.
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: Stage,
    pub error: IngestError,
}

impl PipelineFailure {
    fn at(stage: Stage, error: impl Into<IngestError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

/// Browsers serialize numbers from form state as strings surprisingly often.
fn number_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Ingest Service
// =============================================================================

/// Orchestrates sessions, chunk storage, assembly, tiling and registration.
pub struct IngestService<R: ImageRegistry> {
    sessions: Arc<SessionRegistry>,
    store: Arc<ChunkStore>,
    assembler: Assembler,
    generator: Arc<TilePyramidGenerator>,
    registry: Arc<R>,
    config: IngestConfig,
}

impl<R: ImageRegistry + 'static> IngestService<R> {
    pub fn new(
        store: Arc<ChunkStore>,
        generator: Arc<TilePyramidGenerator>,
        registry: Arc<R>,
        config: IngestConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            assembler: Assembler::new(Arc::clone(&store)),
            store,
            generator,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Start a new upload.
    pub fn open_session(&self) -> SessionId {
        let session = self.sessions.open_session();
        info!(upload_id = %session.id, "upload session opened");
        session.id
    }

    /// Store chunk `index` of an upload that is still receiving.
    pub async fn receive_chunk(
        &self,
        upload_id: &str,
        index: u32,
        bytes: Bytes,
    ) -> Result<(), IngestError> {
        let id = parse_upload_id(upload_id)?;

        if bytes.len() > self.config.max_chunk_bytes {
            return Err(IngestError::invalid(format!(
                "chunk {} is {} bytes; the limit is {}",
                index,
                bytes.len(),
                self.config.max_chunk_bytes
            )));
        }
        if index >= self.config.max_total_chunks {
            return Err(IngestError::invalid(format!(
                "chunkIndex {} exceeds the limit of {} chunks",
                index, self.config.max_total_chunks
            )));
        }

        self.sessions.ensure_receiving(&id)?;
        self.store.put(&id, index, &bytes).await?;
        Ok(())
    }

    /// Run the completion pipeline for an upload.
    ///
    /// The pipeline runs on its own task, so a caller that goes away (e.g. an
    /// HTTP client disconnecting) cannot stop it between stages.
    pub async fn complete(
        self: &Arc<Self>,
        request: CompleteRequest,
    ) -> Result<CompletedUpload, PipelineFailure> {
        let service = Arc::clone(self);
        match tokio::spawn(async move { service.run_pipeline(request).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "completion task aborted");
                Err(PipelineFailure::at(
                    Stage::Completing,
                    IngestError::Internal(e.to_string()),
                ))
            }
        }
    }

    /// Every image registered so far.
    pub async fn list_images(&self) -> Vec<ImageRecord> {
        self.registry.list_all().await
    }

    async fn run_pipeline(
        &self,
        request: CompleteRequest,
    ) -> Result<CompletedUpload, PipelineFailure> {
        let id = parse_upload_id(&request.upload_id)
            .map_err(|e| PipelineFailure::at(Stage::Completing, e))?;

        // Malformed requests are rejected before the session is claimed, so
        // the client can retry with a corrected body.
        if request.total_chunks == 0 {
            return Err(PipelineFailure::at(
                Stage::Completing,
                IngestError::invalid("totalChunks must be at least 1"),
            ));
        }
        if request.total_chunks > self.config.max_total_chunks {
            return Err(PipelineFailure::at(
                Stage::Completing,
                IngestError::invalid(format!(
                    "totalChunks {} exceeds the limit of {}",
                    request.total_chunks, self.config.max_total_chunks
                )),
            ));
        }

        let guard = self
            .sessions
            .begin_completion(&id)
            .map_err(|e| PipelineFailure::at(Stage::Completing, e))?;

        // Validating: chunks stay untouched on rejection.
        let validated = match upload::validate(&request.filename) {
            Ok(validated) => validated,
            Err(e) => {
                warn!(upload_id = %id, filename = %request.filename, "unsupported file type");
                guard.fail(Stage::Validating);
                return Err(PipelineFailure::at(Stage::Validating, e));
            }
        };

        // Assembling
        let assembled = match self
            .assembler
            .assemble(&id, request.total_chunks, validated.extension)
            .await
        {
            Ok(assembled) => assembled,
            Err(e) => {
                self.discard_scratch(&id).await;
                guard.fail(Stage::Assembling);
                return Err(PipelineFailure::at(Stage::Assembling, e));
            }
        };

        let base_name = match self.config.naming {
            NamingPolicy::Filename => validated.base_name.clone(),
            NamingPolicy::ContentHash => {
                let digest = assembled
                    .sha256
                    .get(..12)
                    .unwrap_or(assembled.sha256.as_str());
                format!("{}-{}", validated.base_name, digest)
            }
        };

        // Tiling
        let hierarchy = match self.generator.tile(&assembled, &base_name).await {
            Ok(hierarchy) => hierarchy,
            Err(e) => {
                error!(upload_id = %id, base_name = %base_name, error = %e, "tiling failed");
                self.discard_scratch(&id).await;
                guard.fail(Stage::Tiling);
                return Err(PipelineFailure::at(Stage::Tiling, e));
            }
        };

        // Registering
        let dzi_path = format!(
            "{}/{}.dzi",
            self.config.public_prefix.trim_end_matches('/'),
            base_name
        );
        let record = ImageRecord {
            dzi_base_name: base_name.clone(),
            dzi_path: dzi_path.clone(),
            original_filename: request.filename.clone(),
            upload_id: id.to_string(),
            uploaded_at: Utc::now(),
        };
        if let Err(e) = self.registry.append(record).await {
            error!(
                upload_id = %id,
                base_name = %base_name,
                descriptor = %hierarchy.descriptor_path.display(),
                files_dir = %hierarchy.files_dir.display(),
                error = %e,
                "registration failed; published tiles are orphaned"
            );
            self.discard_scratch(&id).await;
            guard.fail(Stage::Registering);
            return Err(PipelineFailure::at(Stage::Registering, e));
        }

        self.discard_scratch(&id).await;
        guard.succeed();

        info!(
            upload_id = %id,
            base_name = %base_name,
            bytes = assembled.len,
            levels = hierarchy.levels,
            "upload ingested"
        );

        Ok(CompletedUpload {
            success: true,
            dzi_path,
            dzi_base_name: base_name,
        })
    }

    async fn discard_scratch(&self, id: &SessionId) {
        if let Err(e) = self.store.discard(id).await {
            warn!(upload_id = %id, error = %e, "failed to discard session scratch");
        } else {
            debug!(upload_id = %id, "session scratch discarded");
        }
    }
}

/// An id that does not parse was never issued by this service.
fn parse_upload_id(raw: &str) -> Result<SessionId, IngestError> {
    SessionId::parse(raw).map_err(|_| IngestError::UnknownSession {
        upload_id: raw.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
