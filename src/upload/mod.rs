//! Upload intake: sessions, chunk storage, format gating and reassembly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Ingestion Orchestrator        │
//! └──────┬──────────────┬──────────────┬────┘
//!        │              │              │
//!        ▼              ▼              ▼
//! ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//! │  Session    │ │ Format Gate │ │  Assembler  │
//! │  Registry   │ │ (extension) │ │ (ordering)  │
//! └─────────────┘ └─────────────┘ └──────┬──────┘
//!                                        │
//!                                        ▼
//!                                 ┌─────────────┐
//!                                 │ Chunk Store │
//!                                 │ (scratch)   │
//!                                 └─────────────┘
//! ```

pub mod assembler;
pub mod chunk_store;
pub mod format;
pub mod session;

pub use assembler::{AssembledImage, Assembler};
pub use chunk_store::{ChunkStore, ScratchEntry};
pub use format::{is_supported, validate, ImageExtension, ValidatedFile, ALLOWED_EXTENSIONS};
pub use session::{
    CompletionGuard, SessionId, SessionRegistry, SessionState, Stage, UploadSession,
};
