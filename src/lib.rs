//! # DZI Ingest
//!
//! An upload service that accepts large raster images in chunks over HTTP,
//! reassembles them losslessly and converts them into Deep Zoom (DZI) tile
//! pyramids for progressive, zoomable viewing.
//!
//! ## Features
//!
//! - **Chunked uploads**: Chunks may arrive in any order; ordering is resolved at assembly
//! - **Atomic publication**: A `.dzi` descriptor only appears next to a complete tile tree
//! - **Single-flight completion**: Each upload is completed at most once
//! - **Durable registry**: Ingested images are recorded in an append-only JSON document
//! - **Expiry sweep**: Abandoned uploads are reclaimed in the background
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`upload`] - Sessions, chunk storage, format gate and reassembly
//! - [`tile`] - Tile transform, DZI geometry and pyramid publication
//! - [`registry`] - Image registry trait and its JSON / in-memory implementations
//! - [`ingest`] - The orchestrator tying the pipeline together
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dzi_ingest::{
//!     create_router, ChunkStore, IngestConfig, IngestService, JsonFileRegistry, RouterConfig,
//!     TilePyramidGenerator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(ChunkStore::open("./uploads").await?);
//!     let generator = Arc::new(TilePyramidGenerator::with_deep_zoom("./public/tiles/uploaded").await?);
//!     let registry = Arc::new(JsonFileRegistry::new("./data/images.json"));
//!
//!     let ingest = Arc::new(IngestService::new(store, generator, registry, IngestConfig::default()));
//!     let router = create_router(ingest, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:5174").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod server;
pub mod tile;
pub mod upload;

// Re-export commonly used types
pub use config::{Cli, Command, ServeConfig, TileConfig};
pub use error::{IngestError, PersistenceError, StoreError, TilingError};
pub use ingest::{
    spawn_expiry_sweep, CompleteRequest, CompletedUpload, IngestConfig, IngestService,
    NamingPolicy, PipelineFailure, SweepReport,
};
pub use registry::{ImageRecord, ImageRegistry, JsonFileRegistry, MemoryRegistry};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use tile::{
    DeepZoomTransform, DziDescriptor, TileHierarchy, TilePyramidGenerator, TileSpec,
    TileTransform,
};
pub use upload::{
    AssembledImage, Assembler, ChunkStore, SessionId, SessionRegistry, SessionState, Stage,
};
