//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        POST /upload/{init,chunk,complete}  GET /images/uploaded │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (extraction, JSON errors)│  │ (CORS, body limit, tracing) │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └────────────────────────────────┬────────────────────────────────┘
//!                                  │
//!                                  ▼
//!                          IngestService
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    chunk_handler, complete_handler, health_handler, images_handler, init_handler, AppState,
    ChunkResponse, ErrorResponse, HealthResponse, InitResponse,
};
pub use routes::{create_router, RouterConfig};
