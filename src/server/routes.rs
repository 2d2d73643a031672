//! Router configuration for the upload service.
//!
//! # Route Structure
//!
//! ```text
//! /health               - Health check
//! /upload/init          - Open an upload session
//! /upload/chunk         - Store one chunk (multipart)
//! /upload/complete      - Assemble, tile and register
//! /images/uploaded      - Registered images
//! /tiles/uploaded/...   - Published pyramids (optional static files)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dzi_ingest::server::{create_router, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["http://localhost:5173".to_string()])
//!     .with_static_tiles("/tiles/uploaded", "./public/tiles/uploaded");
//!
//! let router = create_router(ingest, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5174").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers::{
    chunk_handler, complete_handler, health_handler, images_handler, init_handler, AppState,
};
use crate::ingest::IngestService;
use crate::registry::ImageRegistry;

/// Headroom on top of the chunk limit for multipart framing and text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Mount point and directory of the static tile server, if enabled
    pub static_tiles: Option<(String, PathBuf)>,
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Tracing is enabled
    /// - Tiles are not served
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
            static_tiles: None,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Serve `dir` as static files under `mount`.
    pub fn with_static_tiles(mut self, mount: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.static_tiles = Some((mount.into(), dir.into()));
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// The request body limit follows the ingest service's chunk limit, so an
/// oversized chunk is refused before it is buffered.
pub fn create_router<R>(ingest: Arc<IngestService<R>>, config: RouterConfig) -> Router
where
    R: ImageRegistry + 'static,
{
    let body_limit = ingest
        .config()
        .max_chunk_bytes
        .saturating_add(MULTIPART_OVERHEAD);
    let app_state = AppState::new(ingest);
    let cors = build_cors_layer(&config);

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/upload/init", post(init_handler::<R>))
        .route("/upload/chunk", post(chunk_handler::<R>))
        .route("/upload/complete", post(complete_handler::<R>))
        .route("/images/uploaded", get(images_handler::<R>))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(body_limit));

    if let Some((mount, dir)) = &config.static_tiles {
        router = router.nest_service(mount, ServeDir::new(dir));
    }

    let router = router.layer(cors);

    // Add tracing if enabled
    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
