//! Tile pyramid generation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Ingestion Orchestrator         │
//! └────────────────────┬────────────────────┘
//!                      │ AssembledImage
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          TilePyramidGenerator           │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │   staging    │  │  descriptor     │  │
//! │  │   + publish  │  │  (DZI XML)      │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ spawn_blocking
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │     TileTransform (DeepZoomTransform)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TilePyramidGenerator`]: staging, atomic publication and cleanup
//! - [`TileTransform`]: capability that writes the tile tree for one image
//! - [`DeepZoomTransform`]: built-in transform over the `image` crate
//! - [`dzi`]: level geometry and the `.dzi` descriptor

pub mod dzi;
pub mod generator;
pub mod transform;

pub use dzi::{
    calculate_max_dzi_level, dzi_level_count, dzi_level_dimensions, dzi_tile_count,
    generate_dzi_xml, tile_bounds, DziDescriptor, DZI_NAMESPACE,
};
pub use generator::{TileHierarchy, TilePyramidGenerator};
pub use transform::{
    DeepZoomTransform, PyramidSummary, TileSpec, TileTransform, DEFAULT_JPEG_QUALITY,
    DEFAULT_TILE_OVERLAP, DEFAULT_TILE_SIZE, TILE_FORMAT,
};
