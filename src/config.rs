//! Configuration management for the upload service.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `DZI_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Commands
//!
//! - `serve` (default) - Run the HTTP upload service
//! - `tile` - Convert one local image into a Deep Zoom pyramid
//!
//! # Environment Variables
//!
//! - `DZI_HOST` - Server bind address (default: 0.0.0.0)
//! - `DZI_PORT` - Server port (default: 5174)
//! - `DZI_SCRATCH_DIR` - Chunk scratch directory (default: ./uploads)
//! - `DZI_TILES_DIR` - Published pyramids (default: ./public/tiles/uploaded)
//! - `DZI_REGISTRY_PATH` - Image registry document (default: ./data/images.json)
//! - `DZI_PUBLIC_PREFIX` - Prefix of `dziPath` in responses (default: ./tiles/uploaded)
//! - `DZI_MAX_CHUNK_BYTES` - Largest accepted chunk (default: 64 MiB)
//! - `DZI_MAX_TOTAL_CHUNKS` - Largest accepted chunk count (default: 1024)
//! - `DZI_SESSION_TTL_SECS` - Idle upload lifetime, 0 disables expiry (default: 86400)
//! - `DZI_SWEEP_INTERVAL_SECS` - Expiry sweep period (default: 900)
//! - `DZI_NAMING` - `filename` or `content-hash` (default: filename)
//! - `DZI_SERVE_TILES` - Serve pyramids under `/tiles/uploaded`
//! - `DZI_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::ingest::{
    IngestConfig, NamingPolicy, DEFAULT_MAX_CHUNK_BYTES, DEFAULT_MAX_TOTAL_CHUNKS,
    DEFAULT_PUBLIC_PREFIX,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 5174;

/// Default chunk scratch directory.
pub const DEFAULT_SCRATCH_DIR: &str = "./uploads";

/// Default directory for published pyramids.
pub const DEFAULT_TILES_DIR: &str = "./public/tiles/uploaded";

/// Default image registry document.
pub const DEFAULT_REGISTRY_PATH: &str = "./data/images.json";

/// URL path the tile directory is mounted at when `--serve-tiles` is set.
pub const STATIC_TILES_MOUNT: &str = "/tiles/uploaded";

/// Default lifetime of an idle upload session (24 hours).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Default period of the expiry sweep (15 minutes).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15 * 60;

// =============================================================================
// CLI Arguments
// =============================================================================

/// DZI Ingest - chunked image uploads converted into Deep Zoom pyramids.
///
/// Without a subcommand the HTTP service starts with the `serve` options.
#[derive(Parser, Debug, Clone)]
#[command(name = "dzi-ingest")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// Resolve the command to run, defaulting to `serve`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP upload service
    Serve(ServeConfig),

    /// Convert a local image into a Deep Zoom pyramid
    Tile(TileConfig),
}

/// Options of the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "DZI_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "DZI_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Directory holding upload chunks until completion.
    #[arg(long, default_value = DEFAULT_SCRATCH_DIR, env = "DZI_SCRATCH_DIR")]
    pub scratch_dir: PathBuf,

    /// Directory published pyramids are written to.
    #[arg(long, default_value = DEFAULT_TILES_DIR, env = "DZI_TILES_DIR")]
    pub tiles_dir: PathBuf,

    /// JSON document listing registered images.
    #[arg(long, default_value = DEFAULT_REGISTRY_PATH, env = "DZI_REGISTRY_PATH")]
    pub registry_path: PathBuf,

    /// Prefix of the `dziPath` returned to clients.
    #[arg(long, default_value = DEFAULT_PUBLIC_PREFIX, env = "DZI_PUBLIC_PREFIX")]
    pub public_prefix: String,

    // =========================================================================
    // Upload Limits
    // =========================================================================
    /// Largest accepted chunk in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_CHUNK_BYTES, env = "DZI_MAX_CHUNK_BYTES")]
    pub max_chunk_bytes: usize,

    /// Largest accepted number of chunks per upload.
    #[arg(long, default_value_t = DEFAULT_MAX_TOTAL_CHUNKS, env = "DZI_MAX_TOTAL_CHUNKS")]
    pub max_total_chunks: u32,

    /// Seconds an upload may stay incomplete before it is discarded.
    ///
    /// 0 disables expiry.
    #[arg(long, default_value_t = DEFAULT_SESSION_TTL_SECS, env = "DZI_SESSION_TTL_SECS")]
    pub session_ttl_secs: u64,

    /// Seconds between expiry sweeps.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_SECS, env = "DZI_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    /// How published pyramids are named.
    #[arg(long, value_enum, default_value_t = NamingPolicy::Filename, env = "DZI_NAMING")]
    pub naming: NamingPolicy,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// Serve the tile directory as static files under /tiles/uploaded.
    #[arg(long, default_value_t = false, env = "DZI_SERVE_TILES")]
    pub serve_tiles: bool,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "DZI_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_bytes == 0 {
            return Err("max_chunk_bytes must be greater than 0".to_string());
        }
        if self.max_total_chunks == 0 {
            return Err("max_total_chunks must be greater than 0".to_string());
        }
        if self.session_ttl_secs > 0 && self.sweep_interval_secs == 0 {
            return Err(
                "sweep_interval_secs must be greater than 0 while session expiry is enabled"
                    .to_string(),
            );
        }
        if self.public_prefix.trim().is_empty() {
            return Err("public_prefix must not be empty".to_string());
        }
        if self.scratch_dir == self.tiles_dir {
            return Err("scratch_dir and tiles_dir must be different directories".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Pipeline settings derived from these options.
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            public_prefix: self.public_prefix.clone(),
            naming: self.naming,
            max_chunk_bytes: self.max_chunk_bytes,
            max_total_chunks: self.max_total_chunks,
        }
    }
}

/// Options of the `tile` command.
#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    /// Image file to convert.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Directory the pyramid is written to.
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Base name of the pyramid (defaults to the input's file stem).
    #[arg(short, long)]
    pub name: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
