//! DZI Ingest - chunked image uploads converted into Deep Zoom pyramids.
//!
//! This binary starts the HTTP service (or runs a one-shot local conversion)
//! and wires all components together.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use dzi_ingest::{
    config::{Cli, Command, ServeConfig, TileConfig, STATIC_TILES_MOUNT},
    ingest::{spawn_expiry_sweep, IngestService},
    registry::JsonFileRegistry,
    server::{create_router, RouterConfig},
    tile::TilePyramidGenerator,
    upload::{self, AssembledImage, ChunkStore},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Tile(config) => run_tile(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Scratch dir: {}", config.scratch_dir.display());
    info!("  Tiles dir: {}", config.tiles_dir.display());
    info!("  Registry: {}", config.registry_path.display());
    info!("  Naming: {:?}", config.naming);
    info!(
        "  Limits: {} bytes/chunk, {} chunks/upload",
        config.max_chunk_bytes, config.max_total_chunks
    );
    if config.session_ttl_secs == 0 {
        warn!("  Session expiry: DISABLED - abandoned uploads stay on disk");
    } else {
        info!(
            "  Session expiry: {}s (sweep every {}s)",
            config.session_ttl_secs, config.sweep_interval_secs
        );
    }

    let store = match ChunkStore::open(&config.scratch_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open scratch directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let generator = match TilePyramidGenerator::with_deep_zoom(&config.tiles_dir).await {
        Ok(generator) => Arc::new(generator),
        Err(e) => {
            error!("Failed to prepare tiles directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(JsonFileRegistry::new(&config.registry_path));

    let ingest = Arc::new(IngestService::new(
        store,
        generator,
        registry,
        config.ingest_config(),
    ));

    let _sweep = spawn_expiry_sweep(
        Arc::clone(&ingest),
        config.sweep_interval(),
        config.session_ttl(),
    );

    let router = create_router(ingest, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl -X POST http://{}/upload/init", addr);
    info!("    curl http://{}/images/uploaded", addr);
    if config.serve_tiles {
        info!("");
        info!("  Pyramids are served from:");
        info!("    http://{}{}/<name>.dzi", addr, STATIC_TILES_MOUNT);
    }
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dzi_ingest=debug,tower_http=debug"
    } else {
        "dzi_ingest=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    if config.serve_tiles {
        router_config = router_config.with_static_tiles(STATIC_TILES_MOUNT, &config.tiles_dir);
    }

    router_config
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(config: TileConfig) -> ExitCode {
    init_logging(config.verbose);

    let file_name = config
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let validated = match upload::validate(&file_name) {
        Ok(validated) => validated,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let base_name = config.name.clone().unwrap_or(validated.base_name);

    let generator = match TilePyramidGenerator::with_deep_zoom(&config.output_dir).await {
        Ok(generator) => generator,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // The generator consumes its input, so tile a private copy.
    let copy = generator.output_dir().join(format!(
        ".source-{}.{}",
        Uuid::new_v4().simple(),
        validated.extension.as_str()
    ));
    let len = match tokio::fs::copy(&config.input, &copy).await {
        Ok(len) => len,
        Err(e) => {
            eprintln!("Error: failed to read {}: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let assembled = AssembledImage {
        path: copy,
        extension: validated.extension,
        len,
        sha256: String::new(),
    };

    match generator.tile(&assembled, &base_name).await {
        Ok(hierarchy) => {
            println!("Descriptor: {}", hierarchy.descriptor_path.display());
            println!("Tiles:      {}", hierarchy.files_dir.display());
            println!(
                "Size:       {}x{} ({} levels, {}px tiles, overlap {})",
                hierarchy.width,
                hierarchy.height,
                hierarchy.levels,
                hierarchy.tile_size,
                hierarchy.overlap
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
