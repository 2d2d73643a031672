//! Test utilities for integration tests.
//!
//! [`TestApp`] owns a temporary directory holding the scratch area, the tile
//! output and the registry document, plus a router wired to all of them.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tower::ServiceExt;

use dzi_ingest::{
    create_router, ChunkStore, IngestConfig, IngestService, JsonFileRegistry, RouterConfig,
    TilePyramidGenerator,
};

pub const BOUNDARY: &str = "----dzi-ingest-test-boundary";

// =============================================================================
// Test Application
// =============================================================================

pub struct TestApp {
    pub temp: TempDir,
    pub router: Router,
    pub ingest: Arc<IngestService<JsonFileRegistry>>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(IngestConfig::default()).await
    }

    pub async fn with_config(config: IngestConfig) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(ChunkStore::open(temp.path().join("uploads")).await.unwrap());
        let generator = Arc::new(
            TilePyramidGenerator::with_deep_zoom(temp.path().join("tiles"))
                .await
                .unwrap(),
        );
        let registry = Arc::new(JsonFileRegistry::new(
            temp.path().join("data").join("images.json"),
        ));
        let ingest = Arc::new(IngestService::new(store, generator, registry, config));
        let router = create_router(Arc::clone(&ingest), RouterConfig::new().with_tracing(false));

        Self {
            temp,
            router,
            ingest,
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.temp.path().join("uploads")
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.temp.path().join("tiles")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.temp.path().join("data").join("images.json")
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    /// `POST /upload/init`, returning the new upload id.
    pub async fn init(&self) -> String {
        let (status, json) = self
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/upload/init")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        json["uploadId"].as_str().unwrap().to_string()
    }

    /// `POST /upload/chunk` with the chunk field first, as browsers send it.
    pub async fn send_chunk(
        &self,
        upload_id: &str,
        index: u32,
        bytes: &[u8],
    ) -> (StatusCode, serde_json::Value) {
        let body = multipart_body(&[
            Part::File("chunk", bytes),
            Part::Text("uploadId", upload_id),
            Part::Text("chunkIndex", &index.to_string()),
        ]);
        self.send(multipart_request(body)).await
    }

    /// Split `data` into `chunk_size` pieces and send them in `order`.
    pub async fn send_chunks_in_order(
        &self,
        upload_id: &str,
        data: &[u8],
        chunk_size: usize,
        order: &[usize],
    ) {
        let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
        assert_eq!(chunks.len(), order.len(), "order must cover every chunk");
        for &index in order {
            let (status, _) = self.send_chunk(upload_id, index as u32, chunks[index]).await;
            assert_eq!(status, StatusCode::OK, "chunk {} rejected", index);
        }
    }

    /// Send every chunk of `data` in ascending order; returns the chunk count.
    pub async fn upload(&self, upload_id: &str, data: &[u8], chunk_size: usize) -> u32 {
        let count = data.chunks(chunk_size).count();
        let order: Vec<usize> = (0..count).collect();
        self.send_chunks_in_order(upload_id, data, chunk_size, &order)
            .await;
        count as u32
    }

    /// `POST /upload/complete`.
    pub async fn complete(
        &self,
        upload_id: &str,
        total_chunks: u32,
        filename: &str,
    ) -> (StatusCode, serde_json::Value) {
        let body = serde_json::json!({
            "uploadId": upload_id,
            "totalChunks": total_chunks,
            "filename": filename,
        });
        self.send(
            Request::builder()
                .method("POST")
                .uri("/upload/complete")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }
}

// =============================================================================
// Multipart Bodies
// =============================================================================

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a [u8]),
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"blob\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload/chunk")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

// =============================================================================
// Test Images
// =============================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x ^ y) % 256) as u8])
    })
}

fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

pub fn create_test_bmp(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Bmp)
}

pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Png)
}

// =============================================================================
// Filesystem Helpers
// =============================================================================

/// Names of the entries in `dir`, sorted; empty if `dir` does not exist.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
