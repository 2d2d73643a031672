//! Completion pipeline tests.
//!
//! Tests verify:
//! - Out-of-order chunks reassemble into a complete pyramid
//! - Failures report their stage and clean up what they should
//! - Completed and failed sessions reject further requests

use axum::body::Body;
use axum::http::{Request, StatusCode};

use dzi_ingest::tile::dzi_level_count;
use dzi_ingest::{DziDescriptor, IngestConfig, NamingPolicy};

use super::test_utils::{create_test_bmp, create_test_png, dir_entries, TestApp};

#[tokio::test]
async fn test_reverse_order_chunks_produce_pyramid() {
    let app = TestApp::new().await;
    let (width, height) = (1030, 600);
    let image = create_test_bmp(width, height);
    let chunk_size = image.len().div_ceil(5);
    let id = app.init().await;

    app.send_chunks_in_order(&id, &image, chunk_size, &[4, 3, 2, 1, 0])
        .await;
    let (status, json) = app.complete(&id, 5, "Galaxy.bmp").await;

    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["success"], true);
    assert_eq!(json["dziBaseName"], "Galaxy");
    assert_eq!(json["dziPath"], "./tiles/uploaded/Galaxy.dzi");

    let xml = std::fs::read_to_string(app.tiles_dir().join("Galaxy.dzi")).unwrap();
    let descriptor = DziDescriptor::parse(&xml).unwrap();
    assert_eq!((descriptor.width, descriptor.height), (width, height));
    assert_eq!(descriptor.tile_size, 256);
    assert_eq!(descriptor.overlap, 2);
    assert_eq!(descriptor.format, "jpeg");

    // ceil(log2(1030)) + 1 = 12
    let expected_levels = dzi_level_count(width, height);
    assert_eq!(expected_levels, 12);
    assert_eq!(descriptor.level_count(), expected_levels);
    assert_eq!(
        dir_entries(&app.tiles_dir().join("Galaxy_files")).len(),
        expected_levels
    );

    // Full resolution is a 5x3 grid of tiles.
    assert_eq!(
        dir_entries(&app.tiles_dir().join("Galaxy_files").join("11")).len(),
        15
    );

    assert!(dir_entries(&app.scratch_dir()).is_empty());
}

#[tokio::test]
async fn test_five_megabyte_chunks_pass_body_limit() {
    const CHUNK_BYTES: usize = 5 * 1024 * 1024;
    let app = TestApp::new().await;
    let (width, height) = (2900, 2900);
    // About 25 MB of pixels, well above axum's 2 MiB default body limit per chunk.
    let image = create_test_bmp(width, height);
    assert_eq!(image.chunks(CHUNK_BYTES).count(), 5);
    let id = app.init().await;

    app.send_chunks_in_order(&id, &image, CHUNK_BYTES, &[4, 3, 2, 1, 0])
        .await;
    let (status, json) = app.complete(&id, 5, "Andromeda.bmp").await;

    assert_eq!(status, StatusCode::OK, "{}", json);
    let xml = std::fs::read_to_string(app.tiles_dir().join("Andromeda.dzi")).unwrap();
    let descriptor = DziDescriptor::parse(&xml).unwrap();
    assert_eq!((descriptor.width, descriptor.height), (width, height));
    // ceil(log2(2900)) + 1 = 13
    assert_eq!(descriptor.level_count(), 13);
    assert_eq!(
        dir_entries(&app.tiles_dir().join("Andromeda_files")).len(),
        13
    );
    assert!(dir_entries(&app.scratch_dir()).is_empty());
}

#[tokio::test]
async fn test_completed_image_is_listed() {
    let app = TestApp::new().await;
    let image = create_test_png(120, 80);
    let id = app.init().await;
    let total = app.upload(&id, &image, 1000).await;

    let (status, _) = app.complete(&id, total, "nebula.png").await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = app.get("/images/uploaded").await;
    assert_eq!(status, StatusCode::OK);
    let images = json.as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["dziBaseName"], "nebula");
    assert_eq!(images[0]["dziPath"], "./tiles/uploaded/nebula.dzi");
    assert_eq!(images[0]["originalFilename"], "nebula.png");
    assert_eq!(images[0]["uploadId"], id);
    assert!(images[0]["uploadedAt"].as_str().is_some());
}

#[tokio::test]
async fn test_missing_chunk_reports_index_and_cleans_scratch() {
    let app = TestApp::new().await;
    let id = app.init().await;
    app.send_chunk(&id, 0, b"part zero").await;
    app.send_chunk(&id, 1, b"part one").await;

    let (status, json) = app.complete(&id, 3, "scan.jpg").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert_eq!(json["kind"], "missing_chunk");
    assert_eq!(json["stage"], "assembling");
    assert!(json["error"].as_str().unwrap().contains("missing chunk 2"));

    assert!(dir_entries(&app.scratch_dir()).is_empty());
    assert!(dir_entries(&app.tiles_dir()).is_empty());
}

#[tokio::test]
async fn test_unsupported_format_leaves_chunks() {
    let app = TestApp::new().await;
    let id = app.init().await;
    app.send_chunk(&id, 0, b"GIF89a").await;
    app.send_chunk(&id, 1, b"frames").await;

    let (status, json) = app.complete(&id, 2, "animation.gif").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "unsupported_format");
    assert_eq!(json["stage"], "validating");
    assert_eq!(
        dir_entries(&app.scratch_dir().join(&id)),
        vec!["0.part", "1.part"]
    );

    // The failed session accepts nothing further.
    let (status, json) = app.send_chunk(&id, 2, b"more").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "session_conflict");
    let (status, _) = app.complete(&id, 2, "animation.png").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_undecodable_upload_fails_at_tiling() {
    let app = TestApp::new().await;
    let id = app.init().await;
    app.send_chunk(&id, 0, b"this is plain text, not a TIFF").await;

    let (status, json) = app.complete(&id, 1, "fake.tiff").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["kind"], "tiling_error");
    assert_eq!(json["stage"], "tiling");
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("DZI generation failed"));

    assert!(!app.tiles_dir().join("fake.dzi").exists());
    assert!(dir_entries(&app.tiles_dir()).is_empty());
    assert!(dir_entries(&app.scratch_dir()).is_empty());
}

#[tokio::test]
async fn test_completed_session_is_retired() {
    let app = TestApp::new().await;
    let image = create_test_png(32, 32);
    let id = app.init().await;
    let total = app.upload(&id, &image, 512).await;

    let (status, _) = app.complete(&id, total, "once.png").await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = app.complete(&id, total, "once.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "unknown_session");

    let (status, _) = app.send_chunk(&id, 0, b"late").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_same_filename_overwrites_pyramid() {
    let app = TestApp::new().await;

    for (width, height) in [(300, 300), (50, 20)] {
        let image = create_test_png(width, height);
        let id = app.init().await;
        let total = app.upload(&id, &image, 4096).await;
        let (status, _) = app.complete(&id, total, "same.png").await;
        assert_eq!(status, StatusCode::OK);
    }

    let xml = std::fs::read_to_string(app.tiles_dir().join("same.dzi")).unwrap();
    let descriptor = DziDescriptor::parse(&xml).unwrap();
    assert_eq!((descriptor.width, descriptor.height), (50, 20));
    assert_eq!(dir_entries(&app.tiles_dir().join("same_files")).len(), 7);

    let (_, json) = app.get("/images/uploaded").await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_content_hash_naming_keeps_both() {
    let app = TestApp::with_config(IngestConfig {
        naming: NamingPolicy::ContentHash,
        ..IngestConfig::default()
    })
    .await;

    let mut names = Vec::new();
    for (width, height) in [(40, 40), (41, 40)] {
        let image = create_test_png(width, height);
        let id = app.init().await;
        let total = app.upload(&id, &image, 4096).await;
        let (status, json) = app.complete(&id, total, "same.png").await;
        assert_eq!(status, StatusCode::OK);
        names.push(json["dziBaseName"].as_str().unwrap().to_string());
    }

    assert_ne!(names[0], names[1]);
    for name in &names {
        assert!(name.starts_with("same-"));
        assert_eq!(name.len(), "same-".len() + 12);
        assert!(app.tiles_dir().join(format!("{}.dzi", name)).exists());
    }
}

#[tokio::test]
async fn test_malformed_complete_body() {
    let app = TestApp::new().await;
    let id = app.init().await;

    let bodies = [
        "not json".to_string(),
        serde_json::json!({ "uploadId": id, "filename": "a.png" }).to_string(),
        serde_json::json!({ "uploadId": id, "totalChunks": -3, "filename": "a.png" }).to_string(),
    ];

    for body in bodies {
        let (status, json) = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/upload/complete")
                    .header("content-type", "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        assert_eq!(json["kind"], "invalid_request");
    }

    let (status, _) = app.complete(&id, 0, "a.png").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // None of this consumed the session.
    let (status, _) = app.send_chunk(&id, 0, b"still open").await;
    assert_eq!(status, StatusCode::OK);
}
