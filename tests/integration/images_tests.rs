//! Image listing tests.

use axum::http::StatusCode;

use super::test_utils::{create_test_png, dir_entries, TestApp};

#[tokio::test]
async fn test_empty_registry_lists_nothing() {
    let app = TestApp::new().await;

    let (status, json) = app.get("/images/uploaded").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!([]));
    assert!(!app.registry_path().exists());
}

#[tokio::test]
async fn test_lists_in_registration_order() {
    let app = TestApp::new().await;

    for name in ["first.png", "second.png", "third.png"] {
        let image = create_test_png(24, 24);
        let id = app.init().await;
        let total = app.upload(&id, &image, 256).await;
        let (status, _) = app.complete(&id, total, name).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, json) = app.get("/images/uploaded").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["originalFilename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["first.png", "second.png", "third.png"]);
}

#[tokio::test]
async fn test_corrupt_registry() {
    let app = TestApp::new().await;
    std::fs::create_dir_all(app.registry_path().parent().unwrap()).unwrap();
    std::fs::write(app.registry_path(), "[{\"dziBaseName\": ").unwrap();

    let (status, json) = app.get("/images/uploaded").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!([]));

    let image = create_test_png(16, 16);
    let id = app.init().await;
    let total = app.upload(&id, &image, 256).await;
    let (status, json) = app.complete(&id, total, "lost.png").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["kind"], "persistence_error");
    assert_eq!(json["stage"], "registering");

    // The document is left for an operator to repair.
    assert_eq!(
        std::fs::read_to_string(app.registry_path()).unwrap(),
        "[{\"dziBaseName\": "
    );
    // The pyramid was published before registration failed.
    assert!(app.tiles_dir().join("lost.dzi").exists());
    assert!(dir_entries(&app.scratch_dir()).is_empty());
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let app = TestApp::new().await;
    let image = create_test_png(20, 10);
    let id = app.init().await;
    let total = app.upload(&id, &image, 256).await;
    app.complete(&id, total, "kept.bmp.png").await;

    let reopened = dzi_ingest::JsonFileRegistry::new(app.registry_path());
    let records = dzi_ingest::ImageRegistry::list_all(&reopened).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].dzi_base_name, "kept.bmp");
    assert_eq!(records[0].upload_id, id);
}
