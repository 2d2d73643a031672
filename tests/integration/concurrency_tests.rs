//! Concurrent upload tests.
//!
//! Tests verify:
//! - Parallel completions each register exactly one record
//! - Only one of several racing completions of the same upload runs

use std::sync::Arc;

use axum::http::StatusCode;

use super::test_utils::{create_test_png, dir_entries, TestApp};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_uploads_all_registered() {
    const UPLOADS: usize = 8;
    let app = Arc::new(TestApp::new().await);

    let mut handles = Vec::new();
    for n in 0..UPLOADS {
        let app = Arc::clone(&app);
        handles.push(tokio::spawn(async move {
            let image = create_test_png(64 + n as u32, 48);
            let id = app.init().await;
            let total = app.upload(&id, &image, 2048).await;
            let filename = format!("parallel-{}.png", n);
            let (status, json) = app.complete(&id, total, &filename).await;
            assert_eq!(status, StatusCode::OK, "{}", json);
            json["dziBaseName"].as_str().unwrap().to_string()
        }));
    }

    let mut names = Vec::new();
    for handle in handles {
        names.push(handle.await.unwrap());
    }
    names.sort();

    let (_, json) = app.get("/images/uploaded").await;
    let mut listed: Vec<String> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["dziBaseName"].as_str().unwrap().to_string())
        .collect();
    listed.sort();

    assert_eq!(listed.len(), UPLOADS);
    assert_eq!(listed, names);
    assert_eq!(dir_entries(&app.tiles_dir()).len(), UPLOADS * 2);
    assert!(dir_entries(&app.scratch_dir()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_completions_run_once() {
    const RACERS: usize = 6;
    let app = Arc::new(TestApp::new().await);
    let image = create_test_png(200, 120);
    let id = app.init().await;
    let total = app.upload(&id, &image, 4096).await;

    let mut handles = Vec::new();
    for _ in 0..RACERS {
        let app = Arc::clone(&app);
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            app.complete(&id, total, "contested.png").await.0
        }));
    }

    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }

    let succeeded = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    assert_eq!(succeeded, 1, "statuses: {:?}", statuses);
    // Losers either hit the running completion or the retired session.
    assert!(statuses.iter().all(|s| matches!(
        *s,
        StatusCode::OK | StatusCode::CONFLICT | StatusCode::NOT_FOUND
    )));

    let (_, json) = app.get("/images/uploaded").await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_chunks_stay_separate() {
    let app = Arc::new(TestApp::new().await);
    let first = create_test_png(90, 60);
    let second = create_test_png(60, 90);
    let first_id = app.init().await;
    let second_id = app.init().await;

    let a = {
        let app = Arc::clone(&app);
        let id = first_id.clone();
        tokio::spawn(async move { app.upload(&id, &first, 300).await })
    };
    let b = {
        let app = Arc::clone(&app);
        let id = second_id.clone();
        tokio::spawn(async move { app.upload(&id, &second, 300).await })
    };
    let first_total = a.await.unwrap();
    let second_total = b.await.unwrap();

    let (status, _) = app.complete(&first_id, first_total, "wide.png").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.complete(&second_id, second_total, "tall.png").await;
    assert_eq!(status, StatusCode::OK);

    let wide = std::fs::read_to_string(app.tiles_dir().join("wide.dzi")).unwrap();
    let tall = std::fs::read_to_string(app.tiles_dir().join("tall.dzi")).unwrap();
    assert!(wide.contains("Width=\"90\"") && wide.contains("Height=\"60\""));
    assert!(tall.contains("Width=\"60\"") && tall.contains("Height=\"90\""));
}
