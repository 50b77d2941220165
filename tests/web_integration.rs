mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::Frame;
use frame_playback::config::ScriptsConfig;
use frame_playback::supervisor::ScriptSupervisor;
use frame_playback::web::{AppState, router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

fn app(frame: &Frame) -> Router {
    router(AppState {
        navigator: frame.navigator.clone(),
        scripts: Arc::new(ScriptSupervisor::new(ScriptsConfig {
            dir: frame.tmp.path().join("scripts"),
            ..ScriptsConfig::default()
        })),
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.expect("router response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn post_json(app: &Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn next_and_previous_return_the_viewer_reference() {
    let frame = Frame::with_main(&["a.jpg", "b.jpg"]);
    let app = app(&frame);

    let (status, body) = get_json(&app, "/playback/next").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "a.jpg");
    assert_eq!(body["image"], "/static/current.jpg");

    let (_, body) = get_json(&app, "/playback/next").await;
    assert_eq!(body["filename"], "b.jpg");
    let (_, body) = get_json(&app, "/playback/previous").await;
    assert_eq!(body["filename"], "a.jpg");
    assert_eq!(frame.navigator.wake().revision(), 3);
}

#[tokio::test]
async fn slow_viewer_does_not_stall_the_runtime() {
    let frame = Frame::with_slow_viewer(&["a.jpg", "b.jpg"], Duration::from_millis(600));
    let app = app(&frame);

    let request = Request::get("/playback/next").body(Body::empty()).unwrap();
    let pending = tokio::spawn(app.clone().oneshot(request));

    // Single-threaded runtime: the request runs at the yield, and this
    // timer only fires on time if the request is not holding the worker.
    let started = Instant::now();
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "timer delayed by {:?}",
        started.elapsed()
    );

    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(frame.control.refreshes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn current_image_and_mtime_follow_publication() {
    let frame = Frame::with_main(&["a.jpg"]);
    let app = app(&frame);

    let (_, body) = get_json(&app, "/playback/viewer-mtime").await;
    assert!(body["mtime"].is_null());
    let request = Request::get("/playback/current-full").body(Body::empty()).unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::NOT_FOUND);

    let (status, _) = post_json(&app, "/playback/jump", json!({"path": "/static/uploads/main/a.jpg"})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get_json(&app, "/playback/viewer-mtime").await;
    assert!(body["mtime"].as_f64().unwrap() > 0.0);

    let request = Request::get("/playback/current-full").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"a.jpg");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_maps_errors_to_status_codes() {
    let frame = Frame::with_main(&["a.jpg", "b.jpg"]);
    let app = app(&frame);

    let (status, body) = post_json(&app, "/playback/delete", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("file"));

    let (status, _) = post_json(&app, "/playback/delete", json!({"file": "ghost.jpg"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_json(&app, "/playback/delete", json!({"file": "a.jpg"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "b.jpg");

    let (_, body) = post_json(&app, "/playback/delete", json!({"file": "b.jpg"})).await;
    assert!(body["filename"].is_null());
    assert!(body["image"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn settings_endpoints_update_the_document() {
    let frame = Frame::with_main(&["a.jpg"]);
    let app = app(&frame);

    let (status, _) = post_json(&app, "/playback/set-delay", json!({"minutes": 0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = post_json(&app, "/playback/set-delay", json!({"minutes": 3})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delay"], 180);

    let (_, body) = post_json(&app, "/playback/weighted-shuffle", json!({"enabled": true})).await;
    assert_eq!(body["weighted_shuffle"], true);

    let (_, body) = get_json(&app, "/playback/config").await;
    assert_eq!(body["delay"], 180);
    assert_eq!(body["weighted_shuffle"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn folders_can_be_created_selected_and_listed() {
    let frame = Frame::with_main(&["a.jpg"]);
    let app = app(&frame);

    let (status, body) = post_json(&app, "/folders", json!({"name": "trip"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["folder"], "trip");
    let (status, _) = post_json(&app, "/folders", json!({"name": "../up"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    frame.folder("trip", &["b.jpg", "c.jpg"]);
    let (status, _) = post_json(&app, "/folders/trip/order", json!({"order": ["c.jpg", "b.jpg"]})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = post_json(&app, "/playback/select-folder", json!({"folder": "trip"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "c.jpg");

    let (_, body) = get_json(&app, "/folders").await;
    assert_eq!(body["folders"], json!(["main", "trip"]));
    assert_eq!(body["current"], "trip");

    let (_, body) = get_json(&app, "/folders/trip/images?sort=custom").await;
    assert_eq!(body["images"], json!(["c.jpg", "b.jpg"]));
    assert_eq!(body["total"], 2);
    assert_eq!(body["current_index"], 0);

    let (_, body) = get_json(&app, "/playback/browse").await;
    assert_eq!(body["folder"], "trip");
    assert_eq!(body["order"], json!(["c.jpg", "b.jpg"]));

    let (status, _) = post_json(&app, "/playback/select-folder", json!({"folder": "nope"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uploads_are_stored_and_thumbnailed() {
    let frame = Frame::with_main(&[]);
    let app = app(&frame);

    let img = image::RgbImage::from_pixel(400, 200, image::Rgb([10, 120, 200]));
    let mut png = std::io::Cursor::new(Vec::new());
    img.write_to(&mut png, image::ImageFormat::Png).unwrap();

    let request = Request::post("/folders/main/upload?name=sea.png")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(png.into_inner()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["filename"], "sea.png");

    let request = Request::get("/thumbs/main/sea.png").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let request = Request::get("/thumbs/main/missing.png").body(Body::empty()).unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scripts_outside_the_allow_list_are_forbidden() {
    let frame = Frame::new();
    let app = app(&frame);

    let (_, body) = get_json(&app, "/scripts/active").await;
    assert!(body["script"].is_null());
    let (status, body) = post_json(&app, "/scripts/launch", json!({"script": "PlainClock.py"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    let request = Request::post("/scripts/cancel").body(Body::empty()).unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::NO_CONTENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zoom_always_acknowledges() {
    let frame = Frame::with_main(&["a.jpg"]);
    let app = app(&frame);
    let (status, _) = post_json(&app, "/viewer/zoom", json!({"direction": "in"})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = post_json(&app, "/viewer/zoom", json!({"direction": "sideways"})).await;
    assert!(status.is_client_error());
}
