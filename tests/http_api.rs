use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use mirror_server::{build_router, config::AppConfig, AppState};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_config(root: &Path, key: Option<&str>) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.root = root.to_path_buf();
    config.log.enabled = false;
    config.stats.network_sample_ms = 0;
    config.extractor.binary = "/nonexistent/mirror-server-extractor".to_string();
    config.extractor.temp_dir = root.join(".tmp");
    config.crypto.key = key.map(str::to_string);
    config
}

fn app_with(key: Option<&str>) -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(test_config(dir.path(), key)).unwrap();
    (dir, build_router(state))
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    call(app, req).await
}

async fn send_form(app: &Router, method: Method, uri: &str, form: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    call(app, req).await
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Serves `payload` at /file.bin honouring `Range: bytes=N-`
async fn spawn_origin(payload: Vec<u8>) -> String {
    let payload = Arc::new(payload);
    let app = Router::new().route(
        "/file.bin",
        get(move |headers: HeaderMap| {
            let payload = payload.clone();
            async move {
                let offset = headers
                    .get(header::RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("bytes="))
                    .and_then(|v| v.trim_end_matches('-').parse::<usize>().ok())
                    .unwrap_or(0);
                if offset >= payload.len() && offset > 0 {
                    return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
                }
                let status = if offset > 0 {
                    StatusCode::PARTIAL_CONTENT
                } else {
                    StatusCode::OK
                };
                (status, payload[offset..].to_vec()).into_response()
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn health_reports_ok() {
    let (_dir, app) = app_with(None);
    let (status, body) = send(&app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "mirror-server");
}

#[tokio::test]
async fn status_starts_empty() {
    let (_dir, app) = app_with(None);
    let (status, body) = send(&app, Method::GET, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"downloads": [], "crypting": []}));
}

#[tokio::test]
async fn missing_parameters_are_rejected() {
    let (_dir, app) = app_with(None);
    for (method, uri) in [
        (Method::POST, "/download"),
        (Method::PUT, "/pause"),
        (Method::PUT, "/resume"),
        (Method::PUT, "/cancel"),
        (Method::POST, "/yt-dlp"),
        (Method::DELETE, "/delete"),
        (Method::POST, "/rename?old_name=a.txt"),
    ] {
        let (status, body) = send(&app, method.clone(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
        assert_eq!(body["code"], 400);
    }
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let (_dir, app) = app_with(None);
    let (status, _) = send(&app, Method::GET, "/download?url=http://h/a").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn pause_and_resume_unknown_are_informational() {
    let (_dir, app) = app_with(None);
    let (status, body) = send(&app, Method::PUT, "/pause?url=http://h/none").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "no such download");

    let (status, _) = send(&app, Method::PUT, "/resume?url=http://h/none").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::PUT, "/cancel?url=http://h/none").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_rejects_non_http_urls() {
    let (_dir, app) = app_with(None);
    let (status, _) = send_form(&app, Method::POST, "/download", "url=ftp%3A%2F%2Fh%2Fa").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn extractor_failure_is_bad_gateway() {
    let (_dir, app) = app_with(None);
    let (status, body) = send(&app, Method::POST, "/yt-dlp?url=https://video.example/watch").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"].as_str().unwrap().contains("extractor"));
}

#[tokio::test]
async fn delete_and_rename_files() {
    let (dir, app) = app_with(None);
    std::fs::write(dir.path().join("clip.mp4"), b"video").unwrap();

    let (status, body) =
        send_form(&app, Method::POST, "/rename", "old_name=clip.mp4&new_name=talk").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "talk.mp4");
    assert!(dir.path().join("talk.mp4").exists());

    let (status, _) = send(&app, Method::DELETE, "/delete?file=talk.mp4").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!dir.path().join("talk.mp4").exists());

    let (status, _) = send(&app, Method::DELETE, "/delete?file=talk.mp4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::DELETE, "/delete?file=../outside.txt").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stored_files_are_served() {
    let (dir, app) = app_with(None);
    std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();

    let req = Request::builder().uri("/hello.txt").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello");

    let (status, _) = send(&app, Method::GET, "/missing.txt").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_reports_storage() {
    let (dir, app) = app_with(None);
    std::fs::write(dir.path().join("a.bin"), vec![0u8; 42]).unwrap();

    let (status, body) = send(&app, Method::GET, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"]["size"], 42);
    assert_eq!(body["transfers"]["total"], 0);
    assert!(body["memory"]["total"].is_number());
}

#[tokio::test]
async fn encryption_needs_a_key() {
    if std::env::var(mirror_server::config::ENCRYPT_KEY_ENV).is_ok() {
        return;
    }
    let (dir, app) = app_with(None);
    std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
    let (status, _) = send(&app, Method::POST, "/encrypt?file=a.txt").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn encrypt_then_decrypt_over_http() {
    let (dir, app) = app_with(Some("correct horse"));
    std::fs::write(dir.path().join("notes.txt"), b"meet at noon").unwrap();

    let (status, body) = send(&app, Method::POST, "/encrypt?file=notes.txt").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["mode"], "encrypt");

    wait_for_status(&app, |s| s["crypting"].as_array().is_some_and(|c| c.is_empty())).await;
    assert!(dir.path().join("notes.txt.crypted").exists());
    std::fs::remove_file(dir.path().join("notes.txt")).unwrap();

    let (status, _) = send(&app, Method::POST, "/decrypt?file=notes.txt.crypted").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_status(&app, |s| s["crypting"].as_array().is_some_and(|c| c.is_empty())).await;
    assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"meet at noon");

    let (status, _) = send(&app, Method::POST, "/decrypt?file=notes.txt").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, Method::POST, "/encrypt?file=absent.txt").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_runs_to_completion() {
    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    let origin = spawn_origin(payload.clone()).await;
    let (dir, app) = app_with(None);
    let url = format!("{}/file.bin", origin);

    let body = serde_json::json!({"url": url, "file_name": "copy.bin"}).to_string();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/download")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["sourceId"], url.as_str());
    assert_eq!(body["data"]["destinationName"], "copy.bin");

    // completed transfers leave the registry
    wait_for_status(&app, |s| s["downloads"].as_array().is_some_and(|d| d.is_empty())).await;
    let target = dir.path().join("copy.bin");
    assert_eq!(std::fs::read(&target).unwrap(), payload);

    let (status, _) = send(&app, Method::PUT, &format!("/cancel?url={}", url)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

async fn wait_for_status(app: &Router, mut done: impl FnMut(&Value) -> bool) {
    for _ in 0..200 {
        let (_, status) = send(app, Method::GET, "/status").await;
        if done(&status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("status condition not reached within 5s");
}
