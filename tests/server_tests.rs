use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use lan_recon_rs::config::ReconConfig;
use lan_recon_rs::server::{router, AppState};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

fn app() -> Router {
    router(AppState::new(ReconConfig::default()))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn fresh_server_is_idle_without_results() {
    let app = app();
    let (status, body) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");

    let (status, _) = call(&app, "GET", "/api/results", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn bad_requests_are_rejected_up_front() {
    let app = app();
    let (status, _) = call(&app, "POST", "/api/scan", Some(json!({"host": "127.0.0.1", "ports": "9-1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/api/scan", Some(json!({"host": "127.0.0.1", "concurrency": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/api/discover", Some(json!({"cidr": "10.0.0.1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/api/cancel", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn oversized_sweep_is_rejected_before_any_job_starts() {
    let app = app();
    let (status, _) = call(
        &app,
        "POST",
        "/api/discover",
        Some(json!({"cidr": "10.0.0.0/30", "sweep_secs": u64::MAX})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(body["state"], "idle");
}

#[tokio::test]
async fn scan_job_runs_to_completion() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/scan",
        Some(json!({"host": "127.0.0.1", "ports": port.to_string(), "timeout_ms": 500})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["state"], "running");
    assert_eq!(body["total"], 1);

    let mut state = Value::Null;
    for _ in 0..50 {
        let (_, body) = call(&app, "GET", "/api/status", None).await;
        state = body["state"].clone();
        if state == "done" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(state, "done");

    let (status, body) = call(&app, "GET", "/api/results", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "scan");
    assert_eq!(body["results"][0]["port"], port);
    assert_eq!(body["results"][0]["state"], "open");
    drop(listener);
}
