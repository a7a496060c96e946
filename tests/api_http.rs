// tests/api_http.rs
//
// HTTP-level tests for the status Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /status  (cursor, subscribers, recent cycles)
// - GET /metrics (only when a Prometheus handle is installed)

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use market_digest_bot::api::{self, AppState};
use market_digest_bot::history::{CycleKind, CycleRecord, StatusBoard};
use market_digest_bot::subscribers::{SubscriberMeta, SubscriberRegistry};

const BODY_LIMIT: usize = 1024 * 1024;

fn state(with_metrics: bool) -> AppState {
    let registry = Arc::new(SubscriberRegistry::in_memory());
    registry.add(1, SubscriberMeta::default()).unwrap();
    registry.add(2, SubscriberMeta::default()).unwrap();
    registry.remove(2).unwrap();

    let status = Arc::new(StatusBoard::new("marketfeed"));
    status.set_cursor(Some(8842));
    status.record_cycle(CycleRecord {
        at: Utc::now(),
        kind: CycleKind::Scheduled,
        outcome: "delivered",
        fetched: 3,
        newest_id: Some(8842),
        attempted: 1,
        succeeded: 1,
        error: None,
    });

    // a detached recorder: rendering works without a global install
    let metrics = with_metrics.then(|| PrometheusBuilder::new().build_recorder().handle());
    AppState {
        status,
        registry,
        metrics,
    }
}

fn test_router(with_metrics: bool) -> Router {
    api::router(state(with_metrics))
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, String::from_utf8(bytes).expect("utf8"))
}

#[tokio::test]
async fn health_returns_200_and_ok_body() {
    let (status, body) = get(test_router(false), "/health").await;
    assert_eq!(status, StatusCode::OK, "health should be 200");
    assert_eq!(body.trim(), "OK");
}

#[tokio::test]
async fn status_reports_cursor_subscribers_and_history() {
    let (status, body) = get(test_router(false), "/status").await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_str(&body).expect("status is JSON");
    assert_eq!(v["channel"], "marketfeed");
    assert_eq!(v["state"], "idle");
    assert_eq!(v["cursor"], 8842);
    assert_eq!(v["active_subscribers"], 1);
    assert_eq!(v["faults"], 0);

    let cycles = v["recent_cycles"].as_array().expect("recent_cycles array");
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0]["kind"], "scheduled");
    assert_eq!(cycles[0]["outcome"], "delivered");
    assert!(cycles[0].get("error").is_none(), "error omitted when absent");
}

#[tokio::test]
async fn metrics_route_absent_without_handle() {
    let (status, _) = get(test_router(false), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_route_served_with_handle() {
    let (status, _) = get(test_router(true), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cors_preflight_is_accepted() {
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/status")
        .header("origin", "http://example.test")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let resp = test_router(false).oneshot(req).await.unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("access-control-allow-origin"));
}
