//! Intake regression tests.
//!
//! Drive the full router with `oneshot` requests and check what lands in
//! the runner's batch.

use std::sync::Arc;
use std::time::Duration;

use auction::{AuctionRunner, FakeClock, WorkPool};
use auctioneer::delegate::StaticRosterDelegate;
use auctioneer::metrics::AuctionMetrics;
use auctioneer::{AppState, build_router};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

fn test_state() -> AppState {
    let metrics = Arc::new(AuctionMetrics::new());
    let delegate = Arc::new(StaticRosterDelegate::new(
        Vec::new(),
        Duration::from_millis(100),
        Duration::from_millis(100),
    ));
    let runner = AuctionRunner::new(
        delegate,
        metrics.clone(),
        Arc::new(FakeClock::default()),
        WorkPool::new(4).unwrap(),
        0.25,
        0,
    );
    AppState {
        runner: Arc::new(runner),
        metrics,
    }
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn lrp_starts_are_queued_per_index() {
    let state = test_state();
    let router = build_router(state.clone());

    let body = r#"[
        {"process_guid": "pg-1", "domain": "d", "indices": [0, 1, 2],
         "resource": {"memory_mb": 64, "disk_mb": 128},
         "placement_constraint": {"root_fs": "preloaded:linux", "placement_tags": ["blue"]}},
        {"process_guid": "pg-2", "domain": "d", "indices": [4],
         "resource": {"memory_mb": 64, "disk_mb": 128, "max_pids": 100},
         "placement_constraint": {"root_fs": "docker://busybox"}}
    ]"#;
    let resp = router.oneshot(post("/v1/lrps/auctions", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(resp).await, serde_json::json!({}));

    let (lrps, tasks) = state.runner.batch().dedupe_and_drain();
    assert!(tasks.is_empty());
    let ids: Vec<String> = lrps.iter().map(|a| a.identifier()).collect();
    assert_eq!(ids, vec!["pg-1.0", "pg-1.1", "pg-1.2", "pg-2.4"]);
    assert_eq!(lrps[0].lrp.placement_constraint.placement_tags, vec!["blue".to_string()]);
    assert_eq!(lrps[3].lrp.resource.max_pids, 100);
}

#[tokio::test]
async fn duplicate_submissions_dedupe_on_drain() {
    let state = test_state();
    let body = r#"[{"task_guid": "tg-1", "domain": "d",
        "resource": {"memory_mb": 10, "disk_mb": 10},
        "placement_constraint": {"root_fs": "preloaded:linux"}}]"#;

    for _ in 0..2 {
        let resp = build_router(state.clone())
            .oneshot(post("/v1/tasks/auctions", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }
    assert_eq!(state.runner.batch().pending(), (0, 2));

    let (_, tasks) = state.runner.batch().dedupe_and_drain();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].identifier(), "tg-1");
}

#[tokio::test]
async fn lrp_without_indices_is_rejected() {
    let state = test_state();
    let body = r#"[{"process_guid": "pg-1", "domain": "d", "indices": [],
        "resource": {"memory_mb": 10, "disk_mb": 10},
        "placement_constraint": {"root_fs": "preloaded:linux"}}]"#;

    let resp = build_router(state.clone())
        .oneshot(post("/v1/lrps/auctions", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().contains("indices"));
    assert_eq!(state.runner.batch().pending(), (0, 0));
}

#[tokio::test]
async fn task_without_root_fs_is_rejected() {
    let state = test_state();
    let body = r#"[{"task_guid": "tg-1", "domain": "d",
        "resource": {"memory_mb": 10, "disk_mb": 10}}]"#;

    let resp = build_router(state.clone())
        .oneshot(post("/v1/tasks/auctions", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().contains("root_fs"));
}

#[tokio::test]
async fn non_array_body_is_rejected() {
    let state = test_state();
    let resp = build_router(state.clone())
        .oneshot(post("/v1/lrps/auctions", r#"{"process_guid": "pg-1"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().starts_with("invalid request body"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let resp = build_router(test_state())
        .oneshot(Request::builder().uri("/v1/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_reflect_completed_passes() {
    let state = test_state();
    let body = r#"[{"task_guid": "tg-1", "domain": "d",
        "resource": {"memory_mb": 10, "disk_mb": 10},
        "placement_constraint": {"root_fs": "preloaded:linux"}}]"#;
    build_router(state.clone())
        .oneshot(post("/v1/tasks/auctions", body))
        .await
        .unwrap();

    // Empty roster: the task fails for lack of cells.
    let results = state.runner.run_pass().await;
    assert_eq!(results.failed_tasks.len(), 1);

    let resp = build_router(state)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("auctioneer_task_auctions_failed_total 1\n"));
    assert!(text.contains("auctioneer_auction_passes_total 1\n"));
}
