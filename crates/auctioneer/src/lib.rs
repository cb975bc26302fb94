//! auctioneer: HTTP front end and daemon wiring for the auction runner.
//!
//! Accepts start requests over HTTP, queues them on a shared
//! [`AuctionRunner`], and exposes pass metrics for scraping. Cells come
//! from the static roster in `auctioneer.toml`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/v1/lrps/auctions` | Queue LRP start requests (JSON array) |
//! | POST | `/v1/tasks/auctions` | Queue task start requests (JSON array) |
//! | GET | `/metrics` | Prometheus exposition |

pub mod config;
pub mod delegate;
pub mod handlers;
pub mod metrics;

use std::sync::Arc;

use auction::AuctionRunner;
use axum::Router;
use axum::routing::{get, post};

use crate::metrics::AuctionMetrics;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<AuctionRunner>,
    pub metrics: Arc<AuctionMetrics>,
}

/// Build the intake + metrics router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/lrps/auctions", post(handlers::create_lrp_auctions))
        .route("/v1/tasks/auctions", post(handlers::create_task_auctions))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
