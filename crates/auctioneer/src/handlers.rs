//! HTTP intake handlers.
//!
//! Bodies are parsed by hand rather than through the `Json` extractor so a
//! malformed array gets the same `{"error": ...}` shape as a failed
//! validation. A request is enqueued only if every entry validates.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use auction::{AuctionResult, LrpStartRequest, TaskStartRequest};

use crate::AppState;

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
}

fn accepted() -> impl IntoResponse {
    (StatusCode::ACCEPTED, Json(serde_json::json!({})))
}

/// Decode a JSON array and validate every entry.
fn parse_all<T: DeserializeOwned>(
    body: &[u8],
    validate: impl Fn(&T) -> AuctionResult<()>,
) -> Result<Vec<T>, String> {
    let requests: Vec<T> =
        serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))?;
    for request in &requests {
        validate(request).map_err(|e| e.to_string())?;
    }
    Ok(requests)
}

// ── Auctions ───────────────────────────────────────────────────

/// POST /v1/lrps/auctions
pub async fn create_lrp_auctions(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match parse_all(&body, LrpStartRequest::validate) {
        Ok(starts) => {
            debug!(count = starts.len(), "lrp starts received");
            state.runner.schedule_lrps_for_auctions(&starts);
            accepted().into_response()
        }
        Err(msg) => {
            warn!(error = %msg, "rejected lrp auction request");
            error_response(&msg, StatusCode::BAD_REQUEST).into_response()
        }
    }
}

/// POST /v1/tasks/auctions
pub async fn create_task_auctions(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match parse_all(&body, TaskStartRequest::validate) {
        Ok(tasks) => {
            debug!(count = tasks.len(), "task starts received");
            state.runner.schedule_tasks_for_auctions(&tasks);
            accepted().into_response()
        }
        Err(msg) => {
            warn!(error = %msg, "rejected task auction request");
            error_response(&msg, StatusCode::BAD_REQUEST).into_response()
        }
    }
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render_prometheus(),
    )
}
