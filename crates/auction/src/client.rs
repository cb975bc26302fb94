//! Capability interface for talking to a cell.
//!
//! The scheduler only ever needs two remote operations: fetch a state
//! snapshot and hand over a batch of work. [`HttpCellClient`] speaks to real
//! cells; [`FakeCellClient`] is an in-memory double that records calls.
//!
//! [`HttpCellClient`]: crate::http_client::HttpCellClient

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::types::{CellState, Work};

#[async_trait]
pub trait CellClient: Send + Sync {
    /// Fetch the cell's current state.
    async fn fetch_state(&self) -> Result<CellState, ClientError>;

    /// Submit work to the cell. Returns the subset the cell rejected.
    async fn perform(&self, work: &Work) -> Result<Work, ClientError>;

    /// Timeout applied to `fetch_state`.
    fn state_timeout(&self) -> Duration;

    fn set_state_timeout(&self, timeout: Duration);
}

// ── In-memory double ───────────────────────────────────────────

#[derive(Debug)]
struct FakeInner {
    state: Result<CellState, String>,
    perform_result: Result<Work, String>,
    fetch_calls: usize,
    perform_calls: Vec<Work>,
    state_timeout: Duration,
}

/// In-memory [`CellClient`] with configurable responses.
///
/// By default it reports an empty state, accepts all work and uses a one
/// second state timeout.
#[derive(Debug)]
pub struct FakeCellClient {
    inner: Mutex<FakeInner>,
}

impl FakeCellClient {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FakeInner {
                state: Ok(CellState::default()),
                perform_result: Ok(Work::default()),
                fetch_calls: 0,
                perform_calls: Vec::new(),
                state_timeout: Duration::from_secs(1),
            }),
        }
    }

    pub fn with_state(self, state: CellState) -> Self {
        self.set_state(state);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: CellState) {
        self.lock().state = Ok(state);
    }

    pub fn set_state_error(&self, reason: &str) {
        self.lock().state = Err(reason.to_string());
    }

    /// Reject `failed` on every subsequent `perform`.
    pub fn set_perform_rejects(&self, failed: Work) {
        self.lock().perform_result = Ok(failed);
    }

    pub fn set_perform_error(&self, reason: &str) {
        self.lock().perform_result = Err(reason.to_string());
    }

    pub fn fetch_state_call_count(&self) -> usize {
        self.lock().fetch_calls
    }

    pub fn perform_call_count(&self) -> usize {
        self.lock().perform_calls.len()
    }

    pub fn perform_args_for_call(&self, call: usize) -> Option<Work> {
        self.lock().perform_calls.get(call).cloned()
    }
}

impl Default for FakeCellClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CellClient for FakeCellClient {
    async fn fetch_state(&self) -> Result<CellState, ClientError> {
        let mut inner = self.lock();
        inner.fetch_calls += 1;
        inner.state.clone().map_err(ClientError::Unavailable)
    }

    async fn perform(&self, work: &Work) -> Result<Work, ClientError> {
        let mut inner = self.lock();
        inner.perform_calls.push(work.clone());
        inner.perform_result.clone().map_err(ClientError::Unavailable)
    }

    fn state_timeout(&self) -> Duration {
        self.lock().state_timeout
    }

    fn set_state_timeout(&self, timeout: Duration) {
        self.lock().state_timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_records_perform_calls() {
        let client = FakeCellClient::new();
        let work = Work::default();

        let failed = client.perform(&work).await.unwrap();
        assert!(failed.is_empty());
        assert_eq!(client.perform_call_count(), 1);
        assert_eq!(client.perform_args_for_call(0), Some(work));
    }

    #[tokio::test]
    async fn fake_state_error_counts_calls() {
        let client = FakeCellClient::new();
        client.set_state_error("boom");

        assert!(client.fetch_state().await.is_err());
        assert!(client.fetch_state().await.is_err());
        assert_eq!(client.fetch_state_call_count(), 2);
    }
}
