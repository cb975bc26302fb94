//! Hooks the runner calls into its host service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::CellClient;
use crate::error::ClientError;
use crate::types::AuctionResults;

/// Cell clients keyed by cell guid.
pub type CellClients = HashMap<String, Arc<dyn CellClient>>;

#[async_trait]
pub trait AuctionRunnerDelegate: Send + Sync {
    /// Current roster of cells to auction against.
    async fn fetch_cell_reps(&self) -> Result<CellClients, ClientError>;

    /// Called once per pass with the final results.
    fn auction_completed(&self, results: &AuctionResults);
}

pub trait AuctionMetricEmitterDelegate: Send + Sync {
    fn fetch_states_completed(&self, elapsed: Duration);

    fn failed_cell_state_request(&self);

    fn auction_completed(&self, results: &AuctionResults);
}
