//! Static-roster runner delegate.
//!
//! Builds a fresh [`HttpCellClient`] per configured cell on every pass, so
//! timeouts doubled by a previous pass's retries never leak into the next.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auction::{
    AuctionResults, AuctionRunnerDelegate, CellClient, CellClients, ClientError, HttpCellClient,
};
use tracing::{info, warn};

use crate::config::{AuctioneerConfig, CellConfig};

pub struct StaticRosterDelegate {
    cells: Vec<CellConfig>,
    state_timeout: Duration,
    communication_timeout: Duration,
}

impl StaticRosterDelegate {
    pub fn new(
        cells: Vec<CellConfig>,
        state_timeout: Duration,
        communication_timeout: Duration,
    ) -> Self {
        Self {
            cells,
            state_timeout,
            communication_timeout,
        }
    }

    pub fn from_config(config: &AuctioneerConfig) -> Self {
        Self::new(
            config.cells.clone(),
            config.cell_state_timeout(),
            config.communication_timeout(),
        )
    }
}

#[async_trait]
impl AuctionRunnerDelegate for StaticRosterDelegate {
    async fn fetch_cell_reps(&self) -> Result<CellClients, ClientError> {
        let clients = self
            .cells
            .iter()
            .map(|cell| {
                let client: Arc<dyn CellClient> = Arc::new(HttpCellClient::new(
                    &cell.address,
                    self.state_timeout,
                    self.communication_timeout,
                ));
                (cell.guid.clone(), client)
            })
            .collect();
        Ok(clients)
    }

    fn auction_completed(&self, results: &AuctionResults) {
        for auction in &results.failed_lrps {
            warn!(
                process_guid = %auction.lrp.process_guid,
                index = auction.lrp.index,
                attempts = auction.record.attempts,
                error = %auction.record.placement_error,
                "lrp auction failed"
            );
        }
        for auction in &results.failed_tasks {
            warn!(
                task_guid = %auction.task.task_guid,
                attempts = auction.record.attempts,
                error = %auction.record.placement_error,
                "task auction failed"
            );
        }
        info!(
            successful_lrps = results.successful_lrps.len(),
            successful_tasks = results.successful_tasks.len(),
            failed_lrps = results.failed_lrps.len(),
            failed_tasks = results.failed_tasks.len(),
            "auction results"
        );
    }
}
