//! Builds the zone map for a pass by fetching every cell's state.
//!
//! Fetches run concurrently through the [`WorkPool`]. A cell that fails to
//! answer is left out, as is one that is evacuating. If no cell at all
//! answers, the whole fetch is retried a bounded number of times with a
//! growing delay, and the failed clients get a longer state timeout.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::cell::Cell;
use crate::client::CellClient;
use crate::delegate::{AuctionMetricEmitterDelegate, CellClients};
use crate::error::ClientError;
use crate::types::CellState;
use crate::workpool::WorkPool;
use crate::zone::{Zone, Zones};

/// Outer retry policy for a fetch that produced no zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Sleep after the first empty attempt; doubles each time.
    pub base_delay: Duration,
}

impl Default for FetchRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
        }
    }
}

pub async fn fetch_state_and_build_zones(
    pool: &WorkPool,
    clients: &CellClients,
    metric_emitter: &dyn AuctionMetricEmitterDelegate,
    policy: FetchRetryPolicy,
) -> Zones {
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;

    for attempt in 1..=attempts {
        let (zones, failed) = fetch_once(pool, clients, metric_emitter).await;
        if !zones.is_empty() || clients.is_empty() {
            debug!(attempt, zones = zones.len(), "zones built");
            return zones;
        }
        if attempt == attempts {
            break;
        }

        for client in &failed {
            client.set_state_timeout(client.state_timeout() * 2);
        }
        warn!(attempt, ?delay, failed = failed.len(), "no cells reachable, retrying state fetch");
        tokio::time::sleep(delay).await;
        delay *= 2;
    }

    warn!(attempts, "giving up on state fetch");
    Zones::new()
}

async fn fetch_once(
    pool: &WorkPool,
    clients: &CellClients,
    metric_emitter: &dyn AuctionMetricEmitterDelegate,
) -> (Zones, Vec<Arc<dyn CellClient>>) {
    let fetches: Vec<BoxFuture<'static, FetchOutcome>> = clients
        .iter()
        .map(|(guid, client)| fetch_cell(guid.clone(), client.clone()).boxed())
        .collect();
    let responses = pool.run_all(fetches).await;

    let mut zones = Zones::new();
    let mut failed = Vec::new();
    for (guid, client, result) in responses {
        match result {
            Ok(state) if state.evacuating => {
                debug!(cell_guid = %guid, "skipping evacuating cell");
            }
            Ok(state) => {
                zones
                    .entry(state.zone.clone())
                    .or_insert_with(Zone::default)
                    .push(Cell::new(&guid, client, state));
            }
            Err(e) => {
                info!(cell_guid = %guid, error = %e, "failed to fetch cell state");
                metric_emitter.failed_cell_state_request();
                failed.push(client);
            }
        }
    }

    // Responses arrive in completion order; fix the order for stable tie-breaks.
    for zone in zones.values_mut() {
        zone.sort_by_guid();
    }
    (zones, failed)
}

type FetchOutcome = (String, Arc<dyn CellClient>, Result<CellState, ClientError>);

async fn fetch_cell(guid: String, client: Arc<dyn CellClient>) -> FetchOutcome {
    let result = client.fetch_state().await;
    (guid, client, result)
}
