//! The auction control loop.
//!
//! Producers enqueue starts through [`AuctionRunner::schedule_lrps_for_auctions`]
//! and [`AuctionRunner::schedule_tasks_for_auctions`]. [`AuctionRunner::run`]
//! wakes on the batch doorbell and runs one pass at a time:
//!
//! 1. drain and dedupe the batch
//! 2. fetch the cell roster from the delegate
//! 3. fetch cell states and build zones
//! 4. schedule, commit, reconcile
//! 5. report results to the delegate and the metric emitter
//!
//! Shutdown is only observed between passes.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};

use crate::batch::Batch;
use crate::clock::Clock;
use crate::delegate::{AuctionMetricEmitterDelegate, AuctionRunnerDelegate, CellClients};
use crate::scheduler::Scheduler;
use crate::types::{AuctionRequest, AuctionResults, LrpStartRequest, TaskStartRequest};
use crate::workpool::WorkPool;
use crate::zone_builder::{FetchRetryPolicy, fetch_state_and_build_zones};

pub struct AuctionRunner {
    delegate: Arc<dyn AuctionRunnerDelegate>,
    metric_emitter: Arc<dyn AuctionMetricEmitterDelegate>,
    batch: Batch,
    clock: Arc<dyn Clock>,
    pool: WorkPool,
    starting_container_weight: f64,
    starting_container_count_maximum: i64,
    fetch_retry: FetchRetryPolicy,
}

impl AuctionRunner {
    pub fn new(
        delegate: Arc<dyn AuctionRunnerDelegate>,
        metric_emitter: Arc<dyn AuctionMetricEmitterDelegate>,
        clock: Arc<dyn Clock>,
        pool: WorkPool,
        starting_container_weight: f64,
        starting_container_count_maximum: i64,
    ) -> Self {
        Self {
            delegate,
            metric_emitter,
            batch: Batch::new(clock.clone()),
            clock,
            pool,
            starting_container_weight,
            starting_container_count_maximum,
            fetch_retry: FetchRetryPolicy::default(),
        }
    }

    pub fn with_fetch_retry(mut self, policy: FetchRetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn schedule_lrps_for_auctions(&self, starts: &[LrpStartRequest]) {
        self.batch.add_lrp_starts(starts);
    }

    pub fn schedule_tasks_for_auctions(&self, tasks: &[TaskStartRequest]) {
        self.batch.add_tasks(tasks);
    }

    /// Signal `ready`, then run passes until `shutdown` changes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, ready: oneshot::Sender<()>) {
        let _ = ready.send(());
        info!(workers = self.pool.workers(), "auction runner started");

        loop {
            tokio::select! {
                _ = self.batch.has_work() => {
                    self.run_pass().await;
                }
                _ = shutdown.changed() => {
                    info!("auction runner shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single pass over whatever is queued. An empty batch is a no-op.
    pub async fn run_pass(&self) -> AuctionResults {
        let (lrps, tasks) = self.batch.dedupe_and_drain();
        if lrps.is_empty() && tasks.is_empty() {
            debug!("woken with an empty batch");
            return AuctionResults::default();
        }

        let started = Instant::now();
        let clients = match self.delegate.fetch_cell_reps().await {
            Ok(clients) => clients,
            Err(e) => {
                error!(error = %e, "failed to fetch cell reps");
                CellClients::new()
            }
        };

        let zones = fetch_state_and_build_zones(
            &self.pool,
            &clients,
            self.metric_emitter.as_ref(),
            self.fetch_retry,
        )
        .await;
        let fetch_duration = started.elapsed();
        self.metric_emitter.fetch_states_completed(fetch_duration);
        info!(
            cells = clients.len(),
            zones = zones.len(),
            lrps = lrps.len(),
            tasks = tasks.len(),
            ?fetch_duration,
            "cell states fetched, scheduling"
        );

        let mut scheduler = Scheduler::new(
            self.pool,
            zones,
            self.clock.clone(),
            self.starting_container_weight,
            self.starting_container_count_maximum,
        );
        let results = scheduler.schedule(AuctionRequest { lrps, tasks }).await;

        info!(elapsed = ?started.elapsed(), "auction complete");
        self.metric_emitter.auction_completed(&results);
        self.delegate.auction_completed(&results);
        results
    }
}
