//! One scheduling pass: decide, commit, reconcile.
//!
//! # Components
//!
//! - **Ordering**: LRPs sort by index then memory (largest first), tasks by
//!   memory. Index-0 LRPs are placed before every task; higher indices after.
//! - **Decision**: each item is scored against every compatible cell and
//!   reserved on the lowest score. Reservations mutate the cell snapshot, so
//!   later items see earlier decisions. This phase is strictly sequential.
//! - **Commit**: every cell with reserved work is committed concurrently
//!   through the [`WorkPool`].
//! - **Reconcile**: items a cell rejected move back to the failed bucket.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::cell::Cell;
use crate::clock::Clock;
use crate::error::{AuctionError, AuctionResult, ProblemSet};
use crate::types::{
    AuctionRecord, AuctionRequest, AuctionResults, Lrp, LrpAuction, Task, TaskAuction, Work,
};
use crate::workpool::WorkPool;
use crate::zone::{FilteredZone, Zones, filter_zones, sort_zones_by_instances};

/// Scores at or above this never win.
const NO_BID: f64 = 1e20;

pub struct Scheduler {
    pool: WorkPool,
    zones: Zones,
    clock: Arc<dyn Clock>,
    starting_container_weight: f64,
    /// Cap on containers starting fleet-wide. Zero or negative disables it.
    starting_container_count_maximum: i64,
    inflight: i64,
}

impl Scheduler {
    pub fn new(
        pool: WorkPool,
        zones: Zones,
        clock: Arc<dyn Clock>,
        starting_container_weight: f64,
        starting_container_count_maximum: i64,
    ) -> Self {
        let inflight = zones
            .values()
            .flat_map(|zone| zone.cells())
            .map(|cell| i64::from(cell.state().starting_container_count))
            .sum();

        Self {
            pool,
            zones,
            clock,
            starting_container_weight,
            starting_container_count_maximum,
            inflight,
        }
    }

    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    pub async fn schedule(&mut self, request: AuctionRequest) -> AuctionResults {
        let AuctionRequest { mut lrps, mut tasks } = request;
        let mut results = AuctionResults::default();

        if self.zones.is_empty() {
            let reason = AuctionError::CellCommunication.to_string();
            warn!(lrps = lrps.len(), tasks = tasks.len(), "no cells available, failing all work");
            for auction in &mut lrps {
                auction.record.placement_error = reason.clone();
            }
            for auction in &mut tasks {
                auction.record.placement_error = reason.clone();
            }
            results.failed_lrps = lrps;
            results.failed_tasks = tasks;
            return self.mark_results(results);
        }

        sort_lrps(&mut lrps);
        sort_tasks(&mut tasks);
        let (lrps_before_tasks, lrps_after_tasks): (Vec<_>, Vec<_>) =
            lrps.into_iter().partition(|auction| auction.lrp.index == 0);

        let mut successful_lrps = Vec::new();
        let mut successful_tasks = Vec::new();

        self.auction_lrps(lrps_before_tasks, &mut successful_lrps, &mut results);
        for mut auction in tasks {
            match self.place_task(&auction.task) {
                Ok(winner) => {
                    debug!(task_guid = %auction.identifier(), cell_guid = %winner, "task placed");
                    auction.record.winner = winner;
                    successful_tasks.push(auction);
                }
                Err(e) => {
                    debug!(task_guid = %auction.identifier(), error = %e, "task not placed");
                    auction.record.placement_error = e.to_string();
                    results.failed_tasks.push(auction);
                }
            }
        }
        self.auction_lrps(lrps_after_tasks, &mut successful_lrps, &mut results);

        let rejected = self.commit_cells().await;
        reconcile(successful_lrps, successful_tasks, &rejected, &mut results);

        info!(
            successful_lrps = results.successful_lrps.len(),
            failed_lrps = results.failed_lrps.len(),
            successful_tasks = results.successful_tasks.len(),
            failed_tasks = results.failed_tasks.len(),
            "scheduling pass complete"
        );
        self.mark_results(results)
    }

    fn auction_lrps(
        &mut self,
        auctions: Vec<LrpAuction>,
        successful: &mut Vec<LrpAuction>,
        results: &mut AuctionResults,
    ) {
        for mut auction in auctions {
            match self.place_lrp(&auction.lrp) {
                Ok(winner) => {
                    debug!(lrp_guid = %auction.identifier(), cell_guid = %winner, "lrp placed");
                    auction.record.winner = winner;
                    successful.push(auction);
                }
                Err(e) => {
                    debug!(lrp_guid = %auction.identifier(), error = %e, "lrp not placed");
                    auction.record.placement_error = e.to_string();
                    results.failed_lrps.push(auction);
                }
            }
        }
    }

    /// Reserve `lrp` on the best cell and return that cell's guid.
    fn place_lrp(&mut self, lrp: &Lrp) -> AuctionResult<String> {
        self.check_inflight()?;

        let (zone_name, index) = {
            let mut zones = filter_zones(
                &self.zones,
                &lrp.placement_constraint,
                Some(lrp.process_guid.as_str()),
            )?;
            sort_zones_by_instances(&mut zones);

            let mut bids = Bids::new();
            for (position, zone) in zones.iter().enumerate() {
                for (index, cell) in zone.iter() {
                    let bid = cell.score_for_lrp(lrp, self.starting_container_weight);
                    bids.offer(zone, index, bid);
                }
                // A tied neighbour may still hold a better cell.
                if zones
                    .get(position + 1)
                    .is_some_and(|next| next.instances == zone.instances)
                {
                    continue;
                }
                if bids.has_winner() {
                    break;
                }
            }
            let (name, index) = bids.into_winner()?;
            (name.to_string(), index)
        };

        let cell = self.cell_mut(&zone_name, index)?;
        cell.reserve_lrp(lrp)?;
        let guid = cell.guid().to_string();
        self.inflight += 1;
        Ok(guid)
    }

    /// Like [`place_lrp`](Self::place_lrp) without zone spreading: every
    /// compatible cell in every zone competes.
    fn place_task(&mut self, task: &Task) -> AuctionResult<String> {
        self.check_inflight()?;

        let (zone_name, index) = {
            let zones = filter_zones(&self.zones, &task.placement_constraint, None)?;

            let mut bids = Bids::new();
            for zone in &zones {
                for (index, cell) in zone.iter() {
                    let bid = cell.score_for_task(task, self.starting_container_weight);
                    bids.offer(zone, index, bid);
                }
            }
            let (name, index) = bids.into_winner()?;
            (name.to_string(), index)
        };

        let cell = self.cell_mut(&zone_name, index)?;
        cell.reserve_task(task)?;
        let guid = cell.guid().to_string();
        self.inflight += 1;
        Ok(guid)
    }

    fn check_inflight(&self) -> AuctionResult<()> {
        let maximum = self.starting_container_count_maximum;
        if maximum > 0 && self.inflight >= maximum {
            return Err(AuctionError::ExceedsInflightCreationMax);
        }
        Ok(())
    }

    fn cell_mut(&mut self, zone: &str, index: usize) -> AuctionResult<&mut Cell> {
        self.zones
            .get_mut(zone)
            .and_then(|zone| zone.get_mut(index))
            .ok_or(AuctionError::CellMismatch)
    }

    /// Commit every cell concurrently and collect what they rejected.
    async fn commit_cells(&mut self) -> Work {
        let commits: Vec<BoxFuture<'_, Work>> = self
            .zones
            .values_mut()
            .flat_map(|zone| zone.cells_mut())
            .map(|cell| cell.commit().boxed())
            .collect();

        let mut rejected = Work::default();
        for failed in self.pool.run_all(commits).await {
            rejected.lrps.extend(failed.lrps);
            rejected.tasks.extend(failed.tasks);
        }
        rejected
    }

    fn mark_results(&self, mut results: AuctionResults) -> AuctionResults {
        let now = self.clock.now();

        for auction in &mut results.failed_lrps {
            auction.record.attempts += 1;
        }
        for auction in &mut results.failed_tasks {
            auction.record.attempts += 1;
        }
        for auction in &mut results.successful_lrps {
            mark_success(&mut auction.record, now);
        }
        for auction in &mut results.successful_tasks {
            mark_success(&mut auction.record, now);
        }
        results
    }
}

fn mark_success(record: &mut AuctionRecord, now: SystemTime) {
    record.attempts += 1;
    record.wait_duration = now.duration_since(record.queue_time).unwrap_or_default();
}

/// Running minimum over cell scores, plus the resource problems shared by
/// every cell that could not fit the item.
struct Bids<'a> {
    winner: Option<(&'a str, usize)>,
    best: f64,
    problems: ProblemSet,
}

impl<'a> Bids<'a> {
    fn new() -> Self {
        Self {
            winner: None,
            best: NO_BID,
            problems: ProblemSet::all(),
        }
    }

    fn offer(&mut self, zone: &FilteredZone<'a>, index: usize, bid: AuctionResult<f64>) {
        match bid {
            // Strict: the first cell seen keeps an exact tie.
            Ok(score) if score < self.best => {
                self.best = score;
                self.winner = Some((zone.name, index));
            }
            Ok(_) => {}
            Err(AuctionError::InsufficientResources(problems)) => {
                self.problems.retain_common(&problems)
            }
            Err(_) => {}
        }
    }

    fn has_winner(&self) -> bool {
        self.winner.is_some()
    }

    fn into_winner(self) -> AuctionResult<(&'a str, usize)> {
        self.winner
            .ok_or(AuctionError::InsufficientResources(self.problems))
    }
}

fn sort_lrps(lrps: &mut [LrpAuction]) {
    lrps.sort_by(|a, b| {
        a.lrp
            .index
            .cmp(&b.lrp.index)
            .then_with(|| b.lrp.resource.memory_mb.cmp(&a.lrp.resource.memory_mb))
    });
}

fn sort_tasks(tasks: &mut [TaskAuction]) {
    tasks.sort_by_key(|auction| Reverse(auction.task.resource.memory_mb));
}

/// Move provisionally successful items that a cell rejected into the
/// failed buckets. They go back without a winner.
fn reconcile(
    successful_lrps: Vec<LrpAuction>,
    successful_tasks: Vec<TaskAuction>,
    rejected: &Work,
    results: &mut AuctionResults,
) {
    let rejected_lrps: HashSet<String> = rejected.lrps.iter().map(Lrp::identifier).collect();
    let rejected_tasks: HashSet<String> = rejected.tasks.iter().map(Task::identifier).collect();

    for mut auction in successful_lrps {
        if rejected_lrps.contains(&auction.identifier()) {
            warn!(
                lrp_guid = %auction.identifier(),
                cell_guid = %auction.record.winner,
                "cell rejected lrp"
            );
            auction.record.winner.clear();
            results.failed_lrps.push(auction);
        } else {
            results.successful_lrps.push(auction);
        }
    }

    for mut auction in successful_tasks {
        if rejected_tasks.contains(&auction.identifier()) {
            warn!(
                task_guid = %auction.identifier(),
                cell_guid = %auction.record.winner,
                "cell rejected task"
            );
            auction.record.winner.clear();
            results.failed_tasks.push(auction);
        } else {
            results.successful_tasks.push(auction);
        }
    }
}
