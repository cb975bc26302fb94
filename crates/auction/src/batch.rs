//! Deduplicating intake queue for pending auctions.
//!
//! Producers append under a mutex and ring a doorbell that holds at most
//! one pending permit. The runner waits on the doorbell, then drains
//! everything at once. Repeated rings collapse into one wakeup, which is
//! safe because every drain takes the whole queue.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use tokio::sync::Notify;
use tracing::debug;

use crate::clock::Clock;
use crate::types::{Lrp, LrpAuction, LrpStartRequest, TaskAuction, TaskStartRequest};

#[derive(Default)]
struct Queues {
    lrps: Vec<LrpAuction>,
    tasks: Vec<TaskAuction>,
}

pub struct Batch {
    queues: Mutex<Queues>,
    doorbell: Notify,
    clock: Arc<dyn Clock>,
}

impl Batch {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            doorbell: Notify::new(),
            clock,
        }
    }

    /// Queue one auction per requested index.
    pub fn add_lrp_starts(&self, starts: &[LrpStartRequest]) {
        let now = self.clock.now();
        let auctions: Vec<LrpAuction> = starts
            .iter()
            .flat_map(|start| {
                start.indices.iter().map(move |&index| {
                    let lrp = Lrp::new(
                        &start.process_guid,
                        index,
                        &start.domain,
                        start.resource,
                        start.placement_constraint.clone(),
                    );
                    LrpAuction::new(lrp, now)
                })
            })
            .collect();

        let mut queues = self.lock();
        queues.lrps.extend(auctions);
        self.ring();
    }

    pub fn add_tasks(&self, tasks: &[TaskStartRequest]) {
        let now = self.clock.now();
        let mut queues = self.lock();
        queues
            .tasks
            .extend(tasks.iter().map(|req| TaskAuction::new(req.task.clone(), now)));
        self.ring();
    }

    /// Wait until work has been added since the last drain.
    pub async fn has_work(&self) {
        self.doorbell.notified().await;
    }

    /// Non-blocking variant of [`has_work`](Self::has_work). Consumes the ring.
    pub fn try_has_work(&self) -> bool {
        self.doorbell.notified().now_or_never().is_some()
    }

    /// Number of queued `(lrps, tasks)`, before dedup.
    pub fn pending(&self) -> (usize, usize) {
        let queues = self.lock();
        (queues.lrps.len(), queues.tasks.len())
    }

    /// Take everything queued, keeping the first occurrence of each
    /// identifier.
    pub fn dedupe_and_drain(&self) -> (Vec<LrpAuction>, Vec<TaskAuction>) {
        let drained = {
            let mut queues = self.lock();
            let drained = std::mem::take(&mut *queues);
            let _ = self.try_has_work();
            drained
        };

        let mut lrps = drained.lrps;
        let mut seen = HashSet::new();
        lrps.retain(|auction| {
            let fresh = seen.insert(auction.identifier());
            if !fresh {
                debug!(lrp_guid = %auction.identifier(), "duplicate lrp start dropped");
            }
            fresh
        });

        let mut tasks = drained.tasks;
        let mut seen = HashSet::new();
        tasks.retain(|auction| {
            let fresh = seen.insert(auction.identifier());
            if !fresh {
                debug!(task_guid = %auction.identifier(), "duplicate task dropped");
            }
            fresh
        });

        (lrps, tasks)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes a waiting runner, or leaves a single permit for the next wait.
    fn ring(&self) {
        self.doorbell.notify_one();
    }
}
