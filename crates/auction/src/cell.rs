//! A cell as seen during one scheduling pass.
//!
//! The cell owns a snapshot of its remote state. Reservations mutate that
//! snapshot so later scores in the same pass see earlier decisions, and
//! accumulate in `work_to_commit` until [`Cell::commit`] sends them.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::client::CellClient;
use crate::error::AuctionResult;
use crate::types::{CellState, Lrp, Task, Work};

/// Penalty per co-located instance of the same process (or per task).
/// Large enough to outweigh any utilization difference.
pub const LOCALITY_OFFSET: f64 = 1000.0;

pub struct Cell {
    guid: String,
    client: Arc<dyn CellClient>,
    state: CellState,
    work_to_commit: Work,
}

impl Cell {
    pub fn new(guid: &str, client: Arc<dyn CellClient>, state: CellState) -> Self {
        Self {
            guid: guid.to_string(),
            client,
            state,
            work_to_commit: Work::default(),
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    pub fn work_to_commit(&self) -> &Work {
        &self.work_to_commit
    }

    pub fn match_root_fs(&self, root_fs: &str) -> bool {
        self.state.match_root_fs(root_fs)
    }

    pub fn match_volume_drivers(&self, drivers: &[String]) -> bool {
        self.state.match_volume_drivers(drivers)
    }

    pub fn match_placement_tags(&self, tags: &[String]) -> bool {
        self.state.match_placement_tags(tags)
    }

    /// Lower is better. Fails with insufficient resources if `lrp` does not fit.
    pub fn score_for_lrp(&self, lrp: &Lrp, starting_container_weight: f64) -> AuctionResult<f64> {
        self.state.resource_match(&lrp.resource)?;

        let colocated = self
            .state
            .lrps
            .iter()
            .filter(|existing| existing.process_guid == lrp.process_guid)
            .count();
        let locality = LOCALITY_OFFSET * colocated as f64;

        Ok(self.state.compute_score(&lrp.resource, starting_container_weight) + locality)
    }

    /// Like [`score_for_lrp`](Self::score_for_lrp), but every task already
    /// on the cell adds to the locality penalty.
    pub fn score_for_task(
        &self,
        task: &Task,
        starting_container_weight: f64,
    ) -> AuctionResult<f64> {
        self.state.resource_match(&task.resource)?;

        let locality = LOCALITY_OFFSET * self.state.tasks.len() as f64;
        Ok(self.state.compute_score(&task.resource, starting_container_weight) + locality)
    }

    pub fn reserve_lrp(&mut self, lrp: &Lrp) -> AuctionResult<()> {
        self.state.resource_match(&lrp.resource)?;
        self.state.add_lrp(lrp);
        self.work_to_commit.lrps.push(lrp.clone());
        Ok(())
    }

    pub fn reserve_task(&mut self, task: &Task) -> AuctionResult<()> {
        self.state.resource_match(&task.resource)?;
        self.state.add_task(task);
        self.work_to_commit.tasks.push(task.clone());
        Ok(())
    }

    /// Send reserved work to the cell and return whatever it rejected.
    ///
    /// A transport failure returns no rejections: the cell may or may not
    /// have started the work, and a later reconciliation sorts it out.
    pub async fn commit(&mut self) -> Work {
        if self.work_to_commit.is_empty() {
            return Work::default();
        }

        let work = std::mem::take(&mut self.work_to_commit);
        match self.client.perform(&work).await {
            Ok(failed) => {
                debug!(
                    cell_guid = %self.guid,
                    lrps = work.lrps.len(),
                    tasks = work.tasks.len(),
                    rejected = failed.lrps.len() + failed.tasks.len(),
                    "work committed"
                );
                failed
            }
            Err(e) => {
                error!(cell_guid = %self.guid, error = %e, "failed to commit work");
                Work::default()
            }
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("guid", &self.guid)
            .field("state", &self.state)
            .field("work_to_commit", &self.work_to_commit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FakeCellClient;
    use crate::error::AuctionError;
    use crate::types::{PlacementConstraint, Resource, Resources, RootFsProvider, RootFsProviders};

    fn linux() -> PlacementConstraint {
        PlacementConstraint::new("preloaded:linux", vec![], vec![])
    }

    fn make_lrp(guid: &str, index: i32, memory: i32, disk: i32) -> Lrp {
        Lrp::new(guid, index, "domain", Resource::new(memory, disk, 0), linux())
    }

    fn make_task(guid: &str, memory: i32, disk: i32) -> Task {
        Task::new(guid, "domain", Resource::new(memory, disk, 0), linux())
    }

    fn make_state(memory: i32, disk: i32, containers: i32, lrps: Vec<Lrp>) -> CellState {
        let total = Resources::new(memory, disk, containers);
        let mut available = total;
        for lrp in &lrps {
            available.subtract(&lrp.resource);
        }
        let mut providers = RootFsProviders::new();
        providers.insert("preloaded".to_string(), RootFsProvider::fixed_set(["linux"]));
        CellState {
            root_fs_providers: providers,
            available_resources: available,
            total_resources: total,
            lrps,
            zone: "zone".to_string(),
            ..CellState::default()
        }
    }

    fn make_cell(guid: &str, state: CellState) -> (Arc<FakeCellClient>, Cell) {
        let client = Arc::new(FakeCellClient::new());
        let cell = Cell::new(guid, client.clone(), state);
        (client, cell)
    }

    #[test]
    fn emptier_cell_scores_better() {
        let (_, empty) = make_cell("empty", make_state(100, 200, 50, vec![]));
        let (_, busy) = make_cell(
            "busy",
            make_state(
                100,
                200,
                50,
                vec![make_lrp("pg-1", 0, 20, 20), make_lrp("pg-2", 0, 20, 20)],
            ),
        );
        let lrp = make_lrp("pg-new", 0, 10, 10);

        let empty_score = empty.score_for_lrp(&lrp, 0.0).unwrap();
        let busy_score = busy.score_for_lrp(&lrp, 0.0).unwrap();
        assert!(empty_score < busy_score);
    }

    #[test]
    fn bigger_demand_scores_worse() {
        let (_, cell) = make_cell("cell", make_state(100, 200, 50, vec![]));
        let small = cell.score_for_lrp(&make_lrp("pg", 0, 10, 10), 0.0).unwrap();
        let more_memory = cell.score_for_lrp(&make_lrp("pg", 0, 20, 10), 0.0).unwrap();
        let more_disk = cell.score_for_lrp(&make_lrp("pg", 0, 10, 20), 0.0).unwrap();

        assert!(more_memory > small);
        assert!(more_disk > small);
    }

    #[test]
    fn colocated_instances_dominate_resource_score() {
        let (_, with_instance) =
            make_cell("a", make_state(100, 200, 50, vec![make_lrp("pg-1", 0, 1, 1)]));
        let (_, nearly_full) =
            make_cell("b", make_state(100, 200, 50, vec![make_lrp("pg-2", 0, 80, 180)]));
        let candidate = make_lrp("pg-1", 1, 10, 10);

        let colocated = with_instance.score_for_lrp(&candidate, 0.0).unwrap();
        let elsewhere = nearly_full.score_for_lrp(&candidate, 0.0).unwrap();
        assert!(colocated > elsewhere);
        assert!(colocated >= LOCALITY_OFFSET);
    }

    #[test]
    fn starting_containers_weight() {
        let (_, idle) = make_cell("idle", make_state(100, 100, 10, vec![]));
        let mut starting_state = make_state(100, 100, 10, vec![]);
        starting_state.starting_container_count = 3;
        let (_, starting) = make_cell("starting", starting_state);
        let lrp = make_lrp("pg", 0, 10, 10);

        assert_eq!(
            idle.score_for_lrp(&lrp, 0.0).unwrap(),
            starting.score_for_lrp(&lrp, 0.0).unwrap()
        );
        assert!(
            idle.score_for_lrp(&lrp, 0.25).unwrap() < starting.score_for_lrp(&lrp, 0.25).unwrap()
        );
    }

    #[test]
    fn tasks_repel_tasks() {
        let (_, mut cell) = make_cell("cell", make_state(100, 100, 10, vec![]));
        let before = cell.score_for_task(&make_task("tg-2", 10, 10), 0.0).unwrap();

        cell.reserve_task(&make_task("tg-1", 10, 10)).unwrap();
        let after = cell.score_for_task(&make_task("tg-2", 10, 10), 0.0).unwrap();
        assert!(after - before >= LOCALITY_OFFSET);
    }

    #[test]
    fn insufficient_resources_name_the_dimension() {
        let (_, cell) = make_cell("cell", make_state(100, 100, 10, vec![]));

        let err = cell.score_for_lrp(&make_lrp("pg", 0, 101, 10), 0.0).unwrap_err();
        assert_eq!(err.to_string(), "insufficient resources: memory");

        let err = cell.score_for_task(&make_task("tg", 10, 101), 0.0).unwrap_err();
        assert_eq!(err.to_string(), "insufficient resources: disk");

        assert!(cell.score_for_lrp(&make_lrp("pg", 0, 100, 100), 0.0).is_ok());
    }

    #[test]
    fn full_containers_reject_work() {
        let (_, cell) = make_cell("cell", make_state(100, 100, 1, vec![make_lrp("pg-1", 0, 1, 1)]));
        let err = cell.score_for_lrp(&make_lrp("pg-2", 0, 1, 1), 0.0).unwrap_err();
        assert_eq!(err.to_string(), "insufficient resources: containers");
    }

    #[test]
    fn reserve_updates_state_and_pending_work() {
        let (_, mut cell) = make_cell("cell", make_state(100, 100, 10, vec![]));
        let lrp = make_lrp("pg-1", 0, 40, 40);

        cell.reserve_lrp(&lrp).unwrap();
        assert_eq!(cell.state().available_resources, Resources::new(60, 60, 9));
        assert_eq!(cell.work_to_commit().lrps, vec![lrp.clone()]);

        cell.reserve_lrp(&make_lrp("pg-2", 0, 60, 60)).unwrap();
        let err = cell.reserve_lrp(&make_lrp("pg-3", 0, 1, 1)).unwrap_err();
        assert!(matches!(err, AuctionError::InsufficientResources(_)));
        assert_eq!(cell.work_to_commit().lrps.len(), 2);
    }

    #[tokio::test]
    async fn commit_without_work_skips_the_cell() {
        let (client, mut cell) = make_cell("cell", make_state(100, 100, 10, vec![]));
        let failed = cell.commit().await;
        assert!(failed.is_empty());
        assert_eq!(client.perform_call_count(), 0);
    }

    #[tokio::test]
    async fn commit_sends_reserved_work_once() {
        let (client, mut cell) = make_cell("cell", make_state(100, 100, 10, vec![]));
        let lrp = make_lrp("pg-1", 0, 10, 10);
        let task = make_task("tg-1", 10, 10);
        cell.reserve_lrp(&lrp).unwrap();
        cell.reserve_task(&task).unwrap();

        let failed = cell.commit().await;
        assert!(failed.is_empty());
        assert_eq!(client.perform_call_count(), 1);

        let sent = client.perform_args_for_call(0).unwrap();
        assert_eq!(sent.lrps, vec![lrp]);
        assert_eq!(sent.tasks, vec![task]);
    }

    #[tokio::test]
    async fn commit_returns_rejections() {
        let (client, mut cell) = make_cell("cell", make_state(100, 100, 10, vec![]));
        let lrp = make_lrp("pg-1", 0, 10, 10);
        cell.reserve_lrp(&lrp).unwrap();
        client.set_perform_rejects(Work {
            lrps: vec![lrp.clone()],
            tasks: vec![],
        });

        let failed = cell.commit().await;
        assert_eq!(failed.lrps, vec![lrp]);
    }

    #[tokio::test]
    async fn commit_transport_error_reports_nothing() {
        let (client, mut cell) = make_cell("cell", make_state(100, 100, 10, vec![]));
        cell.reserve_task(&make_task("tg-1", 10, 10)).unwrap();
        client.set_perform_error("connection reset");

        let failed = cell.commit().await;
        assert!(failed.is_empty());
        assert_eq!(client.perform_call_count(), 1);
    }
}
