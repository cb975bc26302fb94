//! Core data types for auctions, cells and their resources.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::{AuctionError, AuctionResult, Problem, ProblemSet};

// ── Resources ──────────────────────────────────────────────────

/// Resources requested by a single workload. Every workload also occupies
/// exactly one container slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub memory_mb: i32,
    pub disk_mb: i32,
    #[serde(default)]
    pub max_pids: i32,
}

impl Resource {
    pub fn new(memory_mb: i32, disk_mb: i32, max_pids: i32) -> Self {
        Self {
            memory_mb,
            disk_mb,
            max_pids,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.memory_mb >= 0 && self.disk_mb >= 0
    }
}

/// Capacity of a cell, either total or currently available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub containers: i32,
}

impl Resources {
    pub fn new(memory_mb: i32, disk_mb: i32, containers: i32) -> Self {
        Self {
            memory_mb,
            disk_mb,
            containers,
        }
    }

    /// Remove one workload's demand, including its container slot.
    pub fn subtract(&mut self, res: &Resource) {
        self.memory_mb -= res.memory_mb;
        self.disk_mb -= res.disk_mb;
        self.containers -= 1;
    }

    /// Mean utilization across memory, disk and containers relative to
    /// `total`. Higher means fuller.
    pub fn utilization(&self, total: &Resources) -> f64 {
        (fraction_used(self.memory_mb, total.memory_mb)
            + fraction_used(self.disk_mb, total.disk_mb)
            + fraction_used(self.containers, total.containers))
            / 3.0
    }
}

fn fraction_used(remaining: i32, total: i32) -> f64 {
    if total <= 0 {
        return 1.0;
    }
    1.0 - f64::from(remaining) / f64::from(total)
}

/// Constraints a cell must satisfy before it is scored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConstraint {
    pub placement_tags: Vec<String>,
    pub volume_drivers: Vec<String>,
    pub root_fs: String,
}

impl PlacementConstraint {
    pub fn new(root_fs: &str, placement_tags: Vec<String>, volume_drivers: Vec<String>) -> Self {
        Self {
            placement_tags,
            volume_drivers,
            root_fs: root_fs.to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.root_fs.is_empty()
    }
}

// ── Workloads ──────────────────────────────────────────────────

/// One instance of a long-running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lrp {
    pub process_guid: String,
    pub index: i32,
    pub domain: String,
    pub resource: Resource,
    #[serde(default)]
    pub placement_constraint: PlacementConstraint,
}

impl Lrp {
    pub fn new(
        process_guid: &str,
        index: i32,
        domain: &str,
        resource: Resource,
        placement_constraint: PlacementConstraint,
    ) -> Self {
        Self {
            process_guid: process_guid.to_string(),
            index,
            domain: domain.to_string(),
            resource,
            placement_constraint,
        }
    }

    /// Dedup key: process guid and index.
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.process_guid, self.index)
    }
}

/// A one-shot task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_guid: String,
    pub domain: String,
    pub resource: Resource,
    #[serde(default)]
    pub placement_constraint: PlacementConstraint,
}

impl Task {
    pub fn new(
        task_guid: &str,
        domain: &str,
        resource: Resource,
        placement_constraint: PlacementConstraint,
    ) -> Self {
        Self {
            task_guid: task_guid.to_string(),
            domain: domain.to_string(),
            resource,
            placement_constraint,
        }
    }

    pub fn identifier(&self) -> String {
        self.task_guid.clone()
    }
}

/// A unit of work sent to (or rejected by) a cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Work {
    pub lrps: Vec<Lrp>,
    pub tasks: Vec<Task>,
}

impl Work {
    pub fn is_empty(&self) -> bool {
        self.lrps.is_empty() && self.tasks.is_empty()
    }
}

// ── Cell state ─────────────────────────────────────────────────

/// Which rootfs stacks a cell can serve for one scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RootFsProvider {
    /// Any rootfs under the scheme, e.g. `docker:///busybox`.
    Arbitrary,
    /// Only the listed stacks, e.g. `preloaded:linux`.
    FixedSet { stacks: BTreeSet<String> },
}

impl RootFsProvider {
    pub fn fixed_set<I, S>(stacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RootFsProvider::FixedSet {
            stacks: stacks.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, stack: &str) -> bool {
        match self {
            RootFsProvider::Arbitrary => true,
            RootFsProvider::FixedSet { stacks } => stacks.contains(stack),
        }
    }
}

/// Rootfs providers keyed by URL scheme.
pub type RootFsProviders = BTreeMap<String, RootFsProvider>;

/// Split a rootfs URL into `(scheme, rest)`. Strings without a valid
/// scheme yield `None`.
fn split_root_fs(root_fs: &str) -> Option<(String, &str)> {
    let (scheme, rest) = root_fs.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some((scheme.to_ascii_lowercase(), rest))
}

/// Point-in-time snapshot of a cell as reported by the cell itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellState {
    pub root_fs_providers: RootFsProviders,
    pub available_resources: Resources,
    pub total_resources: Resources,
    pub lrps: Vec<Lrp>,
    pub tasks: Vec<Task>,
    pub zone: String,
    pub starting_container_count: i32,
    pub evacuating: bool,
    pub volume_drivers: Vec<String>,
    pub placement_tags: Vec<String>,
    pub optional_placement_tags: Vec<String>,
}

impl CellState {
    pub fn match_root_fs(&self, root_fs: &str) -> bool {
        let Some((scheme, stack)) = split_root_fs(root_fs) else {
            return false;
        };
        self.root_fs_providers
            .get(&scheme)
            .is_some_and(|provider| provider.matches(stack))
    }

    pub fn match_volume_drivers(&self, drivers: &[String]) -> bool {
        drivers.iter().all(|d| self.volume_drivers.contains(d))
    }

    /// Required tags must all be desired, and every desired tag must be
    /// offered as either required or optional.
    pub fn match_placement_tags(&self, desired: &[String]) -> bool {
        let desired: HashSet<&str> = desired.iter().map(String::as_str).collect();
        let required: HashSet<&str> = self.placement_tags.iter().map(String::as_str).collect();
        let offered: HashSet<&str> = required
            .iter()
            .copied()
            .chain(self.optional_placement_tags.iter().map(String::as_str))
            .collect();

        required.is_subset(&desired) && desired.is_subset(&offered)
    }

    /// Check that `res` fits in the available resources.
    pub fn resource_match(&self, res: &Resource) -> AuctionResult<()> {
        let mut problems = ProblemSet::new();
        if self.available_resources.disk_mb < res.disk_mb {
            problems.insert(Problem::Disk);
        }
        if self.available_resources.memory_mb < res.memory_mb {
            problems.insert(Problem::Memory);
        }
        if self.available_resources.containers < 1 {
            problems.insert(Problem::Containers);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AuctionError::InsufficientResources(problems))
        }
    }

    /// Utilization after placing `res`, plus the starting-container penalty.
    pub fn compute_score(&self, res: &Resource, starting_container_weight: f64) -> f64 {
        let mut remaining = self.available_resources;
        remaining.subtract(res);
        let starting = f64::from(self.starting_container_count) * starting_container_weight;
        remaining.utilization(&self.total_resources) + starting
    }

    pub fn add_lrp(&mut self, lrp: &Lrp) {
        self.available_resources.subtract(&lrp.resource);
        self.starting_container_count += 1;
        self.lrps.push(lrp.clone());
    }

    pub fn add_task(&mut self, task: &Task) {
        self.available_resources.subtract(&task.resource);
        self.starting_container_count += 1;
        self.tasks.push(task.clone());
    }
}

// ── Start requests ─────────────────────────────────────────────

/// Request to start one or more instances of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrpStartRequest {
    pub process_guid: String,
    pub domain: String,
    pub indices: Vec<i32>,
    pub resource: Resource,
    #[serde(default)]
    pub placement_constraint: PlacementConstraint,
}

impl LrpStartRequest {
    pub fn new(
        process_guid: &str,
        domain: &str,
        indices: Vec<i32>,
        resource: Resource,
        placement_constraint: PlacementConstraint,
    ) -> Self {
        Self {
            process_guid: process_guid.to_string(),
            domain: domain.to_string(),
            indices,
            resource,
            placement_constraint,
        }
    }

    pub fn validate(&self) -> AuctionResult<()> {
        if self.process_guid.is_empty() {
            return Err(AuctionError::InvalidRequest("process_guid is required".into()));
        }
        if self.domain.is_empty() {
            return Err(AuctionError::InvalidRequest("domain is required".into()));
        }
        if self.indices.is_empty() {
            return Err(AuctionError::InvalidRequest("indices must not be empty".into()));
        }
        if !self.resource.is_valid() {
            return Err(AuctionError::InvalidRequest("resource must be non-negative".into()));
        }
        if !self.placement_constraint.is_valid() {
            return Err(AuctionError::InvalidRequest("root_fs is required".into()));
        }
        Ok(())
    }
}

/// Request to start a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStartRequest {
    #[serde(flatten)]
    pub task: Task,
}

impl TaskStartRequest {
    pub fn new(task: Task) -> Self {
        Self { task }
    }

    pub fn validate(&self) -> AuctionResult<()> {
        if self.task.task_guid.is_empty() {
            return Err(AuctionError::InvalidRequest("task_guid is required".into()));
        }
        if self.task.domain.is_empty() {
            return Err(AuctionError::InvalidRequest("domain is required".into()));
        }
        if !self.task.resource.is_valid() {
            return Err(AuctionError::InvalidRequest("resource must be non-negative".into()));
        }
        if !self.task.placement_constraint.is_valid() {
            return Err(AuctionError::InvalidRequest("root_fs is required".into()));
        }
        Ok(())
    }
}

// ── Auctions ───────────────────────────────────────────────────

/// Bookkeeping shared by LRP and task auctions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionRecord {
    pub queue_time: SystemTime,
    pub attempts: u32,
    /// Guid of the winning cell, empty until placed.
    pub winner: String,
    /// Failure reason, empty unless placement failed.
    pub placement_error: String,
    /// Time spent queued, set only on success.
    pub wait_duration: Duration,
}

impl AuctionRecord {
    pub fn new(queue_time: SystemTime) -> Self {
        Self {
            queue_time,
            attempts: 0,
            winner: String::new(),
            placement_error: String::new(),
            wait_duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrpAuction {
    pub lrp: Lrp,
    pub record: AuctionRecord,
}

impl LrpAuction {
    pub fn new(lrp: Lrp, queue_time: SystemTime) -> Self {
        Self {
            lrp,
            record: AuctionRecord::new(queue_time),
        }
    }

    pub fn identifier(&self) -> String {
        self.lrp.identifier()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAuction {
    pub task: Task,
    pub record: AuctionRecord,
}

impl TaskAuction {
    pub fn new(task: Task, queue_time: SystemTime) -> Self {
        Self {
            task,
            record: AuctionRecord::new(queue_time),
        }
    }

    pub fn identifier(&self) -> String {
        self.task.identifier()
    }
}

/// Input to one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuctionRequest {
    pub lrps: Vec<LrpAuction>,
    pub tasks: Vec<TaskAuction>,
}

/// Outcome of one scheduling pass. Every requested item lands in exactly
/// one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuctionResults {
    pub successful_lrps: Vec<LrpAuction>,
    pub successful_tasks: Vec<TaskAuction>,
    pub failed_lrps: Vec<LrpAuction>,
    pub failed_tasks: Vec<TaskAuction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_providers() -> RootFsProviders {
        let mut providers = RootFsProviders::new();
        providers.insert("preloaded".to_string(), RootFsProvider::fixed_set(["linux"]));
        providers
    }

    fn make_state(available: Resources, total: Resources) -> CellState {
        CellState {
            root_fs_providers: linux_providers(),
            available_resources: available,
            total_resources: total,
            zone: "z1".to_string(),
            ..CellState::default()
        }
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn root_fs_fixed_set_and_arbitrary() {
        let mut state = make_state(Resources::new(10, 10, 1), Resources::new(10, 10, 1));
        assert!(state.match_root_fs("preloaded:linux"));
        assert!(!state.match_root_fs("preloaded:windows"));
        assert!(!state.match_root_fs("docker:///busybox"));

        state
            .root_fs_providers
            .insert("docker".to_string(), RootFsProvider::Arbitrary);
        assert!(state.match_root_fs("docker:///busybox"));
    }

    #[test]
    fn root_fs_without_scheme_never_matches() {
        let mut state = make_state(Resources::default(), Resources::default());
        state.root_fs_providers.insert(String::new(), RootFsProvider::Arbitrary);
        assert!(!state.match_root_fs(".net"));
        assert!(!state.match_root_fs(""));
        assert!(!state.match_root_fs(":linux"));
    }

    #[test]
    fn volume_drivers_must_all_be_present() {
        let mut state = make_state(Resources::default(), Resources::default());
        state.volume_drivers = tags(&["driver-1", "driver-2"]);
        assert!(state.match_volume_drivers(&[]));
        assert!(state.match_volume_drivers(&tags(&["driver-2"])));
        assert!(!state.match_volume_drivers(&tags(&["driver-1", "driver-3"])));
    }

    #[test]
    fn placement_tags_require_and_offer() {
        let mut state = make_state(Resources::default(), Resources::default());
        state.placement_tags = tags(&["quack", "moo"]);
        state.optional_placement_tags = tags(&["chirp"]);

        assert!(state.match_placement_tags(&tags(&["moo", "quack"])));
        assert!(state.match_placement_tags(&tags(&["moo", "quack", "chirp"])));
        assert!(!state.match_placement_tags(&tags(&["quack"])));
        assert!(!state.match_placement_tags(&tags(&["quack", "moo", "oink"])));
    }

    #[test]
    fn untagged_cell_only_matches_untagged_work() {
        let state = make_state(Resources::default(), Resources::default());
        assert!(state.match_placement_tags(&[]));
        assert!(!state.match_placement_tags(&tags(&["quack"])));
    }

    #[test]
    fn resource_match_names_every_short_dimension() {
        let state = make_state(Resources::new(10, 10, 0), Resources::new(100, 100, 10));
        let err = state.resource_match(&Resource::new(20, 20, 0)).unwrap_err();
        assert_eq!(err.to_string(), "insufficient resources: containers, disk, memory");
    }

    #[test]
    fn resource_match_accepts_exact_fit() {
        let state = make_state(Resources::new(10, 20, 1), Resources::new(100, 100, 10));
        assert!(state.resource_match(&Resource::new(10, 20, 0)).is_ok());
    }

    #[test]
    fn add_lrp_updates_ledger() {
        let mut state = make_state(Resources::new(100, 100, 10), Resources::new(100, 100, 10));
        let lrp = Lrp::new(
            "pg-1",
            0,
            "domain",
            Resource::new(10, 20, 0),
            PlacementConstraint::default(),
        );
        state.add_lrp(&lrp);

        assert_eq!(state.available_resources, Resources::new(90, 80, 9));
        assert_eq!(state.starting_container_count, 1);
        assert_eq!(state.lrps, vec![lrp]);
    }

    #[test]
    fn score_includes_starting_container_weight() {
        let mut state = make_state(Resources::new(100, 100, 10), Resources::new(100, 100, 10));
        let res = Resource::new(50, 50, 0);
        let base = state.compute_score(&res, 0.25);
        let unweighted = state.compute_score(&res, 0.0);

        state.starting_container_count = 2;
        assert!((state.compute_score(&res, 0.25) - base - 0.5).abs() < 1e-9);
        assert_eq!(state.compute_score(&res, 0.0), unweighted);
    }

    #[test]
    fn start_request_validation() {
        let pc = PlacementConstraint::new("preloaded:linux", vec![], vec![]);
        let ok =
            LrpStartRequest::new("pg-1", "domain", vec![0, 1], Resource::new(1, 1, 0), pc.clone());
        assert!(ok.validate().is_ok());

        let no_indices =
            LrpStartRequest::new("pg-1", "domain", vec![], Resource::new(1, 1, 0), pc.clone());
        assert!(matches!(no_indices.validate(), Err(AuctionError::InvalidRequest(_))));

        let no_root_fs = TaskStartRequest::new(Task::new(
            "tg-1",
            "domain",
            Resource::new(1, 1, 0),
            PlacementConstraint::default(),
        ));
        assert!(no_root_fs.validate().is_err());
    }

    #[test]
    fn task_start_request_is_flat_json() {
        let json = r#"{
            "task_guid": "tg-1",
            "domain": "domain",
            "resource": {"memory_mb": 10, "disk_mb": 20},
            "placement_constraint": {"root_fs": "preloaded:linux"}
        }"#;
        let req: TaskStartRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.task.task_guid, "tg-1");
        assert_eq!(req.task.resource, Resource::new(10, 20, 0));
        assert!(req.validate().is_ok());
    }
}
