//! auction: zone-aware placement of long-running processes and tasks onto cells.
//!
//! Pending starts accumulate in a deduplicating [`Batch`]. Each pass, the
//! [`AuctionRunner`] fetches every cell's state, groups cells into zones,
//! and hands the batch to a [`Scheduler`], which places each item greedily
//! on the lowest-scoring compatible cell and then commits the decisions to
//! the cells in parallel.
//!
//! # Architecture
//!
//! ```text
//! AuctionRunner
//!   ├── Batch (dedup queue + coalescing doorbell)
//!   ├── AuctionRunnerDelegate::fetch_cell_reps() → CellClients
//!   ├── fetch_state_and_build_zones() → Zones
//!   │   └── CellClient::fetch_state() per cell, via WorkPool
//!   └── Scheduler::schedule()
//!       ├── filter_zones() → rootfs, volume drivers, placement tags
//!       ├── Cell::score_for_lrp() / score_for_task() → lowest wins
//!       ├── Cell::reserve_*() → local state mutation
//!       └── Cell::commit() per cell, via WorkPool → reconcile rejections
//! ```
//!
//! # Scoring
//!
//! A cell's score is its mean utilization after placement, plus a weighted
//! count of containers it is already starting, plus
//! [`LOCALITY_OFFSET`] per co-located instance of the same process (or per
//! task already on the cell, for tasks). Lower is better.

pub mod batch;
pub mod cell;
pub mod client;
pub mod clock;
pub mod delegate;
pub mod error;
pub mod http_client;
pub mod runner;
pub mod scheduler;
pub mod types;
pub mod workpool;
pub mod zone;
pub mod zone_builder;

pub use batch::Batch;
pub use cell::{Cell, LOCALITY_OFFSET};
pub use client::{CellClient, FakeCellClient};
pub use clock::{Clock, FakeClock, SystemClock};
pub use delegate::{AuctionMetricEmitterDelegate, AuctionRunnerDelegate, CellClients};
pub use error::{AuctionError, AuctionResult, ClientError, Problem, ProblemSet};
pub use http_client::HttpCellClient;
pub use runner::AuctionRunner;
pub use scheduler::Scheduler;
pub use types::{
    AuctionRecord, AuctionRequest, AuctionResults, CellState, Lrp, LrpAuction, LrpStartRequest,
    PlacementConstraint, Resource, Resources, RootFsProvider, RootFsProviders, Task, TaskAuction,
    TaskStartRequest, Work,
};
pub use workpool::WorkPool;
pub use zone::{Zone, Zones};
pub use zone_builder::{FetchRetryPolicy, fetch_state_and_build_zones};
