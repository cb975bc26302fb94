//! Auction error types.
//!
//! Placement failures are carried on each auction as the `Display` string of
//! an [`AuctionError`], so the messages below are part of the external
//! contract and must stay stable.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A resource dimension that prevented a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Problem {
    Containers,
    Disk,
    Memory,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Problem::Containers => "containers",
            Problem::Disk => "disk",
            Problem::Memory => "memory",
        })
    }
}

/// Set of resource dimensions that were short, rendered in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemSet(BTreeSet<Problem>);

impl ProblemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dimension: the starting point before narrowing across cells.
    pub fn all() -> Self {
        Self([Problem::Containers, Problem::Disk, Problem::Memory].into_iter().collect())
    }

    pub fn insert(&mut self, problem: Problem) {
        self.0.insert(problem);
    }

    pub fn contains(&self, problem: Problem) -> bool {
        self.0.contains(&problem)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the dimensions that `other` also reports.
    pub fn retain_common(&mut self, other: &ProblemSet) {
        self.0.retain(|p| other.0.contains(p));
    }
}

impl FromIterator<Problem> for ProblemSet {
    fn from_iter<I: IntoIterator<Item = Problem>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ProblemSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, problem) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{problem}")?;
        }
        Ok(())
    }
}

/// Errors produced while placing work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuctionError {
    #[error("found no compatible cell")]
    CellMismatch,

    #[error("found no compatible cell with volume drivers")]
    VolumeDriverMismatch,

    #[error("{}", placement_tag_message(.0))]
    PlacementTagMismatch(Vec<String>),

    #[error("insufficient resources{}", problem_suffix(.0))]
    InsufficientResources(ProblemSet),

    #[error("unable to communicate to compatible cells")]
    CellCommunication,

    #[error("exceeded max inflight container creation")]
    ExceedsInflightCreationMax,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("work pool requires at least one worker")]
    EmptyWorkPool,
}

impl AuctionError {
    /// Rank of a compatibility failure on the rootfs, volume driver,
    /// placement tag ladder. Non-compatibility errors rank lowest.
    pub fn specificity(&self) -> u8 {
        match self {
            AuctionError::PlacementTagMismatch(_) => 3,
            AuctionError::VolumeDriverMismatch => 2,
            AuctionError::CellMismatch => 1,
            _ => 0,
        }
    }

    pub fn placement_tag_mismatch(tags: &[String]) -> Self {
        let mut tags = tags.to_vec();
        tags.sort();
        tags.dedup();
        AuctionError::PlacementTagMismatch(tags)
    }
}

fn placement_tag_message(tags: &[String]) -> String {
    match tags {
        [] => "found no compatible cell with no placement tags".to_string(),
        [tag] => format!("found no compatible cell with placement tag \"{tag}\""),
        _ => {
            let quoted: Vec<String> = tags.iter().map(|t| format!("\"{t}\"")).collect();
            format!("found no compatible cell with placement tags {}", quoted.join(", "))
        }
    }
}

fn problem_suffix(problems: &ProblemSet) -> String {
    if problems.is_empty() {
        String::new()
    } else {
        format!(": {problems}")
    }
}

pub type AuctionResult<T> = Result<T, AuctionError>;

/// Errors returned by a remote cell.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("http error: {0}")]
    Http(String),

    #[error("invalid payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("cell unavailable: {0}")]
    Unavailable(String),
}
