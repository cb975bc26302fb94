//! Bounded fan-out for the state fetch and commit phases.

use std::future::Future;

use futures_util::stream::{self, StreamExt};

use crate::error::{AuctionError, AuctionResult};

/// Runs a batch of futures with at most `workers` in flight.
///
/// `run_all` returns once every unit has finished. Units report failure
/// through their output, so one failing unit never cancels its siblings.
#[derive(Debug, Clone, Copy)]
pub struct WorkPool {
    workers: usize,
}

impl WorkPool {
    pub fn new(workers: usize) -> AuctionResult<Self> {
        if workers == 0 {
            return Err(AuctionError::EmptyWorkPool);
        }
        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Drive every unit to completion. Outputs arrive in completion order.
    ///
    /// Units are collected before the first one is polled, so callers hand
    /// over owned or boxed futures rather than a lazy iterator.
    pub async fn run_all<F>(&self, units: Vec<F>) -> Vec<F::Output>
    where
        F: Future,
    {
        stream::iter(units)
            .buffer_unordered(self.workers)
            .collect()
            .await
    }
}
