//! Auction metrics: atomic counters fed by the runner, rendered as
//! Prometheus text exposition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use auction::{AuctionMetricEmitterDelegate, AuctionResults};

/// Counters for every pass since startup.
#[derive(Debug, Default)]
pub struct AuctionMetrics {
    lrp_auctions_started: AtomicU64,
    lrp_auctions_failed: AtomicU64,
    task_auctions_started: AtomicU64,
    task_auctions_failed: AtomicU64,
    failed_cell_state_requests: AtomicU64,
    fetch_states_duration_ns: AtomicU64,
    passes: AtomicU64,
}

/// Point-in-time copy of [`AuctionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub lrp_auctions_started: u64,
    pub lrp_auctions_failed: u64,
    pub task_auctions_started: u64,
    pub task_auctions_failed: u64,
    pub failed_cell_state_requests: u64,
    pub fetch_states_duration: Duration,
    pub passes: u64,
}

impl AuctionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lrp_auctions_started: self.lrp_auctions_started.load(Ordering::Relaxed),
            lrp_auctions_failed: self.lrp_auctions_failed.load(Ordering::Relaxed),
            task_auctions_started: self.task_auctions_started.load(Ordering::Relaxed),
            task_auctions_failed: self.task_auctions_failed.load(Ordering::Relaxed),
            failed_cell_state_requests: self.failed_cell_state_requests.load(Ordering::Relaxed),
            fetch_states_duration: Duration::from_nanos(
                self.fetch_states_duration_ns.load(Ordering::Relaxed),
            ),
            passes: self.passes.load(Ordering::Relaxed),
        }
    }

    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        counter(
            &mut out,
            "auctioneer_lrp_auctions_started_total",
            "LRP instances successfully placed on a cell.",
            s.lrp_auctions_started,
        );
        counter(
            &mut out,
            "auctioneer_lrp_auctions_failed_total",
            "LRP instances that could not be placed.",
            s.lrp_auctions_failed,
        );
        counter(
            &mut out,
            "auctioneer_task_auctions_started_total",
            "Tasks successfully placed on a cell.",
            s.task_auctions_started,
        );
        counter(
            &mut out,
            "auctioneer_task_auctions_failed_total",
            "Tasks that could not be placed.",
            s.task_auctions_failed,
        );
        counter(
            &mut out,
            "auctioneer_failed_cell_state_requests_total",
            "Cell state fetches that failed.",
            s.failed_cell_state_requests,
        );
        counter(
            &mut out,
            "auctioneer_auction_passes_total",
            "Completed auction passes.",
            s.passes,
        );

        out.push_str(
            "# HELP auctioneer_fetch_states_duration_seconds \
             Duration of the most recent cell state fetch.\n",
        );
        out.push_str("# TYPE auctioneer_fetch_states_duration_seconds gauge\n");
        out.push_str(&format!(
            "auctioneer_fetch_states_duration_seconds {:.6}\n",
            s.fetch_states_duration.as_secs_f64()
        ));
        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
    out.push_str(&format!("{name} {value}\n"));
}

impl AuctionMetricEmitterDelegate for AuctionMetrics {
    fn fetch_states_completed(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.fetch_states_duration_ns.store(nanos, Ordering::Relaxed);
    }

    fn failed_cell_state_request(&self) {
        self.failed_cell_state_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn auction_completed(&self, results: &AuctionResults) {
        self.lrp_auctions_started
            .fetch_add(results.successful_lrps.len() as u64, Ordering::Relaxed);
        self.lrp_auctions_failed
            .fetch_add(results.failed_lrps.len() as u64, Ordering::Relaxed);
        self.task_auctions_started
            .fetch_add(results.successful_tasks.len() as u64, Ordering::Relaxed);
        self.task_auctions_failed
            .fetch_add(results.failed_tasks.len() as u64, Ordering::Relaxed);
        self.passes.fetch_add(1, Ordering::Relaxed);
    }
}
