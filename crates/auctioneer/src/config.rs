//! auctioneer.toml configuration.
//!
//! Every key has a default, so an empty file is a valid config that
//! listens on `0.0.0.0:9016` with no cells.
//!
//! ```toml
//! listen_address = "0.0.0.0:9016"
//! auction_runner_workers = 1000
//! starting_container_weight = 0.25
//! starting_container_count_maximum = 0
//! log_format = "json"
//!
//! [[cells]]
//! guid = "cell-z1-0"
//! address = "10.0.16.4:1800"
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use auction::FetchRetryPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctioneerConfig {
    pub listen_address: String,
    pub auction_runner_workers: usize,
    pub starting_container_weight: f64,
    /// Fleet-wide cap on starting containers. Zero or negative disables it.
    pub starting_container_count_maximum: i64,
    pub cell_state_timeout_ms: u64,
    pub communication_timeout_ms: u64,
    pub fetch_retry_delay_ms: u64,
    pub log_format: LogFormat,
    pub cells: Vec<CellConfig>,
}

impl Default for AuctioneerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9016".to_string(),
            auction_runner_workers: 1000,
            starting_container_weight: 0.25,
            starting_container_count_maximum: 0,
            cell_state_timeout_ms: 1000,
            communication_timeout_ms: 10_000,
            fetch_retry_delay_ms: 250,
            log_format: LogFormat::Text,
            cells: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// One cell in the static roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellConfig {
    pub guid: String,
    /// `host:port` of the cell's HTTP endpoint.
    pub address: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("auction_runner_workers must be at least 1")]
    NoWorkers,

    #[error("starting_container_weight must be a non-negative number, got {0}")]
    InvalidWeight(f64),

    #[error("duplicate cell guid {0:?}")]
    DuplicateCell(String),

    #[error("cell {0:?} has an empty address")]
    MissingAddress(String),

    #[error("invalid listen_address {0:?}")]
    InvalidListenAddress(String),
}

impl AuctioneerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: AuctioneerConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auction_runner_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.starting_container_weight.is_nan() || self.starting_container_weight < 0.0 {
            return Err(ConfigError::InvalidWeight(self.starting_container_weight));
        }
        self.listen_addr()?;

        let mut seen = HashSet::new();
        for cell in &self.cells {
            if !seen.insert(cell.guid.as_str()) {
                return Err(ConfigError::DuplicateCell(cell.guid.clone()));
            }
            if cell.address.is_empty() {
                return Err(ConfigError::MissingAddress(cell.guid.clone()));
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_address
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddress(self.listen_address.clone()))
    }

    pub fn cell_state_timeout(&self) -> Duration {
        Duration::from_millis(self.cell_state_timeout_ms)
    }

    pub fn communication_timeout(&self) -> Duration {
        Duration::from_millis(self.communication_timeout_ms)
    }

    pub fn fetch_retry_policy(&self) -> FetchRetryPolicy {
        FetchRetryPolicy {
            base_delay: Duration::from_millis(self.fetch_retry_delay_ms),
            ..FetchRetryPolicy::default()
        }
    }
}
