//! Metrics for running game servers.
//!
//! - [`collector`]: periodic sampling of runtime counters and game figures
//! - [`game_stats`]: console and log sources for players, TPS and heap usage
//! - [`cpu`]: CPU percentage from consecutive counter snapshots
//! - [`exposition`]: Prometheus text rendering
//! - [`alerts`]: threshold rules with per-instance cooldown

pub mod alerts;
pub mod collector;
pub mod cpu;
pub mod exposition;
pub mod game_stats;
mod sample;

pub use alerts::{Alert, AlertEvaluator, AlertKind, AlertMetric, AlertRule, Comparison, Severity};
pub use collector::{CollectorConfig, MetricsCollector};
pub use exposition::{CONTENT_TYPE, ExpositionEncoder, InstanceLabels};
pub use game_stats::{GameStatsSource, LogHeuristicSource, ProtocolSource, StatsParser};
pub use sample::{GameStats, MetricSample, SampleSource};

use crate::container::ContainerError;
use crate::rcon::RconError;
use std::time::Duration;

/// Errors raised while sampling one instance.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Runtime query failed for instance {instance_id}: {source}")]
    Runtime {
        instance_id: String,
        #[source]
        source: ContainerError,
    },

    #[error("Timed out reading {what} of instance {instance_id} after {after:?}")]
    Timeout {
        instance_id: String,
        what: String,
        after: Duration,
    },

    #[error("Console error: {0}")]
    Console(#[from] RconError),

    #[error("Console disabled for instance {0}")]
    ConsoleDisabled(String),

    #[error("Invalid stats pattern: {0}")]
    Parser(#[from] regex::Error),
}
