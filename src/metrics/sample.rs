//! Metric sample types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Where the game-level figures of a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    /// Live answers from the remote console
    Console,
    /// Heuristics over recent log lines
    LogFallback,
    /// No game figures: the instance was not running when sampled
    RuntimeOnly,
}

impl std::fmt::Display for SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleSource::Console => write!(f, "console"),
            SampleSource::LogFallback => write!(f, "log_fallback"),
            SampleSource::RuntimeOnly => write!(f, "runtime_only"),
        }
    }
}

/// Game-level figures reported by a [`GameStatsSource`](crate::metrics::GameStatsSource).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStats {
    pub players: Option<u32>,
    pub max_players: Option<u32>,
    pub tps: Option<f64>,
    /// Heap usage as reported by the game, in bytes
    pub memory_bytes: Option<u64>,
    /// Provider-specific values
    pub extensions: BTreeMap<String, f64>,
}

impl GameStats {
    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.players.is_none()
            && self.max_players.is_none()
            && self.tps.is_none()
            && self.memory_bytes.is_none()
            && self.extensions.is_empty()
    }

    /// Fill every missing field from `fallback`. Values already present win.
    pub fn merge_fallback(mut self, fallback: GameStats) -> GameStats {
        self.players = self.players.or(fallback.players);
        self.max_players = self.max_players.or(fallback.max_players);
        self.tps = self.tps.or(fallback.tps);
        self.memory_bytes = self.memory_bytes.or(fallback.memory_bytes);
        for (key, value) in fallback.extensions {
            self.extensions.entry(key).or_insert(value);
        }
        self
    }
}

/// Point-in-time snapshot of one instance.
///
/// Built once by the collector and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    /// Whether the container was running when sampled
    pub up: bool,
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
    pub players: Option<u32>,
    pub max_players: Option<u32>,
    pub tps: Option<f64>,
    pub game_memory_bytes: Option<u64>,
    pub extensions: BTreeMap<String, f64>,
    pub source: SampleSource,
}

impl MetricSample {
    /// Sample for an instance whose container is not running.
    pub fn down(instance_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance_id.into(),
            timestamp,
            up: false,
            cpu_percent: 0.0,
            memory_used_bytes: 0,
            memory_limit_bytes: 0,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            block_read_bytes: 0,
            block_write_bytes: 0,
            players: None,
            max_players: None,
            tps: None,
            game_memory_bytes: None,
            extensions: BTreeMap::new(),
            source: SampleSource::RuntimeOnly,
        }
    }

    /// Memory usage as a percentage of the limit, if a limit is known.
    pub fn memory_percent(&self) -> Option<f64> {
        if self.memory_limit_bytes == 0 {
            return None;
        }
        Some(self.memory_used_bytes as f64 / self.memory_limit_bytes as f64 * 100.0)
    }

    /// Memory usage in megabytes.
    pub fn memory_used_mb(&self) -> f64 {
        self.memory_used_bytes as f64 / BYTES_PER_MB
    }

    /// Memory limit in megabytes.
    pub fn memory_limit_mb(&self) -> f64 {
        self.memory_limit_bytes as f64 / BYTES_PER_MB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_primary_values() {
        let primary = GameStats {
            players: Some(3),
            tps: None,
            ..Default::default()
        };
        let fallback = GameStats {
            players: Some(7),
            tps: Some(18.5),
            ..Default::default()
        };

        let merged = primary.merge_fallback(fallback);
        assert_eq!(merged.players, Some(3));
        assert_eq!(merged.tps, Some(18.5));
    }

    #[test]
    fn test_memory_helpers() {
        let mut sample = MetricSample::down("abc", Utc::now());
        assert_eq!(sample.memory_percent(), None);

        sample.memory_used_bytes = 512 * 1024 * 1024;
        sample.memory_limit_bytes = 2048 * 1024 * 1024;
        assert_eq!(sample.memory_percent(), Some(25.0));
        assert_eq!(sample.memory_used_mb(), 512.0);
        assert_eq!(sample.memory_limit_mb(), 2048.0);
    }

    #[test]
    fn test_down_sample() {
        let sample = MetricSample::down("abc", Utc::now());
        assert!(!sample.up);
        assert_eq!(sample.source, SampleSource::RuntimeOnly);
        assert!(sample.players.is_none());
    }
}
