//! CPU percentage from cumulative counters.

use crate::container::RawStats;
use dashmap::DashMap;

/// `cpu_delta / system_delta * 100`, or 0 when the host counter did not move.
pub fn cpu_percent(cpu_delta: u64, system_delta: u64) -> f64 {
    if system_delta == 0 {
        return 0.0;
    }
    cpu_delta as f64 / system_delta as f64 * 100.0
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    cpu_total: u64,
    system_total: u64,
}

/// Previous cumulative counters per instance.
#[derive(Default)]
pub struct CpuTracker {
    baselines: DashMap<String, Baseline>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stats` and return the usage since the previous observation.
    ///
    /// The first observation of an instance yields 0. Counter resets (a
    /// restarted container) also yield 0 and start a new baseline.
    pub fn observe(&self, instance_id: &str, stats: &RawStats) -> f64 {
        let current = Baseline {
            cpu_total: stats.cpu_total_usage,
            system_total: stats.system_cpu_usage,
        };

        match self.baselines.insert(instance_id.to_string(), current) {
            Some(previous)
                if current.cpu_total >= previous.cpu_total
                    && current.system_total >= previous.system_total =>
            {
                cpu_percent(
                    current.cpu_total - previous.cpu_total,
                    current.system_total - previous.system_total,
                )
            }
            _ => 0.0,
        }
    }

    /// Drop the baseline of an instance that stopped.
    pub fn forget(&self, instance_id: &str) {
        self.baselines.remove(instance_id);
    }
}
