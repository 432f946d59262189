//! Container resource monitoring.
//!
//! Reads cumulative CPU counters and point-in-time memory, network and
//! block I/O counters. Percentages are derived by the metrics collector from
//! two consecutive readings, see [`crate::metrics::cpu`].

use crate::container::{ContainerError, Result};
use bollard::Docker;
use bollard::models::ContainerStatsResponse;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Raw resource counters for a container, all sizes in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStats {
    /// Cumulative container CPU time in nanoseconds
    pub cpu_total_usage: u64,
    /// Cumulative host CPU time in nanoseconds
    pub system_cpu_usage: u64,
    /// Number of CPUs visible to the container
    pub online_cpus: u32,
    /// Memory usage in bytes
    pub memory_usage: u64,
    /// Memory limit in bytes
    pub memory_limit: u64,
    /// Network bytes received, summed over interfaces
    pub network_rx_bytes: u64,
    /// Network bytes transmitted, summed over interfaces
    pub network_tx_bytes: u64,
    /// Block I/O bytes read
    pub block_io_read: u64,
    /// Block I/O bytes written
    pub block_io_write: u64,
}

/// Resource monitor for containers.
pub struct ResourceMonitor {
    docker: Docker,
}

impl ResourceMonitor {
    /// Create a new resource monitor.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Get current counters for a container.
    ///
    /// # Errors
    ///
    /// Returns error if container not found or stats unavailable.
    pub async fn stats(&self, container_id: &str) -> Result<RawStats> {
        debug!("Fetching stats for container: {}", container_id);

        let mut stream = self.docker.stats(
            container_id,
            Some(bollard::container::StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );

        match stream.next().await {
            Some(Ok(stats)) => Ok(Self::raw_stats(&stats)),
            Some(Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            })) => Err(ContainerError::NotFound(container_id.to_string())),
            Some(Err(e)) => Err(ContainerError::ApiError(e)),
            None => Err(ContainerError::Other(format!(
                "No stats available for container: {}",
                container_id
            ))),
        }
    }

    /// Flatten a stats response into [`RawStats`].
    fn raw_stats(stats: &ContainerStatsResponse) -> RawStats {
        let (cpu_total_usage, system_cpu_usage, online_cpus) = stats
            .cpu_stats
            .as_ref()
            .map(|cpu| {
                (
                    cpu.cpu_usage
                        .as_ref()
                        .and_then(|usage| usage.total_usage)
                        .unwrap_or(0),
                    cpu.system_cpu_usage.unwrap_or(0),
                    cpu.online_cpus.unwrap_or(1) as u32,
                )
            })
            .unwrap_or((0, 0, 1));

        let (memory_usage, memory_limit) = stats
            .memory_stats
            .as_ref()
            .map(|mem| (mem.usage.unwrap_or(0), mem.limit.unwrap_or(0)))
            .unwrap_or((0, 0));

        let (network_rx_bytes, network_tx_bytes) = stats
            .networks
            .as_ref()
            .map(|networks| {
                networks.values().fold((0u64, 0u64), |(rx, tx), net| {
                    (
                        rx.saturating_add(net.rx_bytes.unwrap_or(0)),
                        tx.saturating_add(net.tx_bytes.unwrap_or(0)),
                    )
                })
            })
            .unwrap_or((0, 0));

        let (block_io_read, block_io_write) = stats
            .blkio_stats
            .as_ref()
            .and_then(|blkio| blkio.io_service_bytes_recursive.as_ref())
            .map(|entries| {
                entries.iter().fold((0u64, 0u64), |(read, write), entry| {
                    let value = entry.value.unwrap_or(0);
                    match entry.op.as_deref().map(str::to_ascii_lowercase).as_deref() {
                        Some("read") => (read.saturating_add(value), write),
                        Some("write") => (read, write.saturating_add(value)),
                        _ => (read, write),
                    }
                })
            })
            .unwrap_or((0, 0));

        RawStats {
            cpu_total_usage,
            system_cpu_usage,
            online_cpus,
            memory_usage,
            memory_limit,
            network_rx_bytes,
            network_tx_bytes,
            block_io_read,
            block_io_write,
        }
    }
}
