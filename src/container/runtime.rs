//! Container runtime capability.
//!
//! [`ContainerRuntime`] is the seam between the orchestration logic and a
//! concrete runtime. Docker/Podman is reached through
//! [`DockerRuntime`](crate::container::DockerRuntime); tests and dry runs use
//! [`InMemoryRuntime`](crate::container::InMemoryRuntime).

use crate::container::{ContainerConfig, RawStats, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Status of a container as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Container is running
    Running,
    /// Container exists but is not running (created, exited, dead)
    Exited,
    /// Runtime has no such container
    NotFound,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::NotFound => write!(f, "not-found"),
        }
    }
}

/// Runtime reference plus derived status.
///
/// Recomputed on demand and never cached beyond a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Runtime container ID
    pub id: String,
    /// Status at the time of inspection
    pub status: ContainerStatus,
}

impl ContainerHandle {
    /// Whether the container is running.
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

/// Operations the orchestrator needs from a container runtime.
///
/// Missing resources are reported as errors for which
/// [`ContainerError::is_not_found`](crate::container::ContainerError::is_not_found)
/// returns true, except for [`inspect`](ContainerRuntime::inspect) which
/// reports [`ContainerStatus::NotFound`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a named volume.
    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    /// Remove a named volume.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Create a container and return its runtime ID.
    async fn create_container(&self, name: &str, config: &ContainerConfig) -> Result<String>;

    /// Start a created or stopped container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, killing it after `grace` elapses.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// Inspect a container and derive its status.
    async fn inspect(&self, id: &str) -> Result<ContainerHandle>;

    /// Wait for a container to exit and return its exit code.
    async fn wait_container(&self, id: &str, timeout: Duration) -> Result<i64>;

    /// Point-in-time cumulative resource counters.
    async fn stats(&self, id: &str) -> Result<RawStats>;

    /// Last `tail` lines of the container output.
    async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>>;
}
