//! Process-local [`ContainerRuntime`].
//!
//! Keeps containers and volumes in memory. Used for dry runs (`--runtime
//! memory`) and throughout the test suite, where it also allows injecting
//! failures, out-of-band removals, stats and log lines.

use crate::container::{
    ContainerConfig, ContainerError, ContainerHandle, ContainerRuntime, ContainerStatus,
    RawStats, Result,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryContainer {
    name: String,
    config: ContainerConfig,
    running: bool,
    stats: RawStats,
    logs: Vec<String>,
}

/// In-memory container runtime.
#[derive(Default)]
pub struct InMemoryRuntime {
    containers: DashMap<String, MemoryContainer>,
    volumes: DashMap<String, HashMap<String, String>>,
    failures: DashSet<String>,
    exit_codes: Mutex<VecDeque<i64>>,
    next_id: AtomicU64,
}

impl InMemoryRuntime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `operation` fail until cleared.
    ///
    /// Operation names match the [`ContainerRuntime`] method names
    /// (`"create_container"`, `"stats"`, ...).
    pub fn inject_failure(&self, operation: &str) {
        self.failures.insert(operation.to_string());
    }

    /// Stop failing `operation`.
    pub fn clear_failure(&self, operation: &str) {
        self.failures.remove(operation);
    }

    /// Queue the exit code returned by the next `wait_container` call.
    pub fn push_exit_code(&self, code: i64) {
        if let Ok(mut codes) = self.exit_codes.lock() {
            codes.push_back(code);
        }
    }

    /// Replace the counters reported for a container.
    pub fn set_stats(&self, id: &str, stats: RawStats) {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.stats = stats;
        }
    }

    /// Append output lines to a container log.
    pub fn push_logs<I, S>(&self, id: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.logs.extend(lines.into_iter().map(Into::into));
        }
    }

    /// Simulate a container exiting on its own.
    pub fn crash(&self, id: &str) {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.running = false;
        }
    }

    /// Remove a container behind the orchestrator's back.
    pub fn remove_out_of_band(&self, id: &str) {
        self.containers.remove(id);
    }

    /// Number of containers currently known.
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Whether a volume exists.
    pub fn volume_exists(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    /// IDs of every known container.
    pub fn container_ids(&self) -> Vec<String> {
        self.containers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Configuration a container was created with.
    pub fn container_config(&self, id: &str) -> Option<ContainerConfig> {
        self.containers.get(id).map(|c| c.config.clone())
    }

    /// Find a container ID by name.
    pub fn container_id_by_name(&self, name: &str) -> Option<String> {
        self.containers
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.key().clone())
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.failures.contains(operation) {
            return Err(ContainerError::Other(format!(
                "injected failure: {}",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        self.check("create_volume")?;
        self.volumes.insert(name.to_string(), labels.clone());
        debug!("Created in-memory volume: {}", name);
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.check("remove_volume")?;
        self.volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))
    }

    async fn create_container(&self, name: &str, config: &ContainerConfig) -> Result<String> {
        self.check("create_container")?;

        if self.containers.iter().any(|entry| entry.name == name) {
            return Err(ContainerError::Other(format!(
                "Conflict: container name {} is already in use",
                name
            )));
        }

        let id = format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.containers.insert(
            id.clone(),
            MemoryContainer {
                name: name.to_string(),
                config: config.clone(),
                running: false,
                stats: RawStats::default(),
                logs: Vec::new(),
            },
        );
        debug!("Created in-memory container: {} ({})", name, id);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.check("start_container")?;
        let mut container = self
            .containers
            .get_mut(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        self.check("stop_container")?;
        let mut container = self
            .containers
            .get_mut(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.check("remove_container")?;
        let running = self
            .containers
            .get(id)
            .map(|c| c.running)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;

        if running && !force {
            return Err(ContainerError::Other(format!(
                "Conflict: container {} is running",
                id
            )));
        }

        self.containers.remove(id);
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerHandle> {
        self.check("inspect")?;
        let status = match self.containers.get(id) {
            Some(container) if container.running => ContainerStatus::Running,
            Some(_) => ContainerStatus::Exited,
            None => ContainerStatus::NotFound,
        };
        Ok(ContainerHandle {
            id: id.to_string(),
            status,
        })
    }

    async fn wait_container(&self, id: &str, _timeout: Duration) -> Result<i64> {
        self.check("wait_container")?;
        let mut container = self
            .containers
            .get_mut(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.running = false;

        let code = self
            .exit_codes
            .lock()
            .ok()
            .and_then(|mut codes| codes.pop_front())
            .unwrap_or(0);
        Ok(code)
    }

    async fn stats(&self, id: &str) -> Result<RawStats> {
        self.check("stats")?;
        self.containers
            .get(id)
            .map(|c| c.stats)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        self.check("logs")?;
        let container = self
            .containers
            .get(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        let skip = container.logs.len().saturating_sub(tail);
        Ok(container.logs[skip..].to_vec())
    }
}
