//! Docker/Podman-backed [`ContainerRuntime`].

use crate::container::{
    ContainerClient, ContainerConfig, ContainerHandle, ContainerOrchestrator,
    ContainerOrchestratorConfig, ContainerRuntime, RawStats, ResourceMonitor, Result,
    VolumeManager,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Container runtime talking to a Docker or Podman daemon.
pub struct DockerRuntime {
    orchestrator: ContainerOrchestrator,
    volumes: VolumeManager,
    monitor: ResourceMonitor,
}

impl DockerRuntime {
    /// Connect to the local Docker or Podman daemon.
    ///
    /// # Errors
    ///
    /// Returns error if no runtime is reachable.
    pub async fn connect() -> Result<Self> {
        let client = ContainerClient::new().await?;
        Ok(Self::with_client(
            client,
            ContainerOrchestratorConfig::default(),
        ))
    }

    /// Build a runtime from an existing client.
    pub fn with_client(client: ContainerClient, config: ContainerOrchestratorConfig) -> Self {
        let docker = client.docker().clone();
        Self {
            orchestrator: ContainerOrchestrator::with_client(client, config),
            volumes: VolumeManager::new(docker.clone()),
            monitor: ResourceMonitor::new(docker),
        }
    }

    /// Get the underlying orchestrator.
    pub fn orchestrator(&self) -> &ContainerOrchestrator {
        &self.orchestrator
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        self.volumes.create(name, labels).await
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.volumes.remove(name).await
    }

    async fn create_container(&self, name: &str, config: &ContainerConfig) -> Result<String> {
        self.orchestrator.create_container(config, name).await
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.orchestrator.start_container(id).await
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        self.orchestrator.stop_container(id, grace).await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.orchestrator.remove_container(id, force).await
    }

    async fn inspect(&self, id: &str) -> Result<ContainerHandle> {
        let status = self.orchestrator.client().container_status(id).await?;
        Ok(ContainerHandle {
            id: id.to_string(),
            status,
        })
    }

    async fn wait_container(&self, id: &str, timeout: Duration) -> Result<i64> {
        self.orchestrator.wait_container(id, timeout).await
    }

    async fn stats(&self, id: &str) -> Result<RawStats> {
        self.monitor.stats(id).await
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        self.orchestrator.logs(id, tail).await
    }
}
