//! Low-level container operations.
//!
//! Wraps image pulling, container creation, start/stop/remove, waiting and
//! log retrieval on top of the bollard API. Not-found responses are mapped to
//! [`ContainerError::NotFound`] so callers can treat removal idempotently.

use crate::container::{ContainerClient, ContainerConfig, ContainerError, Result};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Container orchestrator configuration.
#[derive(Debug, Clone)]
pub struct ContainerOrchestratorConfig {
    /// Automatically pull images if not present
    pub auto_pull: bool,
}

impl Default for ContainerOrchestratorConfig {
    fn default() -> Self {
        Self { auto_pull: true }
    }
}

/// Container operations on top of a connected [`ContainerClient`].
pub struct ContainerOrchestrator {
    client: ContainerClient,
    config: ContainerOrchestratorConfig,
}

/// Map a bollard error to [`ContainerError`], turning 404s into `NotFound`.
fn map_not_found(id: &str, error: bollard::errors::Error) -> ContainerError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerError::NotFound(id.to_string()),
        e => ContainerError::ApiError(e),
    }
}

impl ContainerOrchestrator {
    /// Create an orchestrator with an existing client.
    pub fn with_client(client: ContainerClient, config: ContainerOrchestratorConfig) -> Self {
        Self { client, config }
    }

    /// Pull a container image if not present locally.
    ///
    /// # Errors
    ///
    /// Returns error if image pull fails.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.client.image_exists(image).await? {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        info!("Pulling image: {}", image);
        self.pull_image(image).await
    }

    /// Pull a container image from registry.
    ///
    /// # Errors
    ///
    /// Returns error if image pull fails.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let mut stream = self.client.docker().create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(error) = info.error {
                return Err(ContainerError::Other(format!("Pull failed: {}", error)));
            }
            if let Some(status) = info.status {
                debug!("Pull status: {}", status);
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    /// Create a container from configuration.
    ///
    /// # Returns
    ///
    /// Container ID
    ///
    /// # Errors
    ///
    /// Returns error if image pull or container creation fails.
    pub async fn create_container(&self, config: &ContainerConfig, name: &str) -> Result<String> {
        if self.config.auto_pull {
            self.ensure_image(config.image()).await?;
        }

        let options = bollard::container::CreateContainerOptions {
            name,
            ..Default::default()
        };

        debug!("Creating container: {}", name);

        use bollard::container::Config as BollardConfig;

        let exposed_ports: HashMap<String, HashMap<(), ()>> = config
            .exposed_ports
            .iter()
            .map(|port| (port.clone(), HashMap::new()))
            .collect();

        let bollard_config = BollardConfig {
            image: Some(config.image.clone()),
            cmd: config.cmd.clone(),
            env: config.env.clone(),
            labels: config.labels.clone(),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(config.host_config.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .docker()
            .create_container(Some(options), bollard_config)
            .await?;

        info!("Created container: {} ({})", name, response.id);

        Ok(response.id)
    }

    /// Start a container.
    ///
    /// # Errors
    ///
    /// Returns error if container start fails.
    pub async fn start_container(&self, container_id: &str) -> Result<()> {
        debug!("Starting container: {}", container_id);

        self.client
            .docker()
            .start_container(
                container_id,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await
            .map_err(|e| map_not_found(container_id, e))?;

        info!("Started container: {}", container_id);
        Ok(())
    }

    /// Stop a container, killing it once `grace` has elapsed.
    ///
    /// Stopping an already stopped container succeeds.
    ///
    /// # Errors
    ///
    /// Returns error if container stop fails.
    pub async fn stop_container(&self, container_id: &str, grace: Duration) -> Result<()> {
        debug!("Stopping container: {}", container_id);

        match self
            .client
            .docker()
            .stop_container(
                container_id,
                Some(bollard::container::StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await
        {
            Ok(()) => {}
            // 304: container already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} was already stopped", container_id);
            }
            Err(e) => return Err(map_not_found(container_id, e)),
        }

        info!("Stopped container: {}", container_id);
        Ok(())
    }

    /// Remove a container.
    ///
    /// # Errors
    ///
    /// Returns error if container removal fails.
    pub async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        debug!("Removing container: {}", container_id);

        self.client
            .docker()
            .remove_container(
                container_id,
                Some(bollard::container::RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_not_found(container_id, e))?;

        info!("Removed container: {}", container_id);
        Ok(())
    }

    /// Wait for a container to exit and return its exit code.
    ///
    /// # Errors
    ///
    /// Returns error if waiting fails or `timeout` elapses first.
    pub async fn wait_container(&self, container_id: &str, timeout: Duration) -> Result<i64> {
        let mut stream = self.client.docker().wait_container(
            container_id,
            None::<bollard::container::WaitContainerOptions<String>>,
        );

        match tokio::time::timeout(timeout, stream.next()).await {
            Err(_) => Err(ContainerError::Timeout(
                timeout,
                format!("waiting for container {}", container_id),
            )),
            Ok(Some(Ok(response))) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                Ok(code)
            }
            Ok(Some(Err(e))) => Err(map_not_found(container_id, e)),
            Ok(None) => Err(ContainerError::Other(format!(
                "Wait stream for container {} ended without a status",
                container_id
            ))),
        }
    }

    /// Get the last `tail` lines of container logs.
    ///
    /// # Errors
    ///
    /// Returns error if log retrieval fails.
    pub async fn logs(&self, container_id: &str, tail: usize) -> Result<Vec<String>> {
        let mut stream = self.client.docker().logs(
            container_id,
            Some(bollard::container::LogsOptions {
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        );
        let mut output = String::new();

        while let Some(result) = stream.next().await {
            let log = result.map_err(|e| map_not_found(container_id, e))?;
            output.push_str(&log.to_string());
        }

        Ok(output.lines().map(str::to_string).collect())
    }

    /// Get the underlying client.
    pub fn client(&self) -> &ContainerClient {
        &self.client
    }
}
