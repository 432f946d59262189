//! Instance data volumes.
//!
//! Every instance keeps its world, configs and plugins on one named volume.
//! Volumes are always stamped with the ownership label so leftovers can be
//! found and cleaned up by label.

use crate::container::{ContainerError, Result};
use crate::env;
use bollard::Docker;
use std::collections::HashMap;
use tracing::{debug, info};

const VOLUME_DRIVER: &str = "local";

/// Labels written on a volume: the caller's labels plus the ownership marker.
fn volume_labels(labels: &HashMap<String, String>) -> HashMap<&str, &str> {
    let mut merged: HashMap<&str, &str> = labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    merged.insert(env::labels::MANAGED, "true");
    merged
}

fn map_remove_error(name: &str, error: bollard::errors::Error) -> ContainerError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerError::NotFound(name.to_string()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => ContainerError::VolumeError(format!("volume {} is still in use", name)),
        e => ContainerError::ApiError(e),
    }
}

/// Creates and removes instance data volumes.
pub struct VolumeManager {
    docker: Docker,
}

impl VolumeManager {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Create a named volume. Creating an existing name is a no-op on the daemon side.
    pub async fn create(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        if name.is_empty() {
            return Err(ContainerError::VolumeError(
                "Volume name is required".to_string(),
            ));
        }
        debug!("Creating volume: {}", name);

        self.docker
            .create_volume(bollard::volume::CreateVolumeOptions {
                name,
                driver: VOLUME_DRIVER,
                driver_opts: HashMap::new(),
                labels: volume_labels(labels),
            })
            .await?;

        info!("Created volume: {}", name);
        Ok(())
    }

    /// Force-remove a named volume.
    ///
    /// # Errors
    ///
    /// [`ContainerError::NotFound`] if the volume does not exist,
    /// [`ContainerError::VolumeError`] if a container still mounts it.
    pub async fn remove(&self, name: &str) -> Result<()> {
        debug!("Removing volume: {}", name);

        self.docker
            .remove_volume(name, Some(bollard::volume::RemoveVolumeOptions { force: true }))
            .await
            .map_err(|e| map_remove_error(name, e))?;

        info!("Removed volume: {}", name);
        Ok(())
    }
}
