//! Container runtime layer.
//!
//! This module wraps the Docker/Podman API (via bollard) behind the
//! [`ContainerRuntime`] capability used by the instance manager, the volume
//! helpers and the metrics collector.
//!
//! ## Architecture
//!
//! - [`client`]: Docker/Podman API client wrapper with connection management
//! - [`config`]: Container configuration builder (ports, volume, limits, labels)
//! - [`orchestrator`]: Low-level container operations on top of bollard
//! - [`volume`]: Instance data volumes
//! - [`monitor`]: Point-in-time resource counters
//! - [`runtime`]: The [`ContainerRuntime`] trait and the handle/status types
//! - [`docker`]: [`DockerRuntime`], the bollard-backed runtime
//! - [`memory`]: [`InMemoryRuntime`], a process-local runtime for tests and dry runs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gso::container::{ContainerConfig, ContainerRuntime, DockerRuntime};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = DockerRuntime::connect().await?;
//!
//!     let config = ContainerConfig::builder()
//!         .image("itzg/minecraft-server:latest")
//!         .env("EULA", "TRUE")
//!         .memory_limit(2_147_483_648) // 2GB
//!         .port_binding("25565/tcp", 25565)
//!         .build()?;
//!
//!     let id = runtime.create_container("gso-demo", &config).await?;
//!     runtime.start_container(&id).await?;
//!     runtime.stop_container(&id, Duration::from_secs(30)).await?;
//!     runtime.remove_container(&id, true).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod docker;
mod memory;
mod monitor;
mod orchestrator;
mod runtime;
mod volume;

pub use client::{ContainerClient, ContainerClientConfig, RuntimeType};
pub use config::{ContainerConfig, ContainerConfigBuilder};
pub use docker::DockerRuntime;
pub use memory::InMemoryRuntime;
pub use monitor::{RawStats, ResourceMonitor};
pub use orchestrator::{ContainerOrchestrator, ContainerOrchestratorConfig};
pub use runtime::{ContainerHandle, ContainerRuntime, ContainerStatus};
pub use volume::VolumeManager;

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// Container or volume not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Container configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Volume error
    #[error("Volume error: {0}")]
    VolumeError(String),

    /// Runtime call did not complete in time
    #[error("Timed out after {0:?}: {1}")]
    Timeout(std::time::Duration, String),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

impl ContainerError {
    /// Whether this error means the target resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ContainerError::NotFound(_)
                | ContainerError::ApiError(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    ..
                })
        )
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
