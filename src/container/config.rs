//! Container configuration builders.
//!
//! Provides a fluent API for building container configurations programmatically
//! without manual Dockerfiles or config files.

use crate::container::{ContainerError, Result};
use bollard::service::{HostConfig, Mount, MountTypeEnum, PortBinding};
use std::collections::HashMap;

/// Container configuration builder.
///
/// Provides a fluent interface for constructing container configurations
/// with sane defaults and validation.
#[derive(Default)]
pub struct ContainerConfigBuilder {
    image: Option<String>,
    cmd: Option<Vec<String>>,
    env: Vec<String>,
    labels: HashMap<String, String>,
    memory_limit: Option<i64>,
    cpu_quota: Option<i64>,
    cpu_period: Option<i64>,
    mounts: Vec<Mount>,
    port_bindings: HashMap<String, Option<Vec<PortBinding>>>,
    auto_remove: bool,
}

impl ContainerConfigBuilder {
    /// Create a new container configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the command to run in the container.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Add an environment variable.
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push(format!("{}={}", key.into(), value.into()));
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in envs {
            self.env.push(format!("{}={}", k.into(), v.into()));
        }
        self
    }

    /// Add a label to the container.
    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set memory limit in bytes.
    pub fn memory_limit(mut self, bytes: i64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set CPU quota in microseconds per period.
    pub fn cpu_quota(mut self, quota: i64) -> Self {
        self.cpu_quota = Some(quota);
        self
    }

    /// Set CPU period in microseconds (default 100000).
    pub fn cpu_period(mut self, period: i64) -> Self {
        self.cpu_period = Some(period);
        self
    }

    /// Mount a named volume at `target`.
    pub fn volume<S: Into<String>, T: Into<String>>(mut self, volume: S, target: T) -> Self {
        self.mounts.push(Mount {
            target: Some(target.into()),
            source: Some(volume.into()),
            typ: Some(MountTypeEnum::VOLUME),
            read_only: Some(false),
            ..Default::default()
        });
        self
    }

    /// Add a port binding (container_port/protocol -> host_port).
    pub fn port_binding<S: Into<String>>(mut self, container_port: S, host_port: u16) -> Self {
        self.port_bindings.insert(
            container_port.into(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );
        self
    }

    /// Enable auto-removal of container on exit.
    pub fn auto_remove(mut self, enable: bool) -> Self {
        self.auto_remove = enable;
        self
    }

    /// Build the container configuration.
    ///
    /// # Errors
    ///
    /// Returns error if required fields are missing or invalid.
    pub fn build(self) -> Result<ContainerConfig> {
        let image = self
            .image
            .ok_or_else(|| ContainerError::ConfigError("Image is required".to_string()))?;

        if matches!(self.memory_limit, Some(bytes) if bytes <= 0) {
            return Err(ContainerError::ConfigError(
                "Memory limit must be positive".to_string(),
            ));
        }

        let exposed_ports: Vec<String> = self.port_bindings.keys().cloned().collect();

        let host_config = HostConfig {
            mounts: if self.mounts.is_empty() {
                None
            } else {
                Some(self.mounts)
            },
            memory: self.memory_limit,
            cpu_quota: self.cpu_quota,
            cpu_period: self.cpu_period,
            port_bindings: if self.port_bindings.is_empty() {
                None
            } else {
                Some(self.port_bindings)
            },
            auto_remove: Some(self.auto_remove),
            ..Default::default()
        };

        Ok(ContainerConfig {
            image,
            cmd: self.cmd,
            env: if self.env.is_empty() {
                None
            } else {
                Some(self.env)
            },
            labels: if self.labels.is_empty() {
                None
            } else {
                Some(self.labels)
            },
            exposed_ports,
            host_config,
        })
    }
}

/// Container configuration.
///
/// Holds container configuration for creation.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Image name
    pub image: String,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Environment variables (KEY=value)
    pub env: Option<Vec<String>>,
    /// Labels
    pub labels: Option<HashMap<String, String>>,
    /// Exposed container ports ("25565/tcp")
    pub exposed_ports: Vec<String>,
    /// Host configuration
    pub host_config: HostConfig,
}

impl ContainerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ContainerConfigBuilder {
        ContainerConfigBuilder::new()
    }

    /// Get the image name.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Look up an environment variable value.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.as_ref()?.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    /// Look up a label value.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.as_ref()?.get(key).map(String::as_str)
    }

    /// Host port bound to `container_port`, if any.
    pub fn host_port(&self, container_port: &str) -> Option<u16> {
        self.host_config
            .port_bindings
            .as_ref()?
            .get(container_port)?
            .as_ref()?
            .first()?
            .host_port
            .as_ref()?
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_config() {
        let config = ContainerConfig::builder()
            .image("itzg/minecraft-server:latest")
            .cmd(vec!["echo", "hello"])
            .build()
            .unwrap();

        assert_eq!(config.image(), "itzg/minecraft-server:latest");
        assert_eq!(config.cmd.unwrap(), vec!["echo", "hello"]);
    }

    #[test]
    fn test_resource_limits() {
        let config = ContainerConfig::builder()
            .image("itzg/minecraft-server:latest")
            .memory_limit(2_147_483_648) // 2GB
            .cpu_quota(150000)
            .cpu_period(100000)
            .build()
            .unwrap();

        assert_eq!(config.host_config.memory, Some(2_147_483_648));
        assert_eq!(config.host_config.cpu_quota, Some(150000));
        assert_eq!(config.host_config.cpu_period, Some(100000));
    }

    #[test]
    fn test_environment_variables() {
        let config = ContainerConfig::builder()
            .image("alpine:3")
            .env("EULA", "TRUE")
            .envs([("TYPE", "PAPER"), ("VERSION", "1.20.4")])
            .build()
            .unwrap();

        assert_eq!(config.env_value("EULA"), Some("TRUE"));
        assert_eq!(config.env_value("TYPE"), Some("PAPER"));
        assert_eq!(config.env_value("MISSING"), None);
    }

    #[test]
    fn test_ports_and_volume() {
        let config = ContainerConfig::builder()
            .image("alpine:3")
            .port_binding("25565/tcp", 25570)
            .volume("gso-data-abc", "/data")
            .build()
            .unwrap();

        assert_eq!(config.host_port("25565/tcp"), Some(25570));
        assert_eq!(config.exposed_ports, vec!["25565/tcp".to_string()]);

        let mounts = config.host_config.mounts.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].source.as_deref(), Some("gso-data-abc"));
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::VOLUME));
    }

    #[test]
    fn test_missing_image_error() {
        let result = ContainerConfig::builder().cmd(vec!["echo"]).build();

        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_non_positive_memory_rejected() {
        let result = ContainerConfig::builder()
            .image("alpine:3")
            .memory_limit(0)
            .build();

        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }
}
