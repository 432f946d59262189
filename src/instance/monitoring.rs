//! Per-instance monitoring settings and their validation.

use crate::config::{ConfigError, ValidationReport};
use crate::env;
use serde::{Deserialize, Serialize};

/// Lowest port accepted for monitoring endpoints.
pub const MIN_PORT: u32 = 1024;
/// Highest valid port.
pub const MAX_PORT: u32 = 65535;

/// Ports commonly taken by development services; accepted with a warning.
const COMMON_PORTS: &[u32] = &[3000, 3306, 5432, 6379, 8080, 8443, 9090, 27017];

const MIN_RECOMMENDED_INTERVAL_SECS: u64 = 5;
const MAX_RECOMMENDED_INTERVAL_SECS: u64 = 300;

/// Remote console settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RconSettings {
    pub enabled: bool,
    /// Console port inside the container
    pub port: u32,
    /// Console password; generated at creation when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for RconSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: env::ports::CONTAINER_RCON_PORT as u32,
            password: None,
        }
    }
}

/// Metrics exposition settings.
///
/// Disabled instances are left out of `/metrics` and get a 404 on
/// `/metrics/{id}`. All instances share the service endpoint, so `port` is
/// only validated and stored for external scrapers' bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpositionSettings {
    pub enabled: bool,
    pub port: u32,
}

impl Default for ExpositionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9225,
        }
    }
}

/// Monitoring configuration of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub rcon: RconSettings,
    pub exposition: ExpositionSettings,
    /// Seconds between collector samples
    pub poll_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            rcon: RconSettings::default(),
            exposition: ExpositionSettings::default(),
            poll_interval_secs: 30,
        }
    }
}

impl MonitoringConfig {
    /// Validate the configuration.
    ///
    /// Hard problems are returned as [`ConfigError::Validation`]; borderline
    /// values are accepted and listed in the returned report.
    pub fn validate(&self) -> Result<ValidationReport, ConfigError> {
        let mut errors = Vec::new();
        let mut report = ValidationReport::default();

        let mut check_port = |what: &str, port: u32| {
            if !(MIN_PORT..=MAX_PORT).contains(&port) {
                errors.push(format!(
                    "{} port {} outside {}-{}",
                    what, port, MIN_PORT, MAX_PORT
                ));
            } else if COMMON_PORTS.contains(&port) {
                report.warn(format!(
                    "{} port {} is commonly used by other services",
                    what, port
                ));
            }
        };

        if self.rcon.enabled {
            check_port("rcon", self.rcon.port);
        }
        if self.exposition.enabled {
            check_port("exposition", self.exposition.port);
        }

        if self.rcon.enabled
            && self
                .rcon
                .password
                .as_deref()
                .is_none_or(|password| password.is_empty())
        {
            errors.push("rcon is enabled but no password is set".to_string());
        }

        if self.rcon.enabled && self.exposition.enabled && self.rcon.port == self.exposition.port {
            errors.push(format!(
                "rcon and exposition share port {}",
                self.rcon.port
            ));
        }

        if self.poll_interval_secs == 0 {
            errors.push("poll interval must be at least one second".to_string());
        } else if self.poll_interval_secs < MIN_RECOMMENDED_INTERVAL_SECS {
            report.warn(format!(
                "poll interval of {}s may overload the server",
                self.poll_interval_secs
            ));
        } else if self.poll_interval_secs > MAX_RECOMMENDED_INTERVAL_SECS {
            report.warn(format!(
                "poll interval of {}s makes metrics stale",
                self.poll_interval_secs
            ));
        }

        if errors.is_empty() {
            Ok(report)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}
