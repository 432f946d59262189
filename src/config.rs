//! Service configuration discovery and loading
//!
//! The configuration file is looked up in this order:
//! 1. Current directory: ./gso.toml or ./.gso/config.toml
//! 2. User config: ~/.gso/config.toml
//! 3. System config: /etc/gso/config.toml
//! 4. Built-in defaults

use crate::env;
use crate::instance::ManagerConfig;
use crate::metrics::{AlertRule, CollectorConfig};
use crate::ports::PortBases;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// One or more values are unusable
    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine home directory")]
    NoHomeDir,
}

/// Borderline values that were accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Which container runtime backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// Docker or Podman through the local socket
    Docker,
    /// Process-local runtime without real containers
    Memory,
}

/// Instance lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub default_image: String,
    pub stop_grace_secs: u64,
    pub start_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            default_image: env::images::DEFAULT_SERVER_IMAGE.to_string(),
            stop_grace_secs: 30,
            start_timeout_secs: 60,
            poll_interval_ms: 500,
        }
    }
}

/// Metrics collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub interval_secs: u64,
    pub stats_timeout_secs: u64,
    pub console_timeout_secs: u64,
    pub log_tail: usize,
    /// Host on which instance console ports are published
    pub console_host: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stats_timeout_secs: 5,
            console_timeout_secs: 5,
            log_tail: 200,
            console_host: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub enabled: bool,
    pub rules: Vec<AlertRule>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: AlertRule::defaults(),
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address of the metrics endpoint
    pub listen_addr: String,
    pub runtime: RuntimeKind,
    pub ports: PortBases,
    pub lifecycle: LifecycleSettings,
    pub collector: CollectorSettings,
    pub alerts: AlertSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9225".to_string(),
            runtime: RuntimeKind::Docker,
            ports: PortBases::default(),
            lifecycle: LifecycleSettings::default(),
            collector: CollectorSettings::default(),
            alerts: AlertSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().map_err(|_| {
            ConfigError::Validation(vec![format!(
                "listen_addr '{}' is not a socket address",
                self.listen_addr
            )])
        })
    }

    /// Check the whole configuration, collecting every problem at once.
    pub fn validate(&self) -> Result<ValidationReport, ConfigError> {
        let mut errors = Vec::new();
        let mut report = ValidationReport::default();

        if self.listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "listen_addr '{}' is not a socket address",
                self.listen_addr
            ));
        }

        for (name, base) in [
            ("game", self.ports.game),
            ("rcon", self.ports.rcon),
            ("query", self.ports.query),
        ] {
            if base < 1024 {
                errors.push(format!("{} port base {} is below 1024", name, base));
            }
        }

        if self.lifecycle.start_timeout_secs == 0 {
            errors.push("lifecycle.start_timeout_secs must be greater than 0".to_string());
        }
        if self.lifecycle.poll_interval_ms == 0 {
            errors.push("lifecycle.poll_interval_ms must be greater than 0".to_string());
        }

        if self.collector.interval_secs == 0 {
            errors.push("collector.interval_secs must be greater than 0".to_string());
        } else if !(5..=300).contains(&self.collector.interval_secs) {
            report.warn(format!(
                "collector.interval_secs {} is outside the recommended 5-300s range",
                self.collector.interval_secs
            ));
        }
        if self.collector.stats_timeout_secs == 0 || self.collector.console_timeout_secs == 0 {
            errors.push("collector timeouts must be greater than 0".to_string());
        } else if self.collector.stats_timeout_secs >= self.collector.interval_secs.max(1) {
            report.warn(format!(
                "collector.stats_timeout_secs {} is not shorter than the interval",
                self.collector.stats_timeout_secs
            ));
        }

        for rule in &self.alerts.rules {
            if !rule.threshold.is_finite() {
                errors.push(format!("alert rule {} has a non-finite threshold", rule.kind));
            }
        }

        if errors.is_empty() {
            Ok(report)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            port_bases: self.ports,
            default_image: self.lifecycle.default_image.clone(),
            stop_grace: Duration::from_secs(self.lifecycle.stop_grace_secs),
            start_timeout: Duration::from_secs(self.lifecycle.start_timeout_secs),
            poll_interval: Duration::from_millis(self.lifecycle.poll_interval_ms),
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_secs(self.collector.interval_secs),
            stats_timeout: Duration::from_secs(self.collector.stats_timeout_secs),
            log_tail: self.collector.log_tail,
            console_timeout: Duration::from_secs(self.collector.console_timeout_secs),
            console_host: self.collector.console_host.clone(),
        }
    }

    /// Rules the alert evaluator runs; none when alerts are disabled.
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        if self.alerts.enabled {
            self.alerts.rules.clone()
        } else {
            Vec::new()
        }
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<ServiceConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return ServiceConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(ServiceConfig::default())
    }

    /// First existing candidate, if any
    pub fn find_config_file() -> Option<PathBuf> {
        Self::first_existing(&Self::config_candidates())
    }

    fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate.clone());
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    pub fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.extend(Self::local_candidates(&current_dir));
        }

        if let Some(home_dir) = Self::home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/gso").join(env::CONFIG_FILE_NAME));

        candidates
    }

    fn local_candidates(dir: &Path) -> [PathBuf; 2] {
        [
            dir.join(env::LOCAL_CONFIG_FILE_NAME),
            env::local_config_file_path(dir),
        ]
    }

    fn home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Write a default config file to ~/.gso/config.toml unless one exists
    pub fn create_default_user_config() -> Result<PathBuf, ConfigError> {
        let home_dir = Self::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Self::create_default_config_in(&env::user_config_dir_path(&home_dir))
    }

    fn create_default_config_in(config_dir: &Path) -> Result<PathBuf, ConfigError> {
        let config_path = config_dir.join(env::CONFIG_FILE_NAME);

        if !config_dir.exists() {
            fs::create_dir_all(config_dir).map_err(|source| ConfigError::Io {
                path: config_dir.to_path_buf(),
                source,
            })?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if config_path.exists() {
            warn!("Configuration file already exists: {:?}", config_path);
        } else {
            ServiceConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Human readable summary of the discovery hierarchy
    pub fn discovery_info() -> String {
        let mut lines = vec!["Configuration Discovery Hierarchy:".to_string()];

        for (i, candidate) in Self::config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "found"
            } else if candidate.exists() {
                "not a file"
            } else {
                "missing"
            };
            lines.push(format!("  {}. {:?} - {}", i + 1, candidate, status));
        }

        match Self::find_config_file() {
            Some(found) => lines.push(format!("Active configuration: {:?}", found)),
            None => lines.push("Active configuration: built-in defaults".to_string()),
        }
        lines.join("\n")
    }
}
