//! Instance records and creation requests.

use crate::instance::MonitoringConfig;
use crate::ports::InstancePorts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Instance identifier.
pub type InstanceId = String;

/// Generate a fresh instance identifier (12 lowercase hex chars).
pub fn new_instance_id() -> InstanceId {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// A runtime call failed; left only through start or delete
    Error,
}

impl InstanceState {
    /// Whether the state is resolved by polling the runtime.
    pub fn is_transient(&self) -> bool {
        matches!(self, InstanceState::Starting | InstanceState::Stopping)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Error => write!(f, "error"),
        }
    }
}

/// Resource limits as requested by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit string such as "2G" or "512M"
    pub memory: String,
    /// CPU cores, fractional values allowed
    pub cpu: Option<f64>,
}

/// A supervised game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    /// Server flavour passed to the image as TYPE (vanilla, paper, forge, ...)
    pub server_type: String,
    pub version: String,
    pub image: String,
    pub state: InstanceState,
    /// Runtime container ID, when one exists
    pub container_id: Option<String>,
    pub ports: InstancePorts,
    pub limits: ResourceLimits,
    /// User supplied environment, before defaults are merged in
    pub env: BTreeMap<String, String>,
    pub rcon_password: String,
    pub monitoring: MonitoringConfig,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Record a state change.
    pub fn transition(&mut self, state: InstanceState) {
        self.state = state;
        self.updated_at = Utc::now();
        if state != InstanceState::Error {
            self.last_error = None;
        }
    }

    /// Move to [`InstanceState::Error`] and keep the message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = InstanceState::Error;
        self.last_error = Some(message.into());
        self.updated_at = Utc::now();
    }
}

fn default_server_type() -> String {
    "vanilla".to_string()
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_memory() -> String {
    "2G".to_string()
}

/// Request to create an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Explicit ID; generated when absent
    #[serde(default)]
    pub id: Option<InstanceId>,
    pub name: String,
    #[serde(default = "default_server_type")]
    pub server_type: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Image override
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub monitoring: Option<MonitoringConfig>,
}

impl InstanceSpec {
    /// Spec with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            server_type: default_server_type(),
            version: default_version(),
            memory: default_memory(),
            cpu: None,
            env: BTreeMap::new(),
            image: None,
            monitoring: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<InstanceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_server_type(mut self, server_type: impl Into<String>) -> Self {
        self.server_type = server_type.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    pub fn with_cpu(mut self, cores: f64) -> Self {
        self.cpu = Some(cores);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_monitoring(mut self, monitoring: MonitoringConfig) -> Self {
        self.monitoring = Some(monitoring);
        self
    }
}
