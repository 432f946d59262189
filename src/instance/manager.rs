//! Instance lifecycle management.
//!
//! [`InstanceManager`] owns instance records and drives their containers
//! through the [`ContainerRuntime`] seam:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!    \_________\___________\__________\____-> Error
//! ```
//!
//! `Error` is left only through [`InstanceManager::start`] (which
//! re-provisions the container) or [`InstanceManager::delete`]. Operations
//! that do not apply to the current state return the instance unchanged.
//!
//! The manager does not serialize calls for the same instance; callers hold a
//! per-instance lock (see [`InstanceLocks`](crate::service::InstanceLocks)).

use crate::config::ConfigError;
use crate::container::{
    ContainerConfig, ContainerError, ContainerHandle, ContainerRuntime, ContainerStatus,
};
use crate::env;
use crate::instance::filesystem::{
    FileOperation, FileOutcome, FilesystemError, FilesystemMutator, HelperContainerMutator,
};
use crate::instance::resources::{self, CPU_PERIOD, ResourceError};
use crate::instance::{Instance, InstanceSpec, InstanceState, ResourceLimits, new_instance_id};
use crate::ports::{self, PortBases, PortError};
use crate::store::{InstanceStore, StoreError};
use chrono::Utc;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const RCON_PASSWORD_LEN: usize = 24;

/// Instance management errors.
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Instance already exists: {0}")]
    AlreadyExists(String),

    /// Creating the volume or container failed; the instance is left in `Error`
    #[error("Failed to provision instance {id}: {message}")]
    Provisioning { id: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] ContainerError),

    #[error("Port allocation failed: {0}")]
    Ports(#[from] PortError),

    #[error(transparent)]
    Resources(#[from] ResourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Timed out after {timeout:?} waiting for instance {id} to become {target}")]
    Timeout {
        id: String,
        target: InstanceState,
        timeout: Duration,
    },
}

pub type Result<T> = std::result::Result<T, InstanceError>;

/// Instance manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub port_bases: PortBases,
    /// Image used when a spec does not name one
    pub default_image: String,
    /// Time a server gets to shut down before it is killed
    pub stop_grace: Duration,
    /// Upper bound for `Starting -> Running`
    pub start_timeout: Duration,
    /// Interval between runtime status polls
    pub poll_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            port_bases: PortBases::default(),
            default_image: env::images::DEFAULT_SERVER_IMAGE.to_string(),
            stop_grace: Duration::from_secs(30),
            start_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(RCON_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Environment passed to the server container.
///
/// Computed defaults are overridden by the user's environment, except for the
/// console settings which always follow the instance record.
pub fn container_env(instance: &Instance) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    merged.insert("EULA".to_string(), "TRUE".to_string());
    merged.insert("TYPE".to_string(), instance.server_type.to_ascii_uppercase());
    merged.insert("VERSION".to_string(), instance.version.to_ascii_uppercase());
    merged.insert("MEMORY".to_string(), instance.limits.memory.clone());
    merged.insert("ENABLE_QUERY".to_string(), "true".to_string());
    merged.insert(
        "QUERY_PORT".to_string(),
        env::ports::CONTAINER_GAME_PORT.to_string(),
    );

    merged.extend(instance.env.clone());

    let rcon = &instance.monitoring.rcon;
    merged.insert("ENABLE_RCON".to_string(), rcon.enabled.to_string());
    merged.insert("RCON_PORT".to_string(), rcon.port.to_string());
    merged.insert("RCON_PASSWORD".to_string(), instance.rcon_password.clone());
    merged
}

/// Ownership labels for containers and volumes of an instance.
fn instance_labels(instance: &Instance) -> HashMap<String, String> {
    HashMap::from([
        (env::labels::MANAGED.to_string(), "true".to_string()),
        (env::labels::INSTANCE_ID.to_string(), instance.id.clone()),
        (env::labels::INSTANCE_NAME.to_string(), instance.name.clone()),
    ])
}

/// Build the server container configuration for an instance.
pub fn container_config(instance: &Instance) -> Result<ContainerConfig> {
    let memory = resources::parse_memory_bytes(&instance.limits.memory)?;

    let mut builder = ContainerConfig::builder()
        .image(instance.image.as_str())
        .envs(container_env(instance))
        .memory_limit(memory)
        .volume(env::volume_name(&instance.id), env::DATA_DIR)
        .port_binding(
            format!("{}/tcp", env::ports::CONTAINER_GAME_PORT),
            instance.ports.game,
        )
        .port_binding(
            format!("{}/tcp", instance.monitoring.rcon.port),
            instance.ports.rcon,
        )
        .port_binding(
            format!("{}/udp", env::ports::CONTAINER_GAME_PORT),
            instance.ports.query,
        )
        .label(env::labels::ROLE, "server");

    for (key, value) in instance_labels(instance) {
        builder = builder.label(key, value);
    }

    if let Some(cores) = instance.limits.cpu {
        builder = builder
            .cpu_quota(resources::parse_cpu_quota(cores)?)
            .cpu_period(CPU_PERIOD);
    }

    Ok(builder.build()?)
}

/// Creates, drives and removes game server instances.
pub struct InstanceManager {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn InstanceStore>,
    filesystem: Arc<dyn FilesystemMutator>,
    config: ManagerConfig,
    allocation_lock: Mutex<()>,
}

impl InstanceManager {
    /// Create a manager that edits volumes through helper containers.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn InstanceStore>,
        config: ManagerConfig,
    ) -> Self {
        let filesystem = Arc::new(HelperContainerMutator::new(Arc::clone(&runtime)));
        Self {
            runtime,
            store,
            filesystem,
            config,
            allocation_lock: Mutex::new(()),
        }
    }

    /// Replace the filesystem capability.
    pub fn with_filesystem(mut self, filesystem: Arc<dyn FilesystemMutator>) -> Self {
        self.filesystem = filesystem;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub async fn get(&self, id: &str) -> Result<Instance> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| InstanceError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Instance>> {
        Ok(self.store.list().await?)
    }

    /// Create an instance: allocate ports, create its volume and container.
    ///
    /// The instance is left `Stopped`. Provisioning failures leave the record
    /// in `Error` with the message recorded and are not retried.
    pub async fn create(&self, spec: InstanceSpec) -> Result<Instance> {
        resources::parse_memory_bytes(&spec.memory)?;
        if let Some(cores) = spec.cpu {
            resources::parse_cpu_quota(cores)?;
        }

        let mut monitoring = spec.monitoring.clone().unwrap_or_default();
        let rcon_password = monitoring
            .rcon
            .password
            .clone()
            .filter(|password| !password.is_empty())
            .unwrap_or_else(generate_password);
        monitoring.rcon.password = Some(rcon_password.clone());

        let report = monitoring.validate()?;
        for warning in &report.warnings {
            warn!("Instance {}: {}", spec.name, warning);
        }

        let id = spec.id.clone().unwrap_or_else(new_instance_id);
        let image = spec
            .image
            .clone()
            .unwrap_or_else(|| self.config.default_image.clone());

        let mut instance = {
            let _guard = self.allocation_lock.lock().await;

            if self.store.get(&id).await?.is_some() {
                return Err(InstanceError::AlreadyExists(id));
            }

            let in_use = self.store.ports_in_use().await?;
            let ports = ports::allocate_instance_ports(self.config.port_bases, &in_use)?;

            let now = Utc::now();
            let instance = Instance {
                id: id.clone(),
                name: spec.name,
                server_type: spec.server_type,
                version: spec.version,
                image,
                state: InstanceState::Stopped,
                container_id: None,
                ports,
                limits: ResourceLimits {
                    memory: spec.memory,
                    cpu: spec.cpu,
                },
                env: spec.env,
                rcon_password,
                monitoring,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            self.store.put(instance.clone()).await?;
            instance
        };

        info!(
            "Allocated ports for instance {}: game={} rcon={} query={}",
            id, instance.ports.game, instance.ports.rcon, instance.ports.query
        );

        if let Err(e) = self.provision(&mut instance).await {
            return Err(self.provisioning_failed(instance, e).await);
        }

        self.store.put(instance.clone()).await?;
        info!("Created instance {} ({})", instance.name, instance.id);
        Ok(instance)
    }

    /// Create the volume and server container for an instance.
    async fn provision(&self, instance: &mut Instance) -> Result<()> {
        let config = container_config(instance)?;

        self.runtime
            .create_volume(&env::volume_name(&instance.id), &instance_labels(instance))
            .await?;

        let container_id = self
            .runtime
            .create_container(&env::container_name(&instance.id), &config)
            .await?;

        debug!(
            "Provisioned container {} for instance {}",
            container_id, instance.id
        );
        instance.container_id = Some(container_id);
        instance.updated_at = Utc::now();
        Ok(())
    }

    async fn provisioning_failed(&self, mut instance: Instance, cause: InstanceError) -> InstanceError {
        let message = cause.to_string();
        error!("Provisioning instance {} failed: {}", instance.id, message);
        instance.fail(message.clone());
        if let Err(e) = self.store.put(instance.clone()).await {
            warn!("Failed to record error state for {}: {}", instance.id, e);
        }
        InstanceError::Provisioning {
            id: instance.id,
            message,
        }
    }

    async fn record_failure(&self, mut instance: Instance, cause: InstanceError) -> InstanceError {
        error!("Instance {} failed: {}", instance.id, cause);
        instance.fail(cause.to_string());
        if let Err(e) = self.store.put(instance).await {
            warn!("Failed to record error state: {}", e);
        }
        cause
    }

    /// Start an instance and wait until its container runs.
    ///
    /// Instances in `Error`, or whose container is gone, get a fresh container
    /// first.
    pub async fn start(&self, id: &str) -> Result<Instance> {
        let mut instance = self.get(id).await?;

        if matches!(instance.state, InstanceState::Running | InstanceState::Stopping) {
            debug!("Instance {} is {}; start is a no-op", id, instance.state);
            return Ok(instance);
        }

        let needs_container = match &instance.container_id {
            None => true,
            Some(container_id) => {
                let handle = self.runtime.inspect(container_id).await?;
                handle.status == ContainerStatus::NotFound
                    || instance.state == InstanceState::Error
            }
        };

        if needs_container {
            if let Some(stale) = instance.container_id.take() {
                match self.runtime.remove_container(&stale, true).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(self.record_failure(instance, e.into()).await),
                }
            }
            if let Err(e) = self.provision(&mut instance).await {
                return Err(self.provisioning_failed(instance, e).await);
            }
        }

        let Some(container_id) = instance.container_id.clone() else {
            return Err(InstanceError::NotFound(id.to_string()));
        };

        instance.transition(InstanceState::Starting);
        self.store.put(instance.clone()).await?;
        info!("Starting instance {} ({})", instance.name, id);

        if let Err(e) = self.runtime.start_container(&container_id).await {
            return Err(self.record_failure(instance, e.into()).await);
        }

        let timeout = self.config.start_timeout;
        match self
            .wait_for_status(&container_id, timeout, |status| {
                status == ContainerStatus::Running
            })
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                let cause = InstanceError::Timeout {
                    id: id.to_string(),
                    target: InstanceState::Running,
                    timeout,
                };
                return Err(self.record_failure(instance, cause).await);
            }
            Err(e) => return Err(self.record_failure(instance, e.into()).await),
        }

        instance.transition(InstanceState::Running);
        self.store.put(instance.clone()).await?;
        info!("Instance {} is running", id);
        Ok(instance)
    }

    /// Stop an instance with the configured grace period.
    pub async fn stop(&self, id: &str) -> Result<Instance> {
        self.stop_with_grace(id, self.config.stop_grace).await
    }

    /// Stop an instance, killing the server once `grace` has elapsed.
    ///
    /// A container removed behind our back counts as stopped.
    pub async fn stop_with_grace(&self, id: &str, grace: Duration) -> Result<Instance> {
        let mut instance = self.get(id).await?;

        if matches!(instance.state, InstanceState::Stopped | InstanceState::Error) {
            debug!("Instance {} is {}; stop is a no-op", id, instance.state);
            return Ok(instance);
        }

        let Some(container_id) = instance.container_id.clone() else {
            instance.transition(InstanceState::Stopped);
            self.store.put(instance.clone()).await?;
            return Ok(instance);
        };

        instance.transition(InstanceState::Stopping);
        self.store.put(instance.clone()).await?;
        info!("Stopping instance {} ({})", instance.name, id);

        match self.runtime.stop_container(&container_id, grace).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(
                    "Container {} of instance {} no longer exists",
                    container_id, id
                );
                instance.container_id = None;
                instance.transition(InstanceState::Stopped);
                self.store.put(instance.clone()).await?;
                return Ok(instance);
            }
            Err(e) => return Err(self.record_failure(instance, e.into()).await),
        }

        let timeout = grace + self.config.start_timeout;
        match self
            .wait_for_status(&container_id, timeout, |status| {
                status != ContainerStatus::Running
            })
            .await
        {
            Ok(Some(ContainerStatus::NotFound)) => instance.container_id = None,
            Ok(Some(_)) => {}
            Ok(None) => {
                let cause = InstanceError::Timeout {
                    id: id.to_string(),
                    target: InstanceState::Stopped,
                    timeout,
                };
                return Err(self.record_failure(instance, cause).await);
            }
            Err(e) => return Err(self.record_failure(instance, e.into()).await),
        }

        instance.transition(InstanceState::Stopped);
        self.store.put(instance.clone()).await?;
        info!("Instance {} stopped", id);
        Ok(instance)
    }

    pub async fn restart(&self, id: &str) -> Result<Instance> {
        self.stop(id).await?;
        self.start(id).await
    }

    /// Remove an instance with its container and volume.
    ///
    /// Unknown instances and already-removed resources count as success.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let Some(instance) = self.store.get(id).await? else {
            debug!("Instance {} does not exist; nothing to delete", id);
            return Ok(());
        };

        if let Some(container_id) = &instance.container_id {
            if let Err(e) = self
                .runtime
                .stop_container(container_id, self.config.stop_grace)
                .await
            {
                if !e.is_not_found() {
                    warn!("Failed to stop container {} before delete: {}", container_id, e);
                }
            }

            match self.runtime.remove_container(container_id, true).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        match self.runtime.remove_volume(&env::volume_name(id)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.store.remove(id).await?;
        info!("Deleted instance {} ({})", instance.name, id);
        Ok(())
    }

    /// Current runtime view of the instance's container.
    pub async fn status(&self, id: &str) -> Result<ContainerHandle> {
        let instance = self.get(id).await?;
        match instance.container_id {
            Some(container_id) => Ok(self.runtime.inspect(&container_id).await?),
            None => Ok(ContainerHandle {
                id: String::new(),
                status: ContainerStatus::NotFound,
            }),
        }
    }

    /// Last `tail` lines of server output.
    pub async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        let instance = self.get(id).await?;
        let Some(container_id) = instance.container_id else {
            return Ok(Vec::new());
        };
        match self.runtime.logs(&container_id, tail).await {
            Ok(lines) => Ok(lines),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-derive the recorded state from the runtime.
    ///
    /// `Error` is kept; only start and delete leave it.
    pub async fn reconcile(&self, id: &str) -> Result<Instance> {
        let mut instance = self.get(id).await?;

        let status = match &instance.container_id {
            Some(container_id) => self.runtime.inspect(container_id).await?.status,
            None => ContainerStatus::NotFound,
        };

        if status == ContainerStatus::NotFound {
            instance.container_id = None;
        }

        let actual = match status {
            ContainerStatus::Running => InstanceState::Running,
            ContainerStatus::Exited | ContainerStatus::NotFound => InstanceState::Stopped,
        };

        if instance.state != InstanceState::Error && instance.state != actual {
            info!(
                "Reconciled instance {}: {} -> {}",
                id, instance.state, actual
            );
            instance.transition(actual);
        }

        self.store.put(instance.clone()).await?;
        Ok(instance)
    }

    /// Apply a file operation to the instance volume.
    pub async fn filesystem_mutate(&self, id: &str, operation: FileOperation) -> Result<FileOutcome> {
        let instance = self.get(id).await?;
        debug!("Applying {:?} to instance {}", operation, instance.id);
        Ok(self.filesystem.apply(&instance.id, operation).await?)
    }

    /// Poll the runtime until `done` accepts the status or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    async fn wait_for_status<F>(
        &self,
        container_id: &str,
        timeout: Duration,
        done: F,
    ) -> std::result::Result<Option<ContainerStatus>, ContainerError>
    where
        F: Fn(ContainerStatus) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let handle = self.runtime.inspect(container_id).await?;
            if done(handle.status) {
                return Ok(Some(handle.status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::InMemoryRuntime;
    use crate::instance::InMemoryFilesystem;
    use crate::store::MemoryStore;

    fn manager() -> (Arc<InMemoryRuntime>, InstanceManager) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let store = Arc::new(MemoryStore::new());
        let config = ManagerConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let manager = InstanceManager::new(runtime.clone(), store, config);
        (runtime, manager)
    }

    #[test]
    fn test_env_merge_precedence() {
        let mut instance = sample_instance();
        instance.env.insert("MEMORY".to_string(), "3G".to_string());
        instance.env.insert("RCON_PASSWORD".to_string(), "hijack".to_string());
        instance.env.insert("MOTD".to_string(), "hello".to_string());

        let env = container_env(&instance);
        assert_eq!(env["EULA"], "TRUE");
        assert_eq!(env["MEMORY"], "3G");
        assert_eq!(env["MOTD"], "hello");
        assert_eq!(env["TYPE"], "PAPER");
        assert_eq!(env["RCON_PASSWORD"], "pw");
        assert_eq!(env["ENABLE_RCON"], "true");
    }

    #[test]
    fn test_container_config_translation() {
        let mut instance = sample_instance();
        instance.limits.cpu = Some(1.5);

        let config = container_config(&instance).unwrap();
        assert_eq!(config.host_config.memory, Some(2_147_483_648));
        assert_eq!(config.host_config.cpu_quota, Some(150_000));
        assert_eq!(config.host_config.cpu_period, Some(100_000));
        assert_eq!(config.host_port("25565/tcp"), Some(30000));
        assert_eq!(config.host_port("25575/tcp"), Some(30001));
        assert_eq!(config.host_port("25565/udp"), Some(30002));
        assert_eq!(config.label(env::labels::MANAGED), Some("true"));
        assert_eq!(config.label(env::labels::INSTANCE_ID), Some("abc123"));
    }

    fn sample_instance() -> Instance {
        let now = Utc::now();
        let mut monitoring = crate::instance::MonitoringConfig::default();
        monitoring.rcon.password = Some("pw".to_string());
        Instance {
            id: "abc123".to_string(),
            name: "survival".to_string(),
            server_type: "paper".to_string(),
            version: "1.20.4".to_string(),
            image: env::images::DEFAULT_SERVER_IMAGE.to_string(),
            state: InstanceState::Stopped,
            container_id: None,
            ports: crate::ports::InstancePorts {
                game: 30000,
                rcon: 30001,
                query: 30002,
            },
            limits: ResourceLimits {
                memory: "2G".to_string(),
                cpu: None,
            },
            env: BTreeMap::new(),
            rcon_password: "pw".to_string(),
            monitoring,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_start_stop() {
        let (runtime, manager) = manager();
        let instance = manager.create(InstanceSpec::new("survival")).await.unwrap();

        assert_eq!(instance.state, InstanceState::Stopped);
        assert_eq!(instance.ports.game, 25565);
        assert_eq!(instance.ports.rcon, 25575);
        assert_eq!(instance.ports.query, 25585);
        assert_eq!(instance.rcon_password.len(), RCON_PASSWORD_LEN);
        assert!(runtime.volume_exists(&env::volume_name(&instance.id)));

        let running = manager.start(&instance.id).await.unwrap();
        assert_eq!(running.state, InstanceState::Running);
        assert!(manager.status(&instance.id).await.unwrap().is_running());

        let stopped = manager.stop(&instance.id).await.unwrap();
        assert_eq!(stopped.state, InstanceState::Stopped);
        assert!(stopped.container_id.is_some());
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_noops() {
        let (_, manager) = manager();
        let instance = manager.create(InstanceSpec::new("a")).await.unwrap();

        let unchanged = manager.stop(&instance.id).await.unwrap();
        assert_eq!(unchanged.state, InstanceState::Stopped);

        manager.start(&instance.id).await.unwrap();
        let again = manager.start(&instance.id).await.unwrap();
        assert_eq!(again.state, InstanceState::Running);
    }

    #[tokio::test]
    async fn test_invalid_memory_rejected_before_allocation() {
        let (runtime, manager) = manager();
        let spec = InstanceSpec::new("a").with_memory("lots");

        assert!(matches!(
            manager.create(spec).await,
            Err(InstanceError::Resources(_))
        ));
        assert!(manager.list().await.unwrap().is_empty());
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (_, manager) = manager();
        manager
            .create(InstanceSpec::new("a").with_id("fixed"))
            .await
            .unwrap();
        assert!(matches!(
            manager.create(InstanceSpec::new("b").with_id("fixed")).await,
            Err(InstanceError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_detects_crash() {
        let (runtime, manager) = manager();
        let instance = manager.create(InstanceSpec::new("a")).await.unwrap();
        let running = manager.start(&instance.id).await.unwrap();

        runtime.crash(running.container_id.as_deref().unwrap());
        let reconciled = manager.reconcile(&instance.id).await.unwrap();
        assert_eq!(reconciled.state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_logs_tail() {
        let (runtime, manager) = manager();
        let instance = manager.create(InstanceSpec::new("a")).await.unwrap();
        let container_id = instance.container_id.clone().unwrap();
        runtime.push_logs(&container_id, ["a", "b", "c"]);

        assert_eq!(manager.logs(&instance.id, 2).await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_filesystem_mutate_uses_capability() {
        let (_, manager) = manager();
        let fs = Arc::new(InMemoryFilesystem::new());
        let manager = manager.with_filesystem(fs.clone());
        let instance = manager.create(InstanceSpec::new("a")).await.unwrap();

        manager
            .filesystem_mutate(
                &instance.id,
                FileOperation::WriteConfig {
                    path: "server.properties".to_string(),
                    contents: "pvp=false".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            fs.read(&instance.id, "server.properties").as_deref(),
            Some("pvp=false")
        );

        assert!(matches!(
            manager
                .filesystem_mutate("missing", FileOperation::CheckExists { path: "x".into() })
                .await,
            Err(InstanceError::NotFound(_))
        ));
    }
}
