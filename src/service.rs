//! Service context.
//!
//! [`ServiceContext`] wires the runtime, the stores, the instance manager,
//! the console sessions, the collector and the alert evaluator together. It
//! owns the background tasks: [`ServiceContext::start`] spawns the collector
//! loop and the alert subscriber, [`ServiceContext::stop`] signals them to
//! finish, waits for them and closes every console session.
//!
//! Lifecycle operations for the same instance are serialized through
//! [`InstanceLocks`]; operations on different instances run concurrently.

use crate::config::{RuntimeKind, ServiceConfig};
use crate::container::{ContainerHandle, ContainerRuntime, DockerRuntime, InMemoryRuntime};
use crate::instance::{
    self, FileOperation, FileOutcome, Instance, InstanceError, InstanceManager, InstanceSpec,
    InstanceState,
};
use crate::metrics::{
    Alert, AlertEvaluator, ExpositionEncoder, InstanceLabels, MetricSample, MetricsCollector,
};
use crate::rcon::{RconClient, RconError, SessionRegistry};
use crate::store::{InstanceStore, MemoryStore, MetricStore};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One async mutex per instance id.
#[derive(Default)]
pub struct InstanceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to an instance.
    pub async fn lock(&self, instance_id: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(instance_id.to_string()).or_default().value());
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted instance.
    pub fn remove(&self, instance_id: &str) {
        self.locks.remove(instance_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Everything a running supervisor needs.
pub struct ServiceContext {
    instances: Arc<dyn InstanceStore>,
    metrics: Arc<dyn MetricStore>,
    manager: Arc<InstanceManager>,
    sessions: Arc<SessionRegistry>,
    collector: Arc<MetricsCollector>,
    alerts: Arc<AlertEvaluator>,
    encoder: ExpositionEncoder,
    locks: InstanceLocks,
    console_host: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ServiceContext {
    /// Build a context on the configured runtime with in-memory stores.
    pub async fn from_config(config: &ServiceConfig) -> Result<Self> {
        let runtime: Arc<dyn ContainerRuntime> = match config.runtime {
            RuntimeKind::Docker => Arc::new(
                DockerRuntime::connect()
                    .await
                    .context("Failed to connect to the container runtime")?,
            ),
            RuntimeKind::Memory => {
                warn!("Using the in-memory runtime; no containers will be started");
                Arc::new(InMemoryRuntime::new())
            }
        };
        let store = Arc::new(MemoryStore::new());
        Self::new(runtime, store.clone(), store, config)
    }

    /// Build a context from explicit parts.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        instances: Arc<dyn InstanceStore>,
        metrics: Arc<dyn MetricStore>,
        config: &ServiceConfig,
    ) -> Result<Self> {
        let report = config.validate().context("Invalid service configuration")?;
        for warning in &report.warnings {
            warn!("Configuration: {}", warning);
        }

        let collector_config = config.collector_config();
        let sessions = Arc::new(SessionRegistry::new(collector_config.console_timeout));
        let manager = Arc::new(InstanceManager::new(
            Arc::clone(&runtime),
            Arc::clone(&instances),
            config.manager_config(),
        ));
        let collector = Arc::new(
            MetricsCollector::new(
                runtime,
                Arc::clone(&instances),
                Arc::clone(&metrics),
                Arc::clone(&sessions),
                collector_config.clone(),
            )
            .context("Failed to build metrics collector")?,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            instances,
            metrics,
            manager,
            sessions,
            collector,
            alerts: Arc::new(AlertEvaluator::new(config.alert_rules())),
            encoder: ExpositionEncoder::new(),
            locks: InstanceLocks::new(),
            console_host: collector_config.console_host,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn manager(&self) -> &Arc<InstanceManager> {
        &self.manager
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn alerts(&self) -> &Arc<AlertEvaluator> {
        &self.alerts
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Receiver that flips to `true` once [`stop`](Self::stop) is called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn the collector loop and the alert subscriber. Allowed once.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            bail!("Service already started");
        }
        if self.stopped.load(Ordering::Acquire) {
            bail!("Service already stopped");
        }

        // subscribe before the first tick can publish
        let alerts = self.spawn_alert_task();
        let collector = Arc::clone(&self.collector).spawn(self.shutdown_tx.subscribe());
        self.tasks.lock().await.extend([alerts, collector]);

        info!("Service started");
        Ok(())
    }

    fn spawn_alert_task(&self) -> JoinHandle<()> {
        let mut samples = self.collector.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        let alerts = Arc::clone(&self.alerts);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = samples.recv() => match received {
                        Ok(sample) => {
                            alerts.evaluate(&sample, Utc::now());
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Alert evaluation skipped {} samples", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Alert task stopped");
        })
    }

    /// Stop background tasks and close every console session.
    ///
    /// Calls after the first return immediately.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        self.sessions.disconnect_all().await;
        info!("Service stopped");
        Ok(())
    }

    pub async fn create_instance(&self, spec: InstanceSpec) -> instance::manager::Result<Instance> {
        self.manager.create(spec).await
    }

    pub async fn get_instance(&self, id: &str) -> instance::manager::Result<Instance> {
        self.manager.get(id).await
    }

    pub async fn list_instances(&self) -> instance::manager::Result<Vec<Instance>> {
        let mut instances = self.manager.list().await?;
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(instances)
    }

    pub async fn start_instance(&self, id: &str) -> instance::manager::Result<Instance> {
        let _guard = self.locks.lock(id).await;
        self.manager.start(id).await
    }

    pub async fn stop_instance(&self, id: &str) -> instance::manager::Result<Instance> {
        let _guard = self.locks.lock(id).await;
        let instance = self.manager.stop(id).await?;
        self.sessions.disconnect(id).await;
        Ok(instance)
    }

    pub async fn restart_instance(&self, id: &str) -> instance::manager::Result<Instance> {
        let _guard = self.locks.lock(id).await;
        self.sessions.disconnect(id).await;
        self.manager.restart(id).await
    }

    /// Delete an instance and drop every piece of state kept for it.
    pub async fn delete_instance(&self, id: &str) -> instance::manager::Result<()> {
        {
            let _guard = self.locks.lock(id).await;
            self.sessions.disconnect(id).await;
            self.manager.delete(id).await?;
            self.collector.forget(id);
            self.alerts.forget(id);
        }
        self.locks.remove(id);
        Ok(())
    }

    pub async fn instance_status(&self, id: &str) -> instance::manager::Result<ContainerHandle> {
        self.manager.status(id).await
    }

    pub async fn instance_logs(&self, id: &str, tail: usize) -> instance::manager::Result<Vec<String>> {
        self.manager.logs(id, tail).await
    }

    pub async fn filesystem_mutate(
        &self,
        id: &str,
        operation: FileOperation,
    ) -> instance::manager::Result<FileOutcome> {
        let _guard = self.locks.lock(id).await;
        self.manager.filesystem_mutate(id, operation).await
    }

    /// Authenticated console session of an instance.
    pub async fn connect_console(&self, id: &str) -> Result<Arc<RconClient>> {
        let instance = self.manager.get(id).await?;
        if !instance.monitoring.rcon.enabled {
            bail!("Console is disabled for instance {}", id);
        }

        self.sessions
            .get_or_connect(
                &instance.id,
                &self.console_host,
                instance.ports.rcon,
                &instance.rcon_password,
            )
            .await
            .with_context(|| format!("Failed to open console of instance {}", id))
    }

    /// Run one console command and return the reply.
    pub async fn console_command(&self, id: &str, command: &str) -> Result<String> {
        let client = self.connect_console(id).await?;
        match client.execute(command).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if matches!(e, RconError::Io(_)) {
                    self.sessions.disconnect(id).await;
                }
                Err(e).with_context(|| format!("Console command failed on instance {}", id))
            }
        }
    }

    /// Newest sample of an instance, from the collector cache or the store.
    pub async fn latest_sample(&self, id: &str) -> Result<Option<MetricSample>> {
        if let Some(sample) = self.collector.latest(id) {
            return Ok(Some(sample));
        }
        Ok(self.metrics.latest(id).await?)
    }

    /// Samples of instances that are not running are stale and not exposed.
    async fn exposed_sample(&self, instance: &Instance) -> Result<Option<MetricSample>> {
        if instance.state != InstanceState::Running {
            return Ok(None);
        }
        self.latest_sample(&instance.id).await
    }

    /// Exposition document of one instance; `None` for unknown ids and for
    /// instances with exposition turned off.
    pub async fn render_metrics(&self, id: &str) -> Result<Option<String>> {
        let instance = match self.manager.get(id).await {
            Ok(instance) => instance,
            Err(InstanceError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !instance.monitoring.exposition.enabled {
            return Ok(None);
        }
        let sample = self.exposed_sample(&instance).await?;
        Ok(Some(
            self.encoder
                .render(&InstanceLabels::from(&instance), sample.as_ref()),
        ))
    }

    /// Exposition document of every instance that has exposition enabled.
    pub async fn render_all(&self) -> Result<String> {
        let mut entries = Vec::new();
        for instance in self.list_instances().await? {
            if !instance.monitoring.exposition.enabled {
                continue;
            }
            let sample = self.exposed_sample(&instance).await?;
            entries.push((InstanceLabels::from(&instance), sample));
        }
        Ok(self.encoder.render_all(&entries))
    }

    pub fn active_alerts(&self, id: &str) -> Vec<Alert> {
        self.alerts.active_alerts(id)
    }

    pub fn resolve_alert(&self, alert_id: &str) -> Option<Alert> {
        self.alerts.resolve(alert_id, Utc::now())
    }

    /// Number of stored instances.
    pub async fn instance_count(&self) -> Result<usize> {
        Ok(self.instances.list().await?.len())
    }
}
