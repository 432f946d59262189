//! Periodic metrics collection.
//!
//! Every tick samples all instances recorded as running, concurrently. Each
//! sample combines runtime counters with game figures from the console, or
//! from the log heuristics when the console cannot be reached. A failure for
//! one instance is logged and skipped; it never stops the loop.

use crate::container::ContainerRuntime;
use crate::instance::{Instance, InstanceState};
use crate::metrics::cpu::CpuTracker;
use crate::metrics::game_stats::{
    GameStatsSource, LogHeuristicSource, MS_PER_TICK, ProtocolSource, StatsParser,
};
use crate::metrics::{CollectError, GameStats, MetricSample, SampleSource};
use crate::rcon::SessionRegistry;
use crate::store::{InstanceStore, MetricStore};
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

const SAMPLE_CHANNEL_CAPACITY: usize = 256;

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Bound for each runtime call of one instance
    pub stats_timeout: Duration,
    /// Log lines scanned by the fallback source
    pub log_tail: usize,
    /// Bound for each console command
    pub console_timeout: Duration,
    /// Host on which instance console ports are published
    pub console_host: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stats_timeout: Duration::from_secs(5),
            log_tail: 200,
            console_timeout: Duration::from_secs(5),
            console_host: "127.0.0.1".to_string(),
        }
    }
}

/// Clears the in-flight flag when a tick ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Samples running instances and publishes the results.
pub struct MetricsCollector {
    runtime: Arc<dyn ContainerRuntime>,
    instances: Arc<dyn InstanceStore>,
    metrics: Arc<dyn MetricStore>,
    primary: Arc<dyn GameStatsSource>,
    fallback: Arc<dyn GameStatsSource>,
    cpu: CpuTracker,
    latest: DashMap<String, MetricSample>,
    last_polled: DashMap<String, Instant>,
    in_flight: AtomicBool,
    samples_tx: broadcast::Sender<MetricSample>,
    config: CollectorConfig,
}

impl MetricsCollector {
    /// Collector using the console as primary source and the log as fallback.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        instances: Arc<dyn InstanceStore>,
        metrics: Arc<dyn MetricStore>,
        sessions: Arc<SessionRegistry>,
        config: CollectorConfig,
    ) -> Result<Self, CollectError> {
        let parser = StatsParser::new()?;
        let primary = Arc::new(ProtocolSource::new(
            sessions,
            config.console_host.clone(),
            config.console_timeout,
            parser.clone(),
        ));
        let fallback = Arc::new(LogHeuristicSource::new(
            Arc::clone(&runtime),
            config.log_tail,
            parser,
        ));
        Ok(Self::with_sources(
            runtime, instances, metrics, primary, fallback, config,
        ))
    }

    /// Collector with explicit game stats sources.
    pub fn with_sources(
        runtime: Arc<dyn ContainerRuntime>,
        instances: Arc<dyn InstanceStore>,
        metrics: Arc<dyn MetricStore>,
        primary: Arc<dyn GameStatsSource>,
        fallback: Arc<dyn GameStatsSource>,
        config: CollectorConfig,
    ) -> Self {
        let (samples_tx, _) = broadcast::channel(SAMPLE_CHANNEL_CAPACITY);
        Self {
            runtime,
            instances,
            metrics,
            primary,
            fallback,
            cpu: CpuTracker::new(),
            latest: DashMap::new(),
            last_polled: DashMap::new(),
            in_flight: AtomicBool::new(false),
            samples_tx,
            config,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Receive every sample as it is produced.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricSample> {
        self.samples_tx.subscribe()
    }

    pub fn latest(&self, instance_id: &str) -> Option<MetricSample> {
        self.latest.get(instance_id).map(|entry| entry.clone())
    }

    pub fn latest_all(&self) -> Vec<MetricSample> {
        self.latest.iter().map(|entry| entry.clone()).collect()
    }

    /// Drop cached state of a removed instance.
    pub fn forget(&self, instance_id: &str) {
        self.cpu.forget(instance_id);
        self.latest.remove(instance_id);
        self.last_polled.remove(instance_id);
    }

    /// One scheduled pass: sample running instances whose poll interval elapsed.
    ///
    /// Returns the samples produced, or nothing when a previous pass is
    /// still in flight.
    pub async fn tick(&self) -> Vec<MetricSample> {
        let now = Instant::now();
        self.run_pass(|instance| {
            let every = Duration::from_secs(instance.monitoring.poll_interval_secs.max(1));
            self.last_polled
                .get(&instance.id)
                .is_none_or(|last| now.duration_since(*last) + Duration::from_millis(50) >= every)
        })
        .await
    }

    /// Sample every running instance now, ignoring poll intervals.
    pub async fn collect_all(&self) -> Vec<MetricSample> {
        self.run_pass(|_| true).await
    }

    async fn run_pass<F>(&self, due: F) -> Vec<MetricSample>
    where
        F: Fn(&Instance) -> bool,
    {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!("Previous metrics pass still running; skipping this one");
            return Vec::new();
        }
        let _in_flight = InFlight(&self.in_flight);

        let instances = match self.instances.list().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("Failed to list instances for metrics: {}", e);
                return Vec::new();
            }
        };

        let mut targets = Vec::new();
        for instance in instances {
            if instance.state != InstanceState::Running {
                self.cpu.forget(&instance.id);
                continue;
            }
            if due(&instance) {
                targets.push(instance);
            }
        }

        let results = join_all(targets.iter().map(|instance| self.collect_instance(instance))).await;

        let mut samples = Vec::with_capacity(results.len());
        for (instance, result) in targets.iter().zip(results) {
            self.last_polled.insert(instance.id.clone(), Instant::now());
            match result {
                Ok(sample) => {
                    self.publish(&sample).await;
                    samples.push(sample);
                }
                Err(e) => warn!("Skipping metrics for instance {}: {}", instance.id, e),
            }
        }

        debug!("Collected {} metric samples", samples.len());
        samples
    }

    async fn publish(&self, sample: &MetricSample) {
        if let Err(e) = self.metrics.append(sample.clone()).await {
            warn!(
                "Failed to store metrics for instance {}: {}",
                sample.instance_id, e
            );
        }
        self.latest
            .insert(sample.instance_id.clone(), sample.clone());
        // no subscribers is fine
        let _ = self.samples_tx.send(sample.clone());
    }

    async fn bounded<T, Fut>(&self, instance_id: &str, what: &str, fut: Fut) -> Result<T, CollectError>
    where
        Fut: Future<Output = crate::container::Result<T>>,
    {
        timeout(self.config.stats_timeout, fut)
            .await
            .map_err(|_| CollectError::Timeout {
                instance_id: instance_id.to_string(),
                what: what.to_string(),
                after: self.config.stats_timeout,
            })?
            .map_err(|source| CollectError::Runtime {
                instance_id: instance_id.to_string(),
                source,
            })
    }

    /// Build a sample for one instance.
    pub async fn collect_instance(&self, instance: &Instance) -> Result<MetricSample, CollectError> {
        let Some(container_id) = instance.container_id.as_deref() else {
            self.cpu.forget(&instance.id);
            return Ok(MetricSample::down(&instance.id, Utc::now()));
        };

        let handle = self
            .bounded(&instance.id, "status", self.runtime.inspect(container_id))
            .await?;
        if !handle.is_running() {
            self.cpu.forget(&instance.id);
            return Ok(MetricSample::down(&instance.id, Utc::now()));
        }

        let raw = self
            .bounded(&instance.id, "stats", self.runtime.stats(container_id))
            .await?;
        let cpu_percent = self.cpu.observe(&instance.id, &raw);

        let (mut game, source) = self.game_stats(instance).await;
        if let Some(tps) = game.tps.filter(|tps| *tps > 0.0) {
            // approximation: mean tick time is not exposed by every server
            game.extensions
                .entry(MS_PER_TICK.to_string())
                .or_insert(1000.0 / tps);
        }

        Ok(MetricSample {
            instance_id: instance.id.clone(),
            timestamp: Utc::now(),
            up: true,
            cpu_percent,
            memory_used_bytes: raw.memory_usage,
            memory_limit_bytes: raw.memory_limit,
            network_rx_bytes: raw.network_rx_bytes,
            network_tx_bytes: raw.network_tx_bytes,
            block_read_bytes: raw.block_io_read,
            block_write_bytes: raw.block_io_write,
            players: game.players,
            max_players: game.max_players,
            tps: game.tps,
            game_memory_bytes: game.memory_bytes,
            extensions: game.extensions,
            source,
        })
    }

    async fn game_stats(&self, instance: &Instance) -> (GameStats, SampleSource) {
        match self.primary.fetch(instance).await {
            Ok(stats) if !stats.is_empty() => return (stats, SampleSource::Console),
            Ok(_) => debug!("Console returned no figures for {}", instance.id),
            Err(e) => debug!("Console unavailable for {}: {}", instance.id, e),
        }

        // the fallback always yields a player count, zero when nothing is known
        let mut stats = match timeout(self.config.stats_timeout, self.fallback.fetch(instance)).await
        {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                debug!("Log fallback failed for {}: {}", instance.id, e);
                GameStats::default()
            }
            Err(_) => {
                debug!("Log fallback timed out for {}", instance.id);
                GameStats::default()
            }
        };
        stats.players.get_or_insert(0);
        (stats, SampleSource::LogFallback)
    }

    /// Run ticks until `shutdown` flips to true or its sender is dropped.
    ///
    /// Overrunning ticks are skipped, not queued. A pass in progress is
    /// abandoned on shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "Metrics collector started with interval {:?}",
                self.config.interval
            );

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                tokio::select! {
                    _ = self.tick() => {}
                    _ = shutdown.changed() => break,
                }
            }

            info!("Metrics collector stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{InMemoryRuntime, RawStats};
    use crate::instance::{InstanceManager, InstanceSpec, ManagerConfig};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct Fixed(Option<GameStats>);

    #[async_trait]
    impl GameStatsSource for Fixed {
        async fn fetch(&self, instance: &Instance) -> Result<GameStats, CollectError> {
            self.0
                .clone()
                .ok_or_else(|| CollectError::ConsoleDisabled(instance.id.clone()))
        }
    }

    async fn setup(
        primary: Option<GameStats>,
        fallback: Option<GameStats>,
    ) -> (Arc<InMemoryRuntime>, Arc<MemoryStore>, MetricsCollector, Instance) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let store = Arc::new(MemoryStore::new());
        let manager = InstanceManager::new(
            runtime.clone(),
            store.clone(),
            ManagerConfig {
                poll_interval: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let instance = manager.create(InstanceSpec::new("a")).await.unwrap();
        let instance = manager.start(&instance.id).await.unwrap();

        let collector = MetricsCollector::with_sources(
            runtime.clone(),
            store.clone(),
            store.clone(),
            Arc::new(Fixed(primary)),
            Arc::new(Fixed(fallback)),
            CollectorConfig::default(),
        );
        (runtime, store, collector, instance)
    }

    #[tokio::test]
    async fn test_cpu_from_consecutive_samples() {
        let (runtime, _, collector, instance) = setup(None, None).await;
        let container_id = instance.container_id.clone().unwrap();

        runtime.set_stats(
            &container_id,
            RawStats {
                cpu_total_usage: 100_000_000,
                system_cpu_usage: 1_000_000_000,
                ..Default::default()
            },
        );
        let first = collector.collect_all().await;
        assert_eq!(first[0].cpu_percent, 0.0);

        runtime.set_stats(
            &container_id,
            RawStats {
                cpu_total_usage: 300_000_000,
                system_cpu_usage: 2_000_000_000,
                memory_usage: 1024,
                memory_limit: 4096,
                ..Default::default()
            },
        );
        let second = collector.collect_all().await;
        assert_eq!(second[0].cpu_percent, 20.0);
        assert_eq!(second[0].memory_percent(), Some(25.0));
        assert_eq!(second[0].source, SampleSource::LogFallback);
    }

    #[tokio::test]
    async fn test_primary_wins_and_derives_ms_per_tick() {
        let primary = GameStats {
            players: Some(2),
            tps: Some(20.0),
            ..Default::default()
        };
        let fallback = GameStats {
            players: Some(9),
            ..Default::default()
        };
        let (_, _, collector, _) = setup(Some(primary), Some(fallback)).await;

        let sample = collector.collect_all().await.remove(0);
        assert_eq!(sample.source, SampleSource::Console);
        assert_eq!(sample.players, Some(2));
        assert_eq!(sample.extensions.get(MS_PER_TICK), Some(&50.0));
    }

    #[tokio::test]
    async fn test_fallback_when_console_fails() {
        let fallback = GameStats {
            players: Some(0),
            ..Default::default()
        };
        let (_, _, collector, _) = setup(None, Some(fallback)).await;

        let sample = collector.collect_all().await.remove(0);
        assert_eq!(sample.source, SampleSource::LogFallback);
        assert_eq!(sample.players, Some(0));
    }

    #[tokio::test]
    async fn test_fallback_without_figures_reports_zero_players() {
        let (_, _, collector, _) = setup(None, Some(GameStats::default())).await;

        let sample = collector.collect_all().await.remove(0);
        assert_eq!(sample.source, SampleSource::LogFallback);
        assert_eq!(sample.players, Some(0));
        assert!(sample.up);
    }

    #[tokio::test]
    async fn test_fallback_error_still_tagged_fallback() {
        let (_, _, collector, _) = setup(None, None).await;

        let sample = collector.collect_all().await.remove(0);
        assert_eq!(sample.source, SampleSource::LogFallback);
        assert_eq!(sample.players, Some(0));
    }

    #[tokio::test]
    async fn test_crashed_container_reports_down() {
        let (runtime, _, collector, instance) = setup(None, None).await;
        runtime.crash(instance.container_id.as_deref().unwrap());

        let sample = collector.collect_all().await.remove(0);
        assert!(!sample.up);
    }

    #[tokio::test]
    async fn test_failing_instance_is_skipped() {
        let (runtime, _, collector, _) = setup(None, None).await;
        runtime.inject_failure("stats");

        assert!(collector.collect_all().await.is_empty());

        runtime.clear_failure("stats");
        assert_eq!(collector.collect_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_samples_are_stored_and_broadcast() {
        let (_, store, collector, instance) = setup(None, None).await;
        let mut rx = collector.subscribe();

        collector.collect_all().await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.instance_id, instance.id);
        assert!(store.latest(&instance.id).await.unwrap().is_some());
        assert!(collector.latest(&instance.id).is_some());
    }

    #[tokio::test]
    async fn test_tick_honors_poll_interval() {
        let (_, _, collector, _) = setup(None, None).await;

        assert_eq!(collector.tick().await.len(), 1);
        // default interval is 30s, so an immediate second tick has nothing due
        assert!(collector.tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_shutdown() {
        let (_, _, collector, _) = setup(None, None).await;
        let collector = Arc::new(collector);
        let mut rx = collector.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = Arc::clone(&collector).spawn(shutdown_rx);
        // first tick fires immediately
        let sample = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(sample.up);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
