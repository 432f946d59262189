//! Collection, exposition and alerting wired through the service context.

mod common;

use common::FakeRcon;
use gso::config::{RuntimeKind, ServiceConfig};
use gso::container::{InMemoryRuntime, RawStats};
use gso::instance::{Instance, InstanceSpec, MonitoringConfig};
use gso::metrics::{AlertKind, SampleSource};
use gso::service::ServiceContext;
use gso::store::{MemoryStore, MetricStore};
use std::sync::Arc;
use std::time::Duration;

fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config(rcon_base: u16) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.runtime = RuntimeKind::Memory;
    config.ports.rcon = rcon_base;
    config.lifecycle.poll_interval_ms = 5;
    config.collector.console_timeout_secs = 1;
    config.collector.interval_secs = 1;
    config
}

fn spec() -> InstanceSpec {
    let mut monitoring = MonitoringConfig::default();
    monitoring.rcon.password = Some("secret".to_string());
    InstanceSpec::new("survival")
        .with_server_type("paper")
        .with_version("1.20.4")
        .with_monitoring(monitoring)
}

async fn running_instance(
    rcon_base: u16,
) -> (Arc<InMemoryRuntime>, Arc<MemoryStore>, ServiceContext, Instance) {
    let runtime = Arc::new(InMemoryRuntime::new());
    let store = Arc::new(MemoryStore::new());
    let service =
        ServiceContext::new(runtime.clone(), store.clone(), store.clone(), &config(rcon_base))
            .unwrap();

    let instance = service.create_instance(spec()).await.unwrap();
    assert_eq!(instance.ports.rcon, rcon_base);
    let instance = service.start_instance(&instance.id).await.unwrap();
    (runtime, store, service, instance)
}

#[tokio::test]
async fn test_console_stats_reach_exposition() {
    let server = FakeRcon::default().spawn().await;
    let (runtime, store, service, instance) = running_instance(server.port).await;
    runtime.set_stats(
        instance.container_id.as_deref().unwrap(),
        RawStats {
            memory_usage: 1_073_741_824,
            memory_limit: 2_147_483_648,
            ..Default::default()
        },
    );

    let samples = service.collector().collect_all().await;
    assert_eq!(samples.len(), 1);
    let sample = &samples[0];
    assert_eq!(sample.source, SampleSource::Console);
    assert_eq!(sample.players, Some(3));
    assert_eq!(sample.max_players, Some(20));
    assert_eq!(sample.tps, Some(19.8));
    assert_eq!(sample.memory_percent(), Some(50.0));
    assert!(store.latest(&instance.id).await.unwrap().is_some());

    let document = service.render_metrics(&instance.id).await.unwrap().unwrap();
    let labels = format!(
        "server_id=\"{}\",server_name=\"survival\",server_type=\"paper\",version=\"1.20.4\"",
        instance.id
    );
    assert!(document.contains(&format!("minecraft_tps{{{}}} 19.8\n", labels)));
    assert!(document.contains(&format!("minecraft_players_online{{{}}} 3\n", labels)));
    assert!(document.contains(&format!("minecraft_up{{{}}} 1\n", labels)));
    assert!(document.contains(&format!(
        "minecraft_memory_used_bytes{{{}}} 1073741824\n",
        labels
    )));

    // the session is reused across passes
    service.collector().collect_all().await;
    assert_eq!(server.connections.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(service.sessions().len(), 1);

    service.stop().await.unwrap();
    assert!(service.sessions().is_empty());
}

#[tokio::test]
async fn test_unreachable_console_falls_back_to_logs() {
    let (runtime, _, service, instance) = running_instance(unused_port()).await;
    runtime.push_logs(
        instance.container_id.as_deref().unwrap(),
        [
            "[12:00:01] [Server thread/INFO]: Done (4.2s)! For help, type \"help\"",
            "[12:01:00] [Server thread/INFO]: alex joined the game",
            "[12:02:00] [Server thread/INFO]: alex left the game",
            "[12:03:00] [Server thread/INFO]: sam left the game",
        ],
    );

    let sample = service.collector().collect_all().await.remove(0);
    assert_eq!(sample.source, SampleSource::LogFallback);
    assert_eq!(sample.players, Some(0));
    assert!(sample.up);

    let document = service.render_metrics(&instance.id).await.unwrap().unwrap();
    assert!(document.contains("minecraft_startup_seconds{"));
    assert!(!document.contains("minecraft_tps{"));
}

#[tokio::test]
async fn test_unreachable_console_with_empty_log() {
    let (_, _, service, _) = running_instance(unused_port()).await;

    let sample = service.collector().collect_all().await.remove(0);
    assert_eq!(sample.source, SampleSource::LogFallback);
    assert_eq!(sample.players, Some(0));
    assert!(sample.up);
}

#[tokio::test]
async fn test_unreadable_logs_still_report_players() {
    let (runtime, _, service, instance) = running_instance(unused_port()).await;
    runtime.inject_failure("logs");

    let sample = service.collector().collect_all().await.remove(0);
    assert_eq!(sample.source, SampleSource::LogFallback);
    assert_eq!(sample.players, Some(0));

    let document = service.render_metrics(&instance.id).await.unwrap().unwrap();
    assert!(document.contains("minecraft_players_online{"));
}

#[tokio::test]
async fn test_low_tps_raises_alert_once() {
    let server = FakeRcon {
        tps_reply: "TPS from last 1m, 5m, 15m: 12.0, 13.5, 14.2".to_string(),
        ..Default::default()
    }
    .spawn()
    .await;
    let (_, _, service, instance) = running_instance(server.port).await;

    service.start().await.unwrap();

    let mut alerts = Vec::new();
    for _ in 0..100 {
        alerts = service.active_alerts(&instance.id);
        if !alerts.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    service.stop().await.unwrap();

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::LowTps);

    let resolved = service.resolve_alert(&alerts[0].id).unwrap();
    assert!(!resolved.active);
    assert!(service.active_alerts(&instance.id).is_empty());
}

#[tokio::test]
async fn test_stopped_instance_is_not_sampled() {
    let server = FakeRcon::default().spawn().await;
    let (_, _, service, instance) = running_instance(server.port).await;

    service.stop_instance(&instance.id).await.unwrap();
    assert!(service.collector().collect_all().await.is_empty());

    let document = service.render_metrics(&instance.id).await.unwrap().unwrap();
    assert!(!document.contains("minecraft_tps{"));
}
