//! Integration tests against a real Docker/Podman daemon.
//!
//! Tests are skipped if Docker/Podman is not available or SKIP_CONTAINER_TESTS=1.

use gso::container::{ContainerClient, ContainerRuntime, ContainerStatus, DockerRuntime, RuntimeType};
use gso::env;
use serial_test::serial;
use std::collections::HashMap;
use test_tag::tag;

/// Check if container tests should run.
fn should_run_container_tests() -> bool {
    if let Ok(value) = std::env::var("SKIP_CONTAINER_TESTS") {
        if value == "1" || value.eq_ignore_ascii_case("true") {
            return false;
        }
    }

    ["docker", "podman"].iter().any(|bin| {
        std::process::Command::new(bin)
            .arg("info")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_client_connection() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (Docker/Podman not available or SKIP_CONTAINER_TESTS=1)");
        return;
    }

    let client = ContainerClient::new().await.expect("Failed to connect");
    let runtime = client.runtime_type().await.expect("Failed to get runtime type");
    assert!(matches!(runtime, RuntimeType::Docker | RuntimeType::Podman));
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_volume_roundtrip() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let runtime = DockerRuntime::connect().await.expect("Failed to connect");
    let name = env::volume_name(&format!("itest-{}", std::process::id()));
    let labels = HashMap::from([(env::labels::MANAGED.to_string(), "true".to_string())]);

    runtime.create_volume(&name, &labels).await.unwrap();
    runtime.remove_volume(&name).await.unwrap();

    let err = runtime.remove_volume(&name).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_missing_container_reports_not_found() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let runtime = DockerRuntime::connect().await.expect("Failed to connect");
    let handle = runtime.inspect("gso-no-such-container").await.unwrap();
    assert_eq!(handle.status, ContainerStatus::NotFound);

    let err = runtime
        .stop_container("gso-no-such-container", std::time::Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
