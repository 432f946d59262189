//! # gso
//!
//! Supervises game servers running as isolated containers and keeps an eye
//! on their health.
//!
//! ## Architecture Overview
//!
//! - **[`ports`]**: deterministic host port allocation
//! - **[`container`]**: the [`ContainerRuntime`](container::ContainerRuntime)
//!   seam with Docker/Podman and in-memory implementations
//! - **[`instance`]**: instance records and the lifecycle state machine
//! - **[`rcon`]**: remote console client used to query live game state
//! - **[`metrics`]**: sample collection, Prometheus exposition and alerts
//! - **[`store`]**: persistence seams for instances and samples
//! - **[`service`]**: wiring plus background task ownership
//! - **[`http`]**: the metrics endpoint
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gso::config::ServiceConfig;
//! use gso::instance::InstanceSpec;
//! use gso::service::ServiceContext;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = ServiceContext::from_config(&ServiceConfig::default()).await?;
//!     service.start().await?;
//!
//!     let instance = service
//!         .create_instance(InstanceSpec::new("survival").with_memory("4G"))
//!         .await?;
//!     service.start_instance(&instance.id).await?;
//!
//!     println!("{}", service.console_command(&instance.id, "list").await?);
//!
//!     service.stop().await?;
//!     Ok(())
//! }
//! ```

/// Service configuration and its discovery hierarchy.
pub mod config;

/// Container runtime abstraction and implementations.
pub mod container;

/// Environment constants, labels and resource naming.
pub mod env;

/// HTTP endpoint for metrics.
pub mod http;

/// Game server instances and their lifecycle.
pub mod instance;

/// Metrics collection, exposition and alerting.
pub mod metrics;

/// Port allocation.
pub mod ports;

/// Remote console protocol client.
pub mod rcon;

/// Service context tying the components together.
pub mod service;

/// Persistence seams.
pub mod store;

pub use config::{ConfigDiscovery, ServiceConfig};
pub use instance::{Instance, InstanceManager, InstanceSpec, InstanceState};
pub use metrics::{AlertEvaluator, MetricSample, MetricsCollector};
pub use rcon::RconClient;
pub use service::ServiceContext;
