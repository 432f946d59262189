//! HTTP surface: metrics exposition plus a few read-only views.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /metrics` | exposition document for every instance |
//! | `GET /metrics/:id` | exposition document for one instance, 404 if unknown |
//! | `GET /health` | `ok` |
//! | `GET /instances` | JSON summaries of all instances |
//! | `GET /instances/:id/alerts` | JSON list of active alerts |

use crate::instance::{Instance, InstanceState};
use crate::metrics::{Alert, CONTENT_TYPE};
use crate::ports::InstancePorts;
use crate::service::ServiceContext;
use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Internal failure while serving a request.
pub struct HttpError(anyhow::Error);

impl From<anyhow::Error> for HttpError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        error!("Request failed: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", self.0)).into_response()
    }
}

/// Public view of an instance; the console password is left out.
#[derive(Debug, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub server_type: String,
    pub version: String,
    pub state: InstanceState,
    pub ports: InstancePorts,
    pub last_error: Option<String>,
}

impl From<Instance> for InstanceSummary {
    fn from(instance: Instance) -> Self {
        Self {
            id: instance.id,
            name: instance.name,
            server_type: instance.server_type,
            version: instance.version,
            state: instance.state,
            ports: instance.ports,
            last_error: instance.last_error,
        }
    }
}

fn exposition(body: String) -> Response {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

async fn metrics_all(State(service): State<Arc<ServiceContext>>) -> Result<Response, HttpError> {
    Ok(exposition(service.render_all().await?))
}

async fn metrics_one(
    State(service): State<Arc<ServiceContext>>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    match service.render_metrics(&id).await? {
        Some(body) => Ok(exposition(body)),
        None => Ok((StatusCode::NOT_FOUND, format!("Unknown instance: {}", id)).into_response()),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn instances(
    State(service): State<Arc<ServiceContext>>,
) -> Result<Json<Vec<InstanceSummary>>, HttpError> {
    let instances = service
        .list_instances()
        .await
        .context("Failed to list instances")?;
    Ok(Json(instances.into_iter().map(InstanceSummary::from).collect()))
}

async fn alerts(
    State(service): State<Arc<ServiceContext>>,
    Path(id): Path<String>,
) -> Json<Vec<Alert>> {
    Json(service.active_alerts(&id))
}

pub fn router(service: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_all))
        .route("/metrics/:id", get(metrics_one))
        .route("/health", get(health))
        .route("/instances", get(instances))
        .route("/instances/:id/alerts", get(alerts))
        .with_state(service)
}

/// Serve until `shutdown` turns true or its sender is dropped.
pub async fn serve(
    service: Arc<ServiceContext>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Metrics endpoint listening on {}", listener.local_addr()?);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await
        .context("HTTP server failed")?;

    info!("Metrics endpoint stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuntimeKind, ServiceConfig};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> (Arc<ServiceContext>, Router) {
        let mut config = ServiceConfig::default();
        config.runtime = RuntimeKind::Memory;
        let service = Arc::new(ServiceContext::from_config(&config).await.unwrap());
        (service.clone(), router(service))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, app) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn test_unknown_instance_is_404() {
        let (_, app) = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        let (_, app) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );
        assert!(body_text(response).await.contains("# TYPE minecraft_up gauge"));
    }
}
