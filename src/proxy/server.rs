//! HTTP server setup and configuration.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use crate::config::Config;
use crate::lifecycle::shutdown_signal;
use crate::storage::TenantStore;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id assigned to every request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TenantStore>,
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(store: Arc<TenantStore>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            started_at: Utc::now(),
        }
    }
}

/// Attach a fresh [`RequestId`] to the request and echo it in the response.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_bytes;

    Router::new()
        .route("/query", post(handlers::query))
        .route("/transaction", post(handlers::transaction))
        .route("/info/:tenant_id", get(handlers::info))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until a shutdown signal, then drain every tenant.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let store = Arc::new(TenantStore::from_config(&config.storage, &config.queue)?);
    let state = AppState::new(store.clone(), Arc::new(config));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(
        address = %listen_addr,
        data_dir = %store.pool().paths().base().display(),
        "Starting tenant-proxy server"
    );

    let draining = store.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Refuse new jobs right away; requests already waiting on a job
            // get their responses before the listener shuts.
            draining.begin_shutdown().await;
        })
        .await?;

    store.shutdown().await;
    tracing::info!("tenant-proxy stopped");

    Ok(())
}
