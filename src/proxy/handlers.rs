//! HTTP request handlers.

use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::server::{AppState, RequestId};
use super::types::{QueryRequest, TransactionRequest, TransactionResponse};
use crate::error::Error;
use crate::storage::{QueryOutput, TenantInfo};
use crate::tenant::TenantId;

/// Turn an axum JSON extraction failure into a client error.
///
/// Unreadable JSON is a 400 like any other invalid request; size and
/// content-type failures keep axum's 413 and 415.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Error> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        let status = match rejection {
            JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
                StatusCode::BAD_REQUEST
            }
            ref other => other.status(),
        };
        Error::Rejected {
            status,
            message: rejection.body_text(),
        }
    })
}

/// Handle POST /query
pub async fn query(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryOutput>, Error> {
    let (tenant, query) = json_body(payload)?.validate()?;
    let start = Instant::now();

    tracing::debug!(
        request_id = %request_id.0,
        tenant = %tenant,
        kind = query.kind.as_str(),
        "Received query"
    );

    let result = state.store.query(&tenant, query).await;

    log_outcome(&request_id, &tenant, 1, start, result.as_ref().err());
    result.map(Json)
}

/// Handle POST /transaction
pub async fn transaction(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Json<TransactionResponse>, Error> {
    let (tenant, queries) = json_body(payload)?.validate()?;
    let statements = queries.len();
    let start = Instant::now();

    tracing::debug!(
        request_id = %request_id.0,
        tenant = %tenant,
        statements,
        "Received transaction"
    );

    let result = state.store.transaction(&tenant, queries).await;

    log_outcome(&request_id, &tenant, statements, start, result.as_ref().err());
    result.map(|results| Json(TransactionResponse { results }))
}

/// Handle GET /info/:tenant_id
pub async fn info(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantInfo>, Error> {
    let tenant = TenantId::parse(&tenant_id)?;
    state.store.info(&tenant).await.map(Json)
}

/// Handle GET /health
///
/// Reports process liveness only; never touches a tenant database.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.started_at;

    Json(serde_json::json!({
        "status": "ok",
        "service": "tenant-proxy",
        "lifecycle": state.store.lifecycle_state().await.as_str(),
        "uptimeSecs": uptime.num_seconds(),
    }))
}

fn log_outcome(
    request_id: &RequestId,
    tenant: &TenantId,
    statements: usize,
    start: Instant,
    error: Option<&Error>,
) {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match error {
        None => tracing::info!(
            request_id = %request_id.0,
            tenant = %tenant,
            statements,
            elapsed_ms,
            "Job completed"
        ),
        Some(e) => tracing::warn!(
            request_id = %request_id.0,
            tenant = %tenant,
            statements,
            elapsed_ms,
            kind = e.kind(),
            error = %e,
            "Job failed"
        ),
    }
}
