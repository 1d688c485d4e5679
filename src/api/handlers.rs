use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{Alert, TimeoutChecker};
use crate::ingest::{AlertRequest, IngestError, Ingested, Ingestor, ParsedPayload, PayloadParser};
use crate::storage::{run_blocking, AlertFilter, AlertStore, StorageError};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn AlertStore>,
    pub ingestor: Ingestor,
    pub parser: PayloadParser,
}

impl AppState {
    pub fn new(checker: Arc<TimeoutChecker>, tz: chrono::FixedOffset) -> Result<Self, regex::Error> {
        Ok(Self {
            store: Arc::clone(checker.store()),
            ingestor: Ingestor::new(checker, tz),
            parser: PayloadParser::new()?,
        })
    }
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Ingest
// ============================================================================

pub async fn create_alert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AlertRequest>,
) -> Result<Json<Ingested>, ApiError> {
    let ingested = state.ingestor.ingest(request).await?;
    Ok(Json(ingested))
}

// ============================================================================
// Query
// ============================================================================

#[derive(Deserialize)]
pub struct ListParams {
    pub entity_name: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

impl From<ListParams> for AlertFilter {
    fn from(params: ListParams) -> Self {
        let defaults = AlertFilter::default();
        Self {
            entity_name: params.entity_name.filter(|s| !s.is_empty()),
            category: params.category.filter(|s| !s.is_empty()),
            skip: params.skip,
            limit: params.limit.unwrap_or(defaults.limit),
        }
    }
}

#[derive(Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<AlertsResponse>, ApiError> {
    let filter: AlertFilter = params.into();
    let alerts = run_blocking(&state.store, move |store| store.list(&filter)).await?;
    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Alert>, ApiError> {
    run_blocking(&state.store, move |store| store.get(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Alert {} not found", id)))
}

/// Manually supersede an open trigger so it never fires
pub async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Alert>, ApiError> {
    let (changed, alert) = run_blocking(&state.store, move |store| {
        Ok((store.mark_resolved_by_id(id)?, store.get(id)?))
    })
    .await?;
    let alert = alert.ok_or_else(|| ApiError::NotFound(format!("Alert {} not found", id)))?;

    if !changed {
        return Err(ApiError::Conflict(format!(
            "Alert {} is not an open trigger (kind={}, resolved={}, notified={})",
            id, alert.kind, alert.resolved, alert.notified
        )));
    }

    tracing::info!(alert_id = id, "Trigger resolved manually");
    Ok(Json(alert))
}

// ============================================================================
// Payload parsing
// ============================================================================

#[derive(Deserialize)]
pub struct ParseRequest {
    pub text: String,
}

pub async fn parse_payload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ParseRequest>,
) -> Json<ParsedPayload> {
    Json(state.parser.parse(&request.text))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        tracing::error!(error = %e, "Store operation failed");
        ApiError::Internal(e.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Storage(e) => e.into(),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
