use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::errors::FeatureError;
use crate::feature::{FeatureService, StatusBuckets};
use crate::store::{DashboardDb, DbHandle};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub buckets: StatusBuckets,
}

pub type SharedState = Arc<AppState>;

// ── Query parameters ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureQuery {
    pub component: Option<String>,
    pub agile_type: Option<String>,
    pub estimate_metric_type: Option<String>,
}

impl FeatureQuery {
    fn component(&self) -> Result<String, ApiError> {
        self.component
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing 'component' query parameter".into()))
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<FeatureError> for ApiError {
    fn from(err: FeatureError) -> Self {
        match err {
            FeatureError::MalformedEstimate { .. } | FeatureError::EstimateOverflow { .. } => {
                ApiError::Unprocessable(err.to_string())
            }
            FeatureError::Store(e) => ApiError::Internal(format!("{:#}", e)),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/feature/{number}", get(get_story))
        .route("/api/iteration/{team}", get(get_relevant_stories))
        .route("/api/sprint/{team}", get(get_current_sprint_detail))
        .route(
            "/api/feature/estimates/super/{team}",
            get(get_feature_epic_estimates),
        )
        .route(
            "/api/feature/estimates/aggregatedsprints/{team}",
            get(get_aggregated_sprint_estimates),
        )
        .route("/api/feature/estimates/{kind}/{team}", get(get_single_estimate))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Run one feature query on the blocking pool with a fresh service.
async fn with_service<T, F>(state: &SharedState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(FeatureService<'_, DashboardDb>) -> Result<T, FeatureError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    let outcome = state
        .db
        .clone()
        .call(move |db| Ok(f(FeatureService::new(db, &state.buckets))))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    outcome.map_err(ApiError::from)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_story(
    State(state): State<SharedState>,
    Path(number): Path<String>,
    Query(query): Query<FeatureQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let component = query.component()?;
    let response = with_service(&state, move |service| service.get_story(&component, &number)).await?;
    Ok(Json(response))
}

async fn get_relevant_stories(
    State(state): State<SharedState>,
    Path(team): Path<String>,
    Query(query): Query<FeatureQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let component = query.component()?;
    let response = with_service(&state, move |service| {
        service.get_relevant_stories(&component, &team, query.agile_type.as_deref())
    })
    .await?;
    Ok(Json(response))
}

async fn get_current_sprint_detail(
    State(state): State<SharedState>,
    Path(team): Path<String>,
    Query(query): Query<FeatureQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let component = query.component()?;
    let response = with_service(&state, move |service| {
        service.get_current_sprint_detail(&component, &team, query.agile_type.as_deref())
    })
    .await?;
    Ok(Json(response))
}

async fn get_feature_epic_estimates(
    State(state): State<SharedState>,
    Path(team): Path<String>,
    Query(query): Query<FeatureQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let component = query.component()?;
    let response = with_service(&state, move |service| {
        service.get_feature_epic_estimates(
            &component,
            &team,
            query.agile_type.as_deref(),
            query.estimate_metric_type.as_deref(),
        )
    })
    .await?;
    Ok(Json(response))
}

async fn get_aggregated_sprint_estimates(
    State(state): State<SharedState>,
    Path(team): Path<String>,
    Query(query): Query<FeatureQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let component = query.component()?;
    let response = with_service(&state, move |service| {
        service.get_aggregated_sprint_estimates(
            &component,
            &team,
            query.agile_type.as_deref(),
            query.estimate_metric_type.as_deref(),
        )
    })
    .await?;
    Ok(Json(response))
}

/// Older single-value estimate routes: `total`, `wip` and `done`.
#[allow(deprecated)]
async fn get_single_estimate(
    State(state): State<SharedState>,
    Path((kind, team)): Path<(String, String)>,
    Query(query): Query<FeatureQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !matches!(kind.as_str(), "total" | "wip" | "done") {
        return Err(ApiError::NotFound(format!("Unknown estimate '{}'", kind)));
    }
    let component = query.component()?;
    let response = with_service(&state, move |service| {
        let agile_type = query.agile_type.as_deref();
        let metric = query.estimate_metric_type.as_deref();
        match kind.as_str() {
            "wip" => service.get_in_progress_estimate(&component, &team, agile_type, metric),
            "done" => service.get_done_estimate(&component, &team, agile_type, metric),
            _ => service.get_total_estimate(&component, &team, agile_type, metric),
        }
    })
    .await?;
    Ok(Json(response))
}
