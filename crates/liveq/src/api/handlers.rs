//! REST handlers for campaign creation, login, and the agent surface.

use axum::{Json, extract::Path, extract::State};
use serde::{Deserialize, Serialize};

use crate::auth::{CurrentViewer, Viewer};
use crate::bus::PendingQuery;
use crate::campaigns::{Campaign, CampaignSpec, DistributedQueryResult};
use crate::targets::TargetSpec;

use super::error::ApiResult;
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub viewer: Viewer,
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let (token, viewer) = state.auth.login(&request.username, &request.password)?;
    Ok(Json(LoginResponse { token, viewer }))
}

/// Create-campaign request with explicit target ids.
#[derive(Debug, Deserialize)]
pub struct RunQueryRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_id: Option<u64>,
    #[serde(default)]
    pub selected: TargetSpec,
}

#[derive(Debug, Serialize)]
pub struct RunQueryResponse {
    pub campaign: Campaign,
}

/// POST /api/v1/queries/run
pub async fn run_query(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    Json(request): Json<RunQueryRequest>,
) -> ApiResult<Json<RunQueryResponse>> {
    let campaign = state
        .campaigns
        .create_campaign(
            &viewer,
            CampaignSpec {
                query_sql: request.query,
                query_id: request.query_id,
                targets: request.selected,
            },
        )
        .await?;
    Ok(Json(RunQueryResponse { campaign }))
}

/// Identifier-based target selection: hostnames/UUIDs/serials plus label
/// names.
#[derive(Debug, Default, Deserialize)]
pub struct SelectedIdentifiers {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunByIdentifiersRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_id: Option<u64>,
    #[serde(default)]
    pub selected: SelectedIdentifiers,
}

/// POST /api/v1/queries/run_by_identifiers
pub async fn run_query_by_identifiers(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    Json(request): Json<RunByIdentifiersRequest>,
) -> ApiResult<Json<RunQueryResponse>> {
    let campaign = state
        .campaigns
        .create_campaign_by_identifiers(
            &viewer,
            request.query,
            request.query_id,
            &request.selected.hosts,
            &request.selected.labels,
        )
        .await?;
    Ok(Json(RunQueryResponse { campaign }))
}

#[derive(Debug, Serialize)]
pub struct PendingQueriesResponse {
    pub queries: Vec<PendingQuery>,
}

/// GET /api/v1/agent/queries/{host_id}
///
/// Drains the host's inbox. Agent transport identity is an external
/// concern; this surface exists so the fan-out loop can be closed.
pub async fn agent_pending_queries(
    State(state): State<AppState>,
    Path(host_id): Path<u64>,
) -> ApiResult<Json<PendingQueriesResponse>> {
    Ok(Json(PendingQueriesResponse {
        queries: state.bus.pending_for_host(host_id),
    }))
}

#[derive(Debug, Serialize)]
pub struct SubmitResultResponse {
    /// How many live subscribers received the result.
    pub delivered: usize,
}

/// POST /api/v1/agent/results
pub async fn agent_submit_result(
    State(state): State<AppState>,
    Json(result): Json<DistributedQueryResult>,
) -> ApiResult<Json<SubmitResultResponse>> {
    let topic = result.campaign_id.to_string();
    let delivered = state.bus.publish_result(&topic, result);
    Ok(Json(SubmitResultResponse { delivered }))
}
