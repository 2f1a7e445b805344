//! Job endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use leadgen_shared::{JobId, JobStatusView, LeadGenError, VerifiedLead};

use crate::AppState;
use crate::error::ApiError;

/// Jobs returned by `GET /api/jobs` when no limit is given.
const DEFAULT_LIST_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    /// Sheet/tab to deliver into instead of the configured one.
    #[serde(default, alias = "sheet")]
    pub worksheet: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AbortRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

fn parse_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse::<JobId>()
        .map_err(|_| ApiError::from(LeadGenError::NotFound(format!("job {raw}"))))
}

/// `POST /api/jobs`
pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = body?;
    let industry = request.industry.unwrap_or_default();
    let location = request.location.unwrap_or_default();
    let job_id = state
        .orchestrator
        .submit_to_worksheet(&industry, &location, request.limit, request.worksheet.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// `GET /api/jobs`
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<JobStatusView>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let jobs = state.orchestrator.list(limit).await?;
    Ok(Json(jobs.iter().map(|job| job.status_view()).collect()))
}

/// `GET /api/jobs/{id}`
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.orchestrator.status(&id).await?))
}

/// `GET /api/jobs/{id}/leads`
pub async fn job_leads(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<VerifiedLead>>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.orchestrator.leads(&id).await?))
}

/// `POST /api/jobs/{id}/abort`. The body is optional.
pub async fn abort_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<AbortRequest>>,
) -> Result<Json<JobStatusView>, ApiError> {
    let id = parse_id(&id)?;
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_default();
    info!(job_id = %id, "abort requested");
    Ok(Json(state.orchestrator.abort(&id, &reason).await?))
}

/// `POST /api/jobs/{id}/retry-delivery`
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let id = parse_id(&id)?;
    let job_id = state
        .orchestrator
        .retry_delivery(&id)
        .await
        .map_err(ApiError::conflict)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}
