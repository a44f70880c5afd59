// src/http/routes.rs

//! Job routes.
//!
//! - POST   /jobs             - create a job, 202 `{job_id}`
//! - GET    /jobs             - list jobs, optional `?state=&kind=`
//! - GET    /jobs/{id}        - job snapshot
//! - DELETE /jobs/{id}        - cancel, returns the current snapshot
//! - GET    /jobs/{id}/events - SSE stream of log/progress/status events

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::JobService;
use crate::http::error::{ApiError, ApiResult};
use crate::http::sse::event_stream;
use crate::jobs::{CommandSpec, JobFilter, JobRequest, JobSnapshot};
use crate::types::{JobId, JobKind, JobState};

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateJobBody {
    #[serde(default)]
    pub kind: JobKind,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub timeout_secs: Option<f64>,
    pub progress_pattern: Option<String>,
}

impl TryFrom<CreateJobBody> for JobRequest {
    type Error = ApiError;

    fn try_from(body: CreateJobBody) -> Result<Self, Self::Error> {
        let timeout = body
            .timeout_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| ApiError::BadRequest(format!("invalid timeout_secs {secs}: {e}")))
            })
            .transpose()?;

        Ok(JobRequest::new(
            body.kind,
            CommandSpec {
                program: body.program,
                args: body.args,
                working_directory: body.working_directory,
                env_overrides: body.env,
                timeout,
                progress_pattern: body.progress_pattern,
            },
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub kind: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> ApiResult<JobFilter> {
        Ok(JobFilter {
            state: self
                .state
                .map(|s| s.parse::<JobState>())
                .transpose()
                .map_err(ApiError::BadRequest)?,
            kind: self
                .kind
                .map(|k| k.parse::<JobKind>())
                .transpose()
                .map_err(ApiError::BadRequest)?,
        })
    }
}

fn parse_id(raw: &str) -> ApiResult<JobId> {
    raw.parse().map_err(ApiError::BadRequest)
}

/// POST /jobs - Create a job.
async fn create_job(
    State(service): State<Arc<JobService>>,
    Json(body): Json<CreateJobBody>,
) -> ApiResult<impl IntoResponse> {
    let request = JobRequest::try_from(body)?;
    let job_id = service.create_job(request)?;
    Ok((StatusCode::ACCEPTED, Json(CreateJobResponse { job_id })))
}

/// GET /jobs - List jobs, oldest first.
async fn list_jobs(
    State(service): State<Arc<JobService>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<JobSnapshot>>> {
    let filter = query.into_filter()?;
    Ok(Json(service.list_jobs(&filter)))
}

/// GET /jobs/{id} - Snapshot of one job.
async fn get_job(
    State(service): State<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let id = parse_id(&id)?;
    Ok(Json(service.get_job(id)?))
}

/// DELETE /jobs/{id} - Cancel a job.
async fn cancel_job(
    State(service): State<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let id = parse_id(&id)?;
    Ok(Json(service.cancel_job(id)?))
}

/// GET /jobs/{id}/events - SSE stream of the job's events.
async fn job_events(
    State(service): State<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let subscription = service.subscribe(id)?;
    Ok(event_stream(subscription))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<JobService>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/jobs/{id}/events", get(job_events))
}
