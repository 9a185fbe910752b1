use crate::interceptors::accept::require_json;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use vmjob::{job::layout, types::JobId, Error as JobError, JobCoordinator, JobRecord, JobSpec, JobView};

/// Errors as the HTTP layer reports them.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("no log for job {0} yet")]
    NoLog(JobId),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Job(JobError::DoesNotExist(_)) | ServiceError::NoLog(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::Job(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

type ServiceResult<T> = Result<T, ServiceError>;

pub fn router(coordinator: JobCoordinator) -> Router {
    let json_only = || middleware::from_fn(require_json);
    Router::new()
        .route("/job", post(post_job).layer(json_only()))
        .route(
            "/job/{id}",
            get(get_job).layer(json_only()).delete(delete_job),
        )
        .route("/job/{id}/log", get(get_log))
        .route("/jobs", get(list_jobs).layer(json_only()))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn post_job(
    State(coordinator): State<JobCoordinator>,
    Json(spec): Json<JobSpec>,
) -> ServiceResult<(StatusCode, Json<JobRecord>)> {
    let record = coordinator.submit_job(spec).await.map_err(|err| {
        tracing::error!("Error during creating job: {}", err);
        err
    })?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_job(
    State(coordinator): State<JobCoordinator>,
    Path(job_id): Path<JobId>,
) -> ServiceResult<Json<JobView>> {
    Ok(Json(coordinator.job_status(job_id).await?))
}

async fn list_jobs(State(coordinator): State<JobCoordinator>) -> ServiceResult<Json<Vec<JobView>>> {
    Ok(Json(coordinator.list_jobs().await?))
}

async fn delete_job(
    State(coordinator): State<JobCoordinator>,
    Path(job_id): Path<JobId>,
) -> ServiceResult<StatusCode> {
    coordinator.kill_job(job_id).await.map_err(|err| {
        tracing::error!(%job_id, "Error during killing job: {}", err);
        err
    })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_log(
    State(coordinator): State<JobCoordinator>,
    Path(job_id): Path<JobId>,
) -> ServiceResult<impl IntoResponse> {
    let view = coordinator.job_status(job_id).await?;
    let path = layout::file_path(&view.record.spec.base_path, layout::LOG);
    let log = tokio::fs::read(&path)
        .await
        .map_err(|_| ServiceError::NoLog(job_id))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], log))
}
