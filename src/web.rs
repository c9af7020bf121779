use crate::error::Error;
use crate::model::{Professor, ProfessorId, Project};
use crate::service::ProfessorService;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

pub const REFRESH_NOTICE: &str =
    "Projects are being fetched. Please refresh the page in a few moments.";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::QueueFull | Error::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            Error::ExternalFetch(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (code, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ProfessorPage {
    pub professor: Professor,
    pub projects: Vec<Project>,
}

#[derive(Debug, Serialize)]
pub struct RefreshAccepted {
    pub professor_id: ProfessorId,
    pub notice: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProjectList {
    pub professor_id: ProfessorId,
    pub last_projects_fetch: Option<DateTime<Utc>>,
    pub projects: Vec<Project>,
}

pub fn router(service: ProfessorService) -> Router {
    Router::new()
        .route("/", get(list_professors))
        .route("/health", get(|| async { "ok" }))
        .route("/professors", get(list_professors))
        .route("/professors/{id}", get(show_professor))
        .route("/professors/{id}/fetch_projects", post(fetch_projects))
        .route("/professors/{id}/refresh_projects", get(refresh_projects))
        .layer(Extension(Arc::new(service)))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_professors(
    Extension(service): Extension<Arc<ProfessorService>>,
) -> Result<Json<Vec<Professor>>, ApiError> {
    Ok(Json(service.list_professors().await?))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn show_professor(
    Extension(service): Extension<Arc<ProfessorService>>,
    Path(id): Path<i64>,
) -> Result<Json<ProfessorPage>, ApiError> {
    let professor = service.get_professor(ProfessorId(id)).await?;
    let projects = service.projects_for(&professor).await?;
    Ok(Json(ProfessorPage {
        professor,
        projects,
    }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn fetch_projects(
    Extension(service): Extension<Arc<ProfessorService>>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RefreshAccepted>), ApiError> {
    let professor = service.request_project_refresh(ProfessorId(id)).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RefreshAccepted {
            professor_id: professor.id,
            notice: REFRESH_NOTICE,
        }),
    ))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn refresh_projects(
    Extension(service): Extension<Arc<ProfessorService>>,
    Path(id): Path<i64>,
) -> Result<Json<ProjectList>, ApiError> {
    let professor = service.get_professor(ProfessorId(id)).await?;
    let projects = service.projects_for(&professor).await?;
    Ok(Json(ProjectList {
        professor_id: professor.id,
        last_projects_fetch: professor.last_projects_fetch,
        projects,
    }))
}
