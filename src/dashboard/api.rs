use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;

use super::db::DbHandle;
use super::github::parse_owner_repo;
use super::query::{ReportQueryService, ReportRequest};
use crate::errors::ReportError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub reports: Arc<ReportQueryService>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ReportQueryParams {
    pub date: Option<String>,
    pub enrichments: Option<String>,
    pub force: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPullRequestRequest {
    pub repository: String,
    pub pull_request_number: i64,
    #[serde(default)]
    pub title: String,
    pub author: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub name: String,
    pub display_name: Option<String>,
    pub team: Option<String>,
    pub repository: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateManualRunRequest {
    pub application_id: i64,
    pub report_date: String,
    pub triggered_by: String,
    pub status: String,
    pub notes: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest {
        message: String,
        field: Option<&'static str>,
    },
    /// The message channel rejected a publish.
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            field: None,
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Validation { field, message } => ApiError::BadRequest {
                message,
                field: Some(field),
            },
            ReportError::Publish(e) => ApiError::Unavailable(e.to_string()),
            ReportError::Infrastructure(e) => ApiError::Internal(format!("{:#}", e)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, field) = match self {
            ApiError::BadRequest { message, field } => (StatusCode::BAD_REQUEST, message, field),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", message);
        }
        let mut body = serde_json::json!({"success": false, "error": message});
        if let Some(field) = field {
            body["field"] = serde_json::Value::from(field);
        }
        (status, Json(body)).into_response()
    }
}

fn internal(e: anyhow::Error) -> ApiError {
    ApiError::Internal(format!("{:#}", e))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/e2e-reports", get(get_report))
        .route(
            "/api/pull-requests",
            get(list_pull_requests).post(track_pull_request),
        )
        .route("/api/notifications", get(list_notifications))
        .route("/api/applications", post(create_application))
        .route("/api/manual-runs", post(create_manual_run))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

/// 200 with the report when ready, 202 while it is pending.
async fn get_report(
    State(state): State<SharedState>,
    Query(params): Query<ReportQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let request = ReportRequest::parse(
        params.date.as_deref(),
        params.enrichments.as_deref(),
        params.force.as_deref(),
        Utc::now().date_naive(),
    )?;
    let outcome = state.reports.get_report(request).await?;
    let status = if outcome.is_pending() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.into_payload())))
}

async fn list_pull_requests(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let prs = state
        .db
        .call(|db| db.list_tracked_pull_requests())
        .await
        .map_err(internal)?;
    Ok(Json(prs))
}

async fn track_pull_request(
    State(state): State<SharedState>,
    Json(req): Json<TrackPullRequestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repository = parse_owner_repo(req.repository.trim()).ok_or_else(|| ApiError::BadRequest {
        message: format!("'{}' is not an owner/repo slug", req.repository),
        field: Some("repository"),
    })?;
    if req.pull_request_number <= 0 {
        return Err(ApiError::BadRequest {
            message: "pullRequestNumber must be positive".to_string(),
            field: Some("pullRequestNumber"),
        });
    }
    let number = req.pull_request_number;
    let title = req.title;
    let author = req.author;
    let pr = state
        .db
        .call(move |db| db.track_pull_request(&repository, number, &title, author.as_deref()))
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(pr)))
}

async fn list_notifications(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let notifications = state
        .db
        .call(|db| db.list_notifications())
        .await
        .map_err(internal)?;
    Ok(Json(notifications))
}

async fn create_application(
    State(state): State<SharedState>,
    Json(req): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Application name is required"));
    }
    let app = state
        .db
        .call(move |db| {
            db.create_application(
                &name,
                req.display_name.as_deref(),
                req.team.as_deref(),
                req.repository.as_deref(),
            )
        })
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(app)))
}

async fn create_manual_run(
    State(state): State<SharedState>,
    Json(req): Json<CreateManualRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let date = super::query::parse_report_date(&req.report_date)
        .map_err(ApiError::from)?
        .format("%Y-%m-%d")
        .to_string();
    if !matches!(req.status.as_str(), "passed" | "failed" | "skipped") {
        return Err(ApiError::BadRequest {
            message: format!("Unknown run status '{}'", req.status),
            field: Some("status"),
        });
    }
    let run = state
        .db
        .call(move |db| {
            db.create_manual_run(
                req.application_id,
                &date,
                &req.triggered_by,
                &req.status,
                req.notes.as_deref(),
            )
        })
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(run)))
}

// ── Tests ─────────────────────────────────────────────────────────────
