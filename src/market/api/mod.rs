//! JSON HTTP API.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tracing::error;

use super::db::DbHandle;
use super::models::Paging;
use super::password::Hasher;
use super::ws::{self, ChatHub};
use crate::errors::MarketError;

mod admin;
mod auth;
mod chat;
mod invites;
mod jobs;
mod mgt;
mod projects;

/// Default page size for public listings.
pub const PUBLIC_PAGE_SIZE: u32 = 25;
/// Default page size for back-office listings.
pub const ADMIN_PAGE_SIZE: u32 = 6;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub hub: ChatHub,
    pub hasher: Hasher,
    pub session_ttl_hours: u32,
    pub default_student_password: String,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

/// Body text for 500 responses. The underlying error chain is only logged.
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        let msg = err.to_string();
        match err {
            MarketError::Unauthenticated | MarketError::InvalidCredentials => {
                ApiError::Unauthorized(msg)
            }
            MarketError::Forbidden(_) => ApiError::Forbidden(msg),
            MarketError::NotFound { .. } => ApiError::NotFound(msg),
            MarketError::BadRequest(_) => ApiError::BadRequest(msg),
            MarketError::Conflict(_) => ApiError::Conflict(msg),
            MarketError::LockPoisoned | MarketError::Other(_) => ApiError::Internal(msg),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<MarketError>() {
            Ok(domain) => domain.into(),
            Err(other) => ApiError::Internal(format!("{:#}", other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(detail) => {
                error!(error = %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ── Query helpers ─────────────────────────────────────────────────────

/// Common listing parameters. `status` and `role` accept a label or code.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub q: Option<String>,
    pub status: Option<String>,
    pub role: Option<String>,
}

impl ListQuery {
    pub fn paging(&self, default_per_page: u32) -> Paging {
        Paging::new(self.page, self.per_page, default_per_page)
    }
}

/// Parse an optional filter value; blank means no filter.
pub(crate) fn parse_filter<T>(value: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr<Err = String>,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.parse().map(Some).map_err(ApiError::BadRequest),
        None => Ok(None),
    }
}

pub(crate) fn parse_value<T>(value: &str) -> ApiResult<T>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(ApiError::BadRequest)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        // auth
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/profile", get(auth::profile))
        // projects
        .route(
            "/api/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/{id}",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/api/projects/{id}/links", put(projects::update_links))
        .route("/api/projects/{id}/approve", post(projects::approve_project))
        .route("/api/projects/{id}/finish", post(projects::finish_project))
        // instructor back-office
        .route("/api/mgt", get(mgt::user_mgt_data))
        .route("/api/mgt/students", post(mgt::create_student))
        .route("/api/mgt/students/{id}", delete(mgt::delete_student))
        .route("/api/mgt/students/{id}/team", put(mgt::assign_user_to_team))
        .route("/api/mgt/groups", post(mgt::create_group))
        .route(
            "/api/mgt/groups/{id}",
            put(mgt::update_group).delete(mgt::delete_group),
        )
        .route("/api/mgt/groups/{id}/project", put(mgt::assign_project))
        // instructor requests
        .route(
            "/api/instructor-requests",
            post(invites::send_request).delete(invites::cancel_request),
        )
        .route(
            "/api/instructor-requests/{id}",
            delete(invites::dismiss_request),
        )
        .route(
            "/api/instructor-requests/{id}/accept",
            post(invites::accept_request),
        )
        .route("/api/instructor-requests/{id}/deny", post(invites::deny_request))
        // jobs
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/api/jobs/{id}",
            get(jobs::get_job).put(jobs::update_job).delete(jobs::delete_job),
        )
        .route(
            "/api/jobs/{id}/applications",
            get(jobs::list_job_applications).post(jobs::apply),
        )
        .route("/api/businesses/{id}/jobs", get(jobs::business_jobs))
        .route("/api/applications", get(jobs::my_applications))
        .route(
            "/api/applications/{id}",
            get(jobs::get_application).delete(jobs::withdraw_application),
        )
        .route(
            "/api/applications/{id}/status",
            put(jobs::set_application_status),
        )
        // chat
        .route(
            "/api/chat/{room}/messages",
            get(chat::history).post(chat::post_message),
        )
        .route("/api/chat/messages/{id}", delete(chat::delete_message))
        .route("/ws/chat", get(ws::ws_handler))
        // admin
        .route("/api/admin-messages", post(admin::send_message))
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/projects", get(admin::list_projects))
        .route("/api/admin/projects/{id}", delete(admin::delete_project))
        .route(
            "/api/admin/projects/{id}/status",
            put(admin::update_project_status),
        )
        .route("/api/admin/jobs", get(admin::list_jobs))
        .route("/api/admin/jobs/{id}", delete(admin::delete_job))
        .route("/api/admin/jobs/{id}/status", put(admin::update_job_status))
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/{id}", delete(admin::delete_user))
        .route("/api/admin/users/{id}/role", put(admin::update_user_role))
        .route("/api/admin/messages", get(admin::list_messages))
        .route("/api/admin/messages/{id}", delete(admin::delete_message))
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

// ── Test support ──────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_domain_errors_map_to_status() {
        let cases: Vec<(MarketError, StatusCode)> = vec![
            (MarketError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (MarketError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (MarketError::forbidden("no"), StatusCode::FORBIDDEN),
            (MarketError::not_found("Job", 1), StatusCode::NOT_FOUND),
            (MarketError::bad_request("bad"), StatusCode::BAD_REQUEST),
            (MarketError::conflict("dup"), StatusCode::CONFLICT),
            (MarketError::LockPoisoned, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_wrapped_domain_error_is_recovered() {
        let err = anyhow::Error::from(MarketError::conflict("dup")).context("while creating");
        assert!(matches!(ApiError::from(err), ApiError::Conflict(msg) if msg == "dup"));
        let err = anyhow::anyhow!("disk on fire");
        assert!(matches!(ApiError::from(err), ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn test_internal_error_body_hides_detail() {
        let err = anyhow::anyhow!("/var/lib/market.db: disk I/O error")
            .context("Failed to insert job");
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response.into_body()).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("disk"));
        assert!(!body.to_string().contains("Failed to insert"));
    }

    #[test]
    fn test_filters_parse_labels_codes_and_blanks() {
        use crate::market::models::ProjectStatus;
        assert_eq!(
            parse_filter::<ProjectStatus>(Some("approved")).unwrap(),
            Some(ProjectStatus::Approved)
        );
        assert_eq!(
            parse_filter::<ProjectStatus>(Some("2")).unwrap(),
            Some(ProjectStatus::Taken)
        );
        assert_eq!(parse_filter::<ProjectStatus>(Some(" ")).unwrap(), None);
        assert!(parse_filter::<ProjectStatus>(Some("bogus")).is_err());
    }

    #[tokio::test]
    async fn test_health_check_ok() {
        let (app, _) = test_app();
        let response = tower::ServiceExt::oneshot(
            app,
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_body_is_json() {
        let (app, _) = test_app();
        let (status, body) = send(&app, "GET", "/api/profile", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "You must be logged in");
    }
}
