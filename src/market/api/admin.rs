//! Back-office endpoints. Everything here except `send_message` requires an
//! admin session.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use super::{ADMIN_PAGE_SIZE, ApiResult, ListQuery, SharedState, parse_filter, parse_value};
use crate::errors::MarketError;
use crate::market::models::{
    AdminMessage, AdminStats, CountedPage, Job, JobStatus, Project, ProjectStatus, Role, User,
};
use crate::market::session::{AdminUser, CurrentUser};

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

/// Any logged-in user may write to the admins.
pub async fn send_message(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Json(req): Json<MessageRequest>,
) -> ApiResult<(StatusCode, Json<AdminMessage>)> {
    let message = state
        .db
        .call(move |db| db.send_admin_message(&user, &req.message))
        .await?;
    info!(message_id = message.id, "Admin message received");
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn stats(
    State(state): State<SharedState>,
    _admin: AdminUser,
) -> ApiResult<Json<AdminStats>> {
    Ok(Json(state.db.call(|db| db.admin_stats()).await?))
}

// ── Projects ─────────────────────────────────────────────────────────

pub async fn list_projects(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<CountedPage<Project>>> {
    let status: Option<ProjectStatus> = parse_filter(query.status.as_deref())?;
    let paging = query.paging(ADMIN_PAGE_SIZE);
    let q = query.q;
    let page = state
        .db
        .call(move |db| db.list_projects_admin(paging, q.as_deref(), status))
        .await?;
    Ok(Json(page))
}

pub async fn update_project_status(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<Project>> {
    let status: ProjectStatus = parse_value(&req.status)?;
    let project = state
        .db
        .call(move |db| db.set_project_status(id, status))
        .await?;
    info!(admin_id = admin.id, project_id = id, %status, "Admin set project status");
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.db.call(move |db| db.admin_delete_project(id)).await? {
        return Err(MarketError::not_found("Project", id).into());
    }
    info!(admin_id = admin.id, project_id = id, "Admin deleted project");
    Ok(StatusCode::NO_CONTENT)
}

// ── Jobs ─────────────────────────────────────────────────────────────

pub async fn list_jobs(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<CountedPage<Job>>> {
    let status: Option<JobStatus> = parse_filter(query.status.as_deref())?;
    let paging = query.paging(ADMIN_PAGE_SIZE);
    let q = query.q;
    let page = state
        .db
        .call(move |db| db.list_jobs_admin(paging, q.as_deref(), status))
        .await?;
    Ok(Json(page))
}

pub async fn update_job_status(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<Job>> {
    let status: JobStatus = parse_value(&req.status)?;
    let job = state
        .db
        .call(move |db| db.set_job_status(id, status))
        .await?;
    info!(admin_id = admin.id, job_id = id, %status, "Admin set job status");
    Ok(Json(job))
}

pub async fn delete_job(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.db.call(move |db| db.admin_delete_job(id)).await? {
        return Err(MarketError::not_found("Job", id).into());
    }
    info!(admin_id = admin.id, job_id = id, "Admin deleted job");
    Ok(StatusCode::NO_CONTENT)
}

// ── Users ────────────────────────────────────────────────────────────

pub async fn list_users(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<CountedPage<User>>> {
    let role: Option<Role> = parse_filter(query.role.as_deref())?;
    let paging = query.paging(ADMIN_PAGE_SIZE);
    let q = query.q;
    let page = state
        .db
        .call(move |db| db.list_users_admin(paging, q.as_deref(), role))
        .await?;
    Ok(Json(page))
}

pub async fn update_user_role(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<Json<User>> {
    let role: Role = parse_value(&req.role)?;
    let user = state
        .db
        .call(move |db| db.update_user_role(id, role))
        .await?;
    info!(admin_id = admin.id, user_id = id, %role, "Admin changed user role");
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let admin_id = admin.id;
    state
        .db
        .call(move |db| db.admin_delete_user(&admin, id))
        .await?;
    info!(admin_id, user_id = id, "Admin deleted user");
    Ok(StatusCode::NO_CONTENT)
}

// ── Messages ─────────────────────────────────────────────────────────

pub async fn list_messages(
    State(state): State<SharedState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<AdminMessage>>> {
    Ok(Json(state.db.call(|db| db.list_admin_messages()).await?))
}

pub async fn delete_message(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .db
        .call(move |db| db.delete_admin_message(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
