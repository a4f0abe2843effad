use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use super::{ApiResult, ListQuery, PUBLIC_PAGE_SIZE, SharedState, parse_value};
use crate::market::models::{
    ApplicationStatus, BusinessJobs, Job, JobApplication, JobStatus, Page,
};
use crate::market::session::{CurrentUser, MaybeUser};

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub title: String,
    pub description: String,
    pub link: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateJobRequest {
    pub title: String,
    pub description: String,
    pub status: String,
    pub link: Option<String>,
}

#[derive(Deserialize)]
pub struct ApplyRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

pub async fn list_jobs(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<Job>>> {
    let paging = query.paging(PUBLIC_PAGE_SIZE);
    let q = query.q;
    let page = state
        .db
        .call(move |db| db.list_open_jobs(paging, q.as_deref()))
        .await?;
    Ok(Json(page))
}

pub async fn create_job(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state
        .db
        .call(move |db| db.create_job(&user, &req.title, &req.description, req.link.as_deref()))
        .await?;
    info!(job_id = job.id, "Job created");
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<SharedState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Job>> {
    let job = state
        .db
        .call(move |db| db.view_job(id, viewer.as_ref()))
        .await?;
    Ok(Json(job))
}

pub async fn update_job(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateJobRequest>,
) -> ApiResult<Json<Job>> {
    let status: JobStatus = parse_value(&req.status)?;
    let job = state
        .db
        .call(move |db| {
            db.update_job(
                id,
                &user,
                &req.title,
                &req.description,
                status,
                req.link.as_deref(),
            )
        })
        .await?;
    Ok(Json(job))
}

pub async fn delete_job(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.db.call(move |db| db.delete_job(id, &user)).await?;
    info!(job_id = id, "Job deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn business_jobs(
    State(state): State<SharedState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<BusinessJobs>> {
    let page = state
        .db
        .call(move |db| db.business_jobs(id, viewer.as_ref()))
        .await?;
    Ok(Json(page))
}

// ── Applications ─────────────────────────────────────────────────────

pub async fn apply(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(job_id): Path<i64>,
    Json(req): Json<ApplyRequest>,
) -> ApiResult<(StatusCode, Json<JobApplication>)> {
    let application = state
        .db
        .call(move |db| db.apply_to_job(&user, job_id, &req.message))
        .await?;
    info!(application_id = application.id, job_id, "Application submitted");
    Ok((StatusCode::CREATED, Json(application)))
}

pub async fn list_job_applications(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<Vec<JobApplication>>> {
    let applications = state
        .db
        .call(move |db| db.applications_for_job(&user, job_id))
        .await?;
    Ok(Json(applications))
}

pub async fn my_applications(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
) -> ApiResult<Json<Vec<JobApplication>>> {
    let applications = state
        .db
        .call(move |db| db.list_applications_by_user(user.id))
        .await?;
    Ok(Json(applications))
}

pub async fn get_application(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<JobApplication>> {
    let application = state
        .db
        .call(move |db| db.get_application(&user, id))
        .await?;
    Ok(Json(application))
}

pub async fn set_application_status(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<JobApplication>> {
    let status: ApplicationStatus = parse_value(&req.status)?;
    let application = state
        .db
        .call(move |db| db.set_application_status(&user, id, status))
        .await?;
    info!(application_id = id, %status, "Application status changed");
    Ok(Json(application))
}

pub async fn withdraw_application(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .db
        .call(move |db| db.withdraw_application(&user, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
