use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use super::{ApiResult, ListQuery, PUBLIC_PAGE_SIZE, SharedState, parse_filter};
use crate::market::models::{Page, Project, ProjectDetail, ProjectStatus};
use crate::market::session::{CurrentUser, MaybeUser};

#[derive(Deserialize)]
pub struct ProjectRequest {
    pub name: String,
    pub description: String,
}

#[derive(Deserialize)]
pub struct LinksRequest {
    pub project_link: Option<String>,
    pub github_link: Option<String>,
}

pub async fn list_projects(
    State(state): State<SharedState>,
    MaybeUser(viewer): MaybeUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<Project>>> {
    let status: Option<ProjectStatus> = parse_filter(query.status.as_deref())?;
    let paging = query.paging(PUBLIC_PAGE_SIZE);
    let include_pending = viewer.is_some_and(|v| v.role.is_staff());
    let q = query.q;
    let page = state
        .db
        .call(move |db| db.list_projects(paging, q.as_deref(), status, include_pending))
        .await?;
    Ok(Json(page))
}

pub async fn create_project(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Json(req): Json<ProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = state
        .db
        .call(move |db| db.create_project(&user, &req.name, &req.description))
        .await?;
    info!(project_id = project.id, status = %project.status, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<SharedState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ProjectDetail>> {
    let detail = state
        .db
        .call(move |db| db.project_detail(id, viewer.as_ref()))
        .await?;
    Ok(Json(detail))
}

pub async fn update_project(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ProjectRequest>,
) -> ApiResult<Json<Project>> {
    let project = state
        .db
        .call(move |db| db.update_project(id, &user, &req.name, &req.description))
        .await?;
    Ok(Json(project))
}

pub async fn update_links(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<LinksRequest>,
) -> ApiResult<Json<Project>> {
    let project = state
        .db
        .call(move |db| {
            db.update_project_links(
                id,
                &user,
                req.project_link.as_deref(),
                req.github_link.as_deref(),
            )
        })
        .await?;
    Ok(Json(project))
}

pub async fn approve_project(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Project>> {
    let project = state
        .db
        .call(move |db| db.approve_project(id, &user))
        .await?;
    info!(project_id = id, status = %project.status, "Project approval toggled");
    Ok(Json(project))
}

pub async fn finish_project(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Project>> {
    let project = state
        .db
        .call(move |db| db.finish_project(id, &user))
        .await?;
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .db
        .call(move |db| db.delete_project(id, &user))
        .await?;
    info!(project_id = id, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}
