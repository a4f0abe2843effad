use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use super::{ApiResult, SharedState};
use crate::errors::MarketError;
use crate::market::db::{ensure_role, required};
use crate::market::models::{Role, Team, User, UserMgtData};
use crate::market::session::CurrentUser;

#[derive(Deserialize)]
pub struct CreateStudentRequest {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub project_id: i64,
}

#[derive(Deserialize)]
pub struct RenameGroupRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AssignProjectRequest {
    pub project_id: i64,
}

#[derive(Deserialize)]
pub struct AssignTeamRequest {
    pub team_id: Option<i64>,
}

pub async fn user_mgt_data(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
) -> ApiResult<Json<UserMgtData>> {
    let data = state.db.call(move |db| db.user_mgt_data(&user)).await?;
    Ok(Json(data))
}

pub async fn create_student(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Json(req): Json<CreateStudentRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    // Reject other roles before hashing.
    ensure_role(&user, &[Role::Instructor], "Access restricted to instructors")?;
    required(&req.email, "Email")?;
    let hash = state
        .hasher
        .hash_blocking(state.default_student_password.clone())
        .await?;
    let student = state
        .db
        .call(move |db| db.create_student(&user, &req.email, req.name.as_deref(), &hash))
        .await?;
    info!(student_id = student.id, "Instructor created student");
    Ok((StatusCode::CREATED, Json(student)))
}

pub async fn delete_student(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .db
        .call(move |db| db.delete_student(&user, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_group(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<(StatusCode, Json<Team>)> {
    let project_id = req.project_id;
    let team = state
        .db
        .call(move |db| db.create_group(&user, &req.name, project_id))
        .await?;
    info!(team_id = team.id, project_id, "Team created");
    Ok((StatusCode::CREATED, Json(team)))
}

pub async fn update_group(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<RenameGroupRequest>,
) -> ApiResult<Json<Team>> {
    let team = state
        .db
        .call(move |db| db.update_group(&user, id, &req.name))
        .await?;
    Ok(Json(team))
}

pub async fn delete_group(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.db.call(move |db| db.delete_group(&user, id)).await?;
    info!(team_id = id, "Team deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_project(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<AssignProjectRequest>,
) -> ApiResult<Json<Team>> {
    let team = state
        .db
        .call(move |db| db.assign_project_to_group(&user, id, req.project_id))
        .await?;
    Ok(Json(team))
}

pub async fn assign_user_to_team(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<AssignTeamRequest>,
) -> ApiResult<StatusCode> {
    if req.team_id.is_some_and(|t| t <= 0) {
        return Err(MarketError::bad_request("team_id must be positive").into());
    }
    state
        .db
        .call(move |db| db.assign_user_to_team(&user, id, req.team_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
