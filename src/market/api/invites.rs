use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use super::{ApiResult, SharedState};
use crate::market::models::InstructorRequest;
use crate::market::session::CurrentUser;

#[derive(Deserialize)]
pub struct SendRequest {
    pub instructor_id: i64,
}

pub async fn send_request(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Json(req): Json<SendRequest>,
) -> ApiResult<(StatusCode, Json<InstructorRequest>)> {
    let request = state
        .db
        .call(move |db| db.send_instructor_request(&user, req.instructor_id))
        .await?;
    info!(
        request_id = request.id,
        instructor_id = request.instructor_id,
        "Instructor request sent"
    );
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn cancel_request(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
) -> ApiResult<StatusCode> {
    state
        .db
        .call(move |db| db.cancel_instructor_request(&user))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle(
    state: SharedState,
    current: CurrentUser,
    id: i64,
    accept: bool,
) -> ApiResult<Json<InstructorRequest>> {
    let user = current.user;
    let request = state
        .db
        .call(move |db| db.handle_instructor_request(&user, id, accept))
        .await?;
    info!(request_id = id, status = %request.status, "Instructor request handled");
    Ok(Json(request))
}

pub async fn accept_request(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<InstructorRequest>> {
    handle(state, current, id, true).await
}

pub async fn deny_request(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<InstructorRequest>> {
    handle(state, current, id, false).await
}

pub async fn dismiss_request(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .db
        .call(move |db| db.dismiss_denied_request(&user, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::market::models::Role;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_accept_round() {
        let (app, state) = test_app();
        let (student, student_token) = login_as(&state, "s@x.com", Role::Student);
        let (instructor, instructor_token) = login_as(&state, "i@x.com", Role::Instructor);

        let (status, request) = send(
            &app,
            "POST",
            "/api/instructor-requests",
            Some(&student_token),
            Some(json!({"instructor_id": instructor.id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(request["status"], "pending");

        let (status, _) = send(
            &app,
            "POST",
            "/api/instructor-requests",
            Some(&student_token),
            Some(json!({"instructor_id": instructor.id})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/api/instructor-requests/{}/accept", request["id"]);
        let (status, _) = send(&app, "POST", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, accepted) = send(&app, "POST", &uri, Some(&instructor_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted["status"], "accepted");

        let (_, profile) = send(&app, "GET", "/api/profile", Some(&student_token), None).await;
        assert_eq!(profile["user"]["instructor_id"], instructor.id);
        assert_eq!(profile["instructor"]["id"], instructor.id);
        assert_eq!(profile["user"]["id"], student.id);
    }

    #[tokio::test]
    async fn test_deny_then_dismiss() {
        let (app, state) = test_app();
        let (_, student_token) = login_as(&state, "s@x.com", Role::Student);
        let (instructor, instructor_token) = login_as(&state, "i@x.com", Role::Instructor);
        let (_, request) = send(
            &app,
            "POST",
            "/api/instructor-requests",
            Some(&student_token),
            Some(json!({"instructor_id": instructor.id})),
        )
        .await;
        let id = request["id"].as_i64().unwrap();

        let (status, denied) = send(
            &app,
            "POST",
            &format!("/api/instructor-requests/{}/deny", id),
            Some(&instructor_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(denied["status"], "denied");

        let uri = format!("/api/instructor-requests/{}", id);
        let (status, _) = send(&app, "DELETE", &uri, Some(&instructor_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", &uri, Some(&instructor_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_student_cancels_pending() {
        let (app, state) = test_app();
        let (_, student_token) = login_as(&state, "s@x.com", Role::Student);
        let (instructor, _) = login_as(&state, "i@x.com", Role::Instructor);
        send(
            &app,
            "POST",
            "/api/instructor-requests",
            Some(&student_token),
            Some(json!({"instructor_id": instructor.id})),
        )
        .await;
        let (status, _) = send(
            &app,
            "DELETE",
            "/api/instructor-requests",
            Some(&student_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(
            &app,
            "DELETE",
            "/api/instructor-requests",
            Some(&student_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
