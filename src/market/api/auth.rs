use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, ApiResult, SharedState};
use crate::errors::MarketError;
use crate::market::db::required;
use crate::market::models::{Profile, Role, User};
use crate::market::session::{CurrentUser, clear_session_cookie, session_cookie};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password2: String,
    pub account_type: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
}

pub async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let name = required(&req.name, "Name")?.to_string();
    let email = required(&req.email, "Email")?.to_string();
    if req.password.is_empty() || req.password2.is_empty() {
        return Err(MarketError::bad_request("Password is required").into());
    }
    if req.password != req.password2 {
        return Err(MarketError::bad_request("Passwords do not match").into());
    }
    let role: Role = super::parse_value(&req.account_type)?;
    if !role.self_registrable() {
        return Err(MarketError::bad_request("Invalid account type").into());
    }

    let hash = state.hasher.hash_blocking(req.password).await?;
    let user = state
        .db
        .call(move |db| db.create_user(Some(&name), &email, &hash, role, None))
        .await?;
    info!(user_id = user.id, role = %user.role, "Registered user");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = required(&req.email, "Email")?.to_string();
    if req.password.is_empty() {
        return Err(MarketError::bad_request("Password is required").into());
    }

    let found = state
        .db
        .call(move |db| db.find_credentials(&email))
        .await?;
    let Some((user, stored)) = found else {
        return Err(MarketError::InvalidCredentials.into());
    };
    if !state.hasher.verify_blocking(req.password, stored).await? {
        return Err(MarketError::InvalidCredentials.into());
    }

    let ttl = state.session_ttl_hours;
    let user_id = user.id;
    let token = state
        .db
        .call(move |db| db.create_session(user_id, ttl))
        .await?;
    info!(user_id, "User logged in");
    Ok((
        [(header::SET_COOKIE, session_cookie(&token, ttl))],
        Json(LoginResponse { user, token }),
    ))
}

pub async fn logout(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let token = current.token;
    state.db.call(move |db| db.delete_session(&token)).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie())],
    ))
}

pub async fn me(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

pub async fn profile(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<Json<Profile>, ApiError> {
    let user_id = current.user.id;
    let profile = state.db.call(move |db| db.get_profile(user_id)).await?;
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn registration(email: &str, account_type: &str) -> serde_json::Value {
        json!({
            "name": "Test User",
            "email": email,
            "password": "pw",
            "password2": "pw",
            "account_type": account_type,
        })
    }

    #[tokio::test]
    async fn test_register_then_login_with_cookie() {
        let (app, _) = test_app();
        let (status, user) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(registration("new@x.com", "business")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["role"], "business");

        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"email": "new@x.com", "password": "pw"}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get("set-cookie")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("session="));
        let body = body_json(response.into_body()).await;
        let token = body["token"].as_str().unwrap().to_string();

        // The cookie alone authenticates.
        let request = Request::builder()
            .uri("/api/auth/me")
            .header("cookie", cookie.split(';').next().unwrap())
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (status, _) = send(&app, "POST", "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let (app, _) = test_app();
        let mut mismatched = registration("a@x.com", "student");
        mismatched["password2"] = json!("other");
        let (status, body) = send(&app, "POST", "/api/auth/register", None, Some(mismatched)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("do not match"));

        let (status, _) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(registration("a@x.com", "admin")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(registration("", "student")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let (app, _) = test_app();
        let body = registration("dup@x.com", "alumni");
        let (status, _) = send(&app, "POST", "/api/auth/register", None, Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, "POST", "/api/auth/register", None, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let (app, state) = test_app();
        login_as(&state, "s@x.com", crate::market::models::Role::Student);
        let (status, body) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "s@x.com", "password": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid email or password");

        let (status, _) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ghost@x.com", "password": "secret"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_profile_requires_session() {
        let (app, state) = test_app();
        let (user, token) = login_as(&state, "i@x.com", crate::market::models::Role::Instructor);
        let (status, body) = send(&app, "GET", "/api/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], user.id);
        assert_eq!(body["instructors"].as_array().unwrap().len(), 1);
    }
}
