//! Session lookup for request handlers.
//!
//! A session token is accepted from `Authorization: Bearer <token>` or from
//! the `session` cookie set at login.

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};

use super::api::{ApiError, SharedState};
use super::models::{Role, User};
use crate::errors::MarketError;

pub const SESSION_COOKIE: &str = "session";

/// Pull the session token out of request headers, preferring the bearer token.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(token: &str, ttl_hours: u32) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        u64::from(ttl_hours) * 3600
    )
}

pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

async fn lookup(parts: &Parts, state: &SharedState) -> Result<Option<(User, String)>, ApiError> {
    let Some(token) = token_from_headers(&parts.headers) else {
        return Ok(None);
    };
    let lookup_token = token.clone();
    let user = state
        .db
        .call(move |db| db.session_user(&lookup_token))
        .await?;
    Ok(user.map(|user| (user, token)))
}

/// The logged-in user. Rejects with 401 when the session is missing or expired.
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        match lookup(parts, state).await? {
            Some((user, token)) => Ok(CurrentUser { user, token }),
            None => Err(MarketError::Unauthenticated.into()),
        }
    }
}

/// The user when a valid session is present; anonymous otherwise.
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<SharedState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(lookup(parts, state).await?.map(|(user, _)| user)))
    }
}

/// A logged-in admin. Other roles get 403.
pub struct AdminUser(pub User);

impl FromRequestParts<SharedState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser { user, .. } = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(MarketError::forbidden("Admin access required").into());
        }
        Ok(AdminUser(user))
    }
}
