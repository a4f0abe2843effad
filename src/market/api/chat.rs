use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::debug;

use super::{ApiResult, SharedState, parse_value};
use crate::market::models::{ChatMessage, Room};
use crate::market::session::CurrentUser;
use crate::market::ws::ChatEvent;

#[derive(Deserialize)]
pub struct PostMessageRequest {
    pub message: String,
}

pub async fn history(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(room): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let room: Room = parse_value(&room)?;
    let messages = state
        .db
        .call(move |db| db.room_history(&user, room))
        .await?;
    Ok(Json(messages))
}

/// HTTP fallback for clients without a socket. Live subscribers still get
/// the broadcast.
pub async fn post_message(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(room): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let room: Room = parse_value(&room)?;
    let message = state
        .db
        .call(move |db| db.insert_chat_message(&user, room, &req.message))
        .await?;
    let reached = state
        .hub
        .publish(room, &ChatEvent::MessageBroadcast(message.clone()));
    debug!(%room, message_id = message.message_id, reached, "Chat message posted");
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn delete_message(
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let room = state
        .db
        .call(move |db| db.delete_chat_message(&user, id))
        .await?;
    state.hub.publish(
        room,
        &ChatEvent::MessageDeleted {
            message_id: id,
            room,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}
