use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::SharedState;
use super::db::DbHandle;
use super::models::{ChatMessage, Room, User};
use super::session::CurrentUser;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Buffered frames per connection before the socket writer applies backpressure.
const OUTBOUND_BUFFER: usize = 64;

// ── Event types ──────────────────────────────────────────────────────

/// Server-to-client chat events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageBroadcast(ChatMessage),
    MessageDeleted { message_id: i64, room: Room },
    Joined { room: Room, history: Vec<ChatMessage> },
    Left { room: Room },
    Error { message: String },
}

/// Client-to-server chat frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Join { room: Room },
    Leave { room: Room },
    NewMessage { room: Room, message: String },
    DeleteMessage { message_id: i64 },
}

// ── Room hub ─────────────────────────────────────────────────────────

/// Per-room broadcast channels. A room's channel is created on first
/// subscription and dropped by [`ChatHub::prune`] once nobody listens.
pub struct ChatHub {
    rooms: DashMap<Room, broadcast::Sender<String>>,
    capacity: usize,
}

impl ChatHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, room: Room) -> broadcast::Receiver<String> {
        self.rooms
            .entry(room)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Serialize and send `event` to everyone in `room`. Returns the number
    /// of receivers reached; zero when the room has no listeners.
    pub fn publish(&self, room: Room, event: &ChatEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(%room, error = %e, "Failed to serialize chat event");
                return 0;
            }
        };
        match self.rooms.get(&room) {
            Some(tx) => tx.send(json).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop channels that have no receivers left.
    pub fn prune(&self) {
        self.rooms.retain(|_, tx| tx.receiver_count() > 0);
    }

    #[cfg(test)]
    pub(crate) fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new(256)
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    CurrentUser { user, .. }: CurrentUser,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: SharedState, user: User) {
    debug!(user_id = user.id, "Chat socket connected");
    let (sender, receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let mut subs = Subscriptions::new(state.db.clone(), user.id, out_tx);
    run_socket_loop(sender, receiver, out_rx, &state, &user, &mut subs).await;
    subs.clear();
    state.hub.prune();
    debug!(user_id = user.id, "Chat socket closed");
}

/// Forwarding tasks from joined rooms into the connection's outbound queue.
///
/// Access is re-checked against the stored account before every forwarded
/// frame. A user who lost access gets a final `left` event and the task ends.
pub(crate) struct Subscriptions {
    db: DbHandle,
    user_id: i64,
    out_tx: mpsc::Sender<String>,
    rooms: HashMap<Room, JoinHandle<()>>,
}

impl Subscriptions {
    pub(crate) fn new(db: DbHandle, user_id: i64, out_tx: mpsc::Sender<String>) -> Self {
        Self {
            db,
            user_id,
            out_tx,
            rooms: HashMap::new(),
        }
    }

    fn join(&mut self, room: Room, mut rx: broadcast::Receiver<String>) {
        if self.is_joined(room) {
            return;
        }
        let out_tx = self.out_tx.clone();
        let db = self.db.clone();
        let user_id = self.user_id;
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        let allowed = db
                            .call(move |db| db.user_can_access_room(user_id, room))
                            .await;
                        match allowed {
                            Ok(true) => {}
                            Ok(false) => {
                                debug!(user_id, %room, "Chat access revoked");
                                let left = serde_json::to_string(&ChatEvent::Left { room });
                                if let Ok(json) = left {
                                    let _ = out_tx.send(json).await;
                                }
                                break;
                            }
                            Err(e) => {
                                warn!(user_id, %room, error = %e, "Chat access check failed");
                                break;
                            }
                        }
                        if out_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%room, skipped, "Chat subscriber lagged");
                    }
                }
            }
        });
        self.rooms.insert(room, task);
    }

    fn leave(&mut self, room: Room) -> bool {
        match self.rooms.remove(&room) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_joined(&self, room: Room) -> bool {
        self.rooms
            .get(&room)
            .is_some_and(|task| !task.is_finished())
    }

    fn clear(&mut self) {
        for (_, task) in self.rooms.drain() {
            task.abort();
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines room forwarding, client frame handling, and periodic ping/pong
/// health checking into a single select loop. If no Pong is received within
/// [`PONG_TIMEOUT`] after a Ping is sent, the connection is considered dead
/// and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut out_rx: mpsc::Receiver<String>,
    state: &SharedState,
    user: &User,
    subs: &mut Subscriptions,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(user_id = user.id, "Chat socket missed pong");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            Some(msg) = out_rx.recv() => {
                if sender.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(frame) => handle_frame(state, user, frame, subs).await,
                            Err(e) => Some(ChatEvent::Error {
                                message: format!("Malformed frame: {}", e),
                            }),
                        };
                        if let Some(reply) = reply
                            && let Ok(json) = serde_json::to_string(&reply)
                            && sender.send(Message::Text(json.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

/// Apply one client frame. Returns the event to send back to this client
/// only; room-wide events go through the hub.
pub(crate) async fn handle_frame(
    state: &SharedState,
    user: &User,
    frame: ClientFrame,
    subs: &mut Subscriptions,
) -> Option<ChatEvent> {
    let result: anyhow::Result<Option<ChatEvent>> = match frame {
        ClientFrame::Join { room } => {
            let viewer = user.clone();
            match state.db.call(move |db| db.room_history(&viewer, room)).await {
                Ok(history) => {
                    subs.join(room, state.hub.subscribe(room));
                    Ok(Some(ChatEvent::Joined { room, history }))
                }
                Err(e) => Err(e),
            }
        }
        ClientFrame::Leave { room } => {
            subs.leave(room);
            state.hub.prune();
            Ok(Some(ChatEvent::Left { room }))
        }
        ClientFrame::NewMessage { room, message } => {
            let sender = user.clone();
            state
                .db
                .call(move |db| db.insert_chat_message(&sender, room, &message))
                .await
                .map(|stored| {
                    state.hub.publish(room, &ChatEvent::MessageBroadcast(stored));
                    None
                })
        }
        ClientFrame::DeleteMessage { message_id } => {
            let author = user.clone();
            state
                .db
                .call(move |db| db.delete_chat_message(&author, message_id))
                .await
                .map(|room| {
                    state
                        .hub
                        .publish(room, &ChatEvent::MessageDeleted { message_id, room });
                    None
                })
        }
    };

    result.unwrap_or_else(|e| {
        warn!(user_id = user.id, error = %e, "Chat frame failed");
        Some(ChatEvent::Error {
            message: e.to_string(),
        })
    })
}

// ── Tests ────────────────────────────────────────────────────────────
