//! Campus marketplace back-end.
//!
//! ## Overview
//!
//! Businesses, instructors and admins post projects; instructors approve them
//! and hand them to student teams. Businesses also post jobs that students
//! and alumni apply to. Every project and every application has a chat room,
//! served live over a WebSocket and persisted in SQLite.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (Router, startup, shutdown)          │
//! │          │ <─────── │    └─ api/  (handlers, AppState, ApiError)       │
//! └──────────┘ WebSocket│         │  session.rs (CurrentUser, AdminUser)   │
//!                       │         v                                        │
//!                       │  ws.rs  (ChatHub rooms, socket loop)             │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  db/    (MarketDb via DbHandle, one file per     │
//!                       │          area: users, projects, teams, ...)      │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                         |
//! |------------|--------------------------------------------------------|
//! | `models`   | Records, integer-coded enums, `Room`, paging types     |
//! | `password` | Argon2id hashing on the blocking pool                  |
//!
//! ## Typical Request Flow (post a chat message)
//!
//! 1. Client sends `{"type":"new_message",...}` on `/ws/chat`.
//! 2. `ws::handle_frame()` runs `MarketDb::insert_chat_message()`, which
//!    checks room access before storing.
//! 3. The stored message is published to the room's broadcast channel and
//!    every joined socket forwards it to its client.

pub mod api;
pub mod db;
pub mod models;
pub mod password;
pub mod server;
pub mod session;
pub mod ws;
