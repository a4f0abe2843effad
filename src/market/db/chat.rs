use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{OptionalExtension, Row, params};

use super::MarketDb;
use crate::errors::MarketError;
use crate::market::models::*;

const STORED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DISPLAY_FORMAT: &str = "%b %d, %Y %I:%M %p";

const MESSAGE_SELECT: &str = "SELECT c.id, c.project_id, c.application_id, c.user_id, u.email,
     c.message_text, c.timestamp
     FROM chat_messages c JOIN users u ON c.user_id = u.id";

/// Render a SQLite `datetime('now')` value for display. Unparseable input
/// is passed through unchanged.
pub fn format_timestamp(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, STORED_FORMAT)
        .map(|ts| ts.format(DISPLAY_FORMAT).to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let project_id: Option<i64> = row.get(1)?;
    let application_id: Option<i64> = row.get(2)?;
    let room = match (project_id, application_id) {
        (Some(id), _) => Room::Project(id),
        (None, Some(id)) => Room::Application(id),
        (None, None) => return Err(rusqlite::Error::InvalidColumnType(
            1,
            "project_id".into(),
            rusqlite::types::Type::Null,
        )),
    };
    let raw: String = row.get(6)?;
    Ok(ChatMessage {
        message_id: row.get(0)?,
        room,
        user_id: row.get(3)?,
        email: row.get(4)?,
        message: row.get(5)?,
        timestamp: format_timestamp(&raw),
    })
}

fn room_columns(room: Room) -> (Option<i64>, Option<i64>) {
    match room {
        Room::Project(id) => (Some(id), None),
        Room::Application(id) => (None, Some(id)),
    }
}

impl MarketDb {
    pub fn can_access_room(&self, user: &User, room: Room) -> Result<bool> {
        match room {
            Room::Project(id) => self.can_chat(user, id),
            Room::Application(id) => self.can_access_application(user, id),
        }
    }

    /// Like [`MarketDb::can_access_room`] but judged on the stored account,
    /// so role changes and deletions since login are honoured.
    pub fn user_can_access_room(&self, user_id: i64, room: Room) -> Result<bool> {
        match self.get_user(user_id)? {
            Some(user) => self.can_access_room(&user, room),
            None => Ok(false),
        }
    }

    fn ensure_room_access(&self, user: &User, room: Room) -> Result<()> {
        if !self.can_access_room(user, room)? {
            let message = format!("You do not have access to {}", room);
            return Err(MarketError::forbidden(message).into());
        }
        Ok(())
    }

    /// Store a message after checking the sender may post in `room`.
    pub fn insert_chat_message(&self, user: &User, room: Room, text: &str) -> Result<ChatMessage> {
        self.ensure_room_access(user, room)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(MarketError::bad_request("Message cannot be empty").into());
        }
        let (project_id, application_id) = room_columns(room);
        self.conn
            .execute(
                "INSERT INTO chat_messages (project_id, application_id, user_id, message_text)
                 VALUES (?1, ?2, ?3, ?4)",
                params![project_id, application_id, user.id, text],
            )
            .context("Failed to insert chat message")?;
        let id = self.conn.last_insert_rowid();
        self.get_chat_message(id)?
            .context("Chat message not found after insert")
    }

    pub fn get_chat_message(&self, id: i64) -> Result<Option<ChatMessage>> {
        self.conn
            .query_row(
                &format!("{} WHERE c.id = ?1", MESSAGE_SELECT),
                params![id],
                message_from_row,
            )
            .optional()
            .context("Failed to query chat message")
    }

    /// Messages in a room, oldest first.
    pub fn chat_history(&self, room: Room) -> Result<Vec<ChatMessage>> {
        let (project_id, application_id) = room_columns(room);
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE c.project_id IS ?1 AND c.application_id IS ?2 ORDER BY c.timestamp, c.id",
                MESSAGE_SELECT
            ))
            .context("Failed to prepare chat_history")?;
        let rows = stmt
            .query_map(params![project_id, application_id], message_from_row)
            .context("Failed to query chat history")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read chat row")
    }

    /// History for a user who may read the room.
    pub fn room_history(&self, user: &User, room: Room) -> Result<Vec<ChatMessage>> {
        self.ensure_room_access(user, room)?;
        self.chat_history(room)
    }

    /// Delete one of the user's own messages. Returns the room it was in.
    pub fn delete_chat_message(&self, user: &User, id: i64) -> Result<Room> {
        let message = self
            .get_chat_message(id)?
            .ok_or_else(|| MarketError::not_found("Message", id))?;
        if message.user_id != user.id {
            return Err(MarketError::forbidden("You can only delete your own messages").into());
        }
        self.conn
            .execute("DELETE FROM chat_messages WHERE id = ?1", params![id])
            .context("Failed to delete chat message")?;
        Ok(message.room)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{db, user};
    use super::*;

    #[test]
    fn test_timestamps_render_for_display() {
        assert_eq!(format_timestamp("2024-03-05 14:07:00"), "Mar 05, 2024 02:07 PM");
        assert_eq!(format_timestamp("not a date"), "not a date");
    }

    #[test]
    fn test_owner_posts_and_reads_project_room() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let project = db.create_project(&owner, "P", "D").unwrap();
        let room = Room::Project(project.id);

        let first = db.insert_chat_message(&owner, room, " hello ").unwrap();
        let second = db.insert_chat_message(&owner, room, "again").unwrap();
        assert_eq!(first.message, "hello");
        assert_eq!(first.email, "b@x.com");
        assert_eq!(first.room, room);

        let history = db.room_history(&owner, room).unwrap();
        let ids: Vec<i64> = history.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![first.message_id, second.message_id]);
    }

    #[test]
    fn test_outsiders_cannot_post_or_read() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let student = user(&db, "s@x.com", Role::Student);
        let project = db.create_project(&owner, "P", "D").unwrap();
        let room = Room::Project(project.id);

        let err = db.insert_chat_message(&student, room, "hi").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::Forbidden(_))
        ));
        assert!(db.room_history(&student, room).is_err());
        assert!(db.insert_chat_message(&owner, room, "   ").is_err());
    }

    #[test]
    fn test_application_rooms_are_separate() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let student = user(&db, "s@x.com", Role::Student);
        let job = db.create_job(&business, "J", "D", None).unwrap();
        db.set_job_status(job.id, JobStatus::Open).unwrap();
        let application = db.apply_to_job(&student, job.id, "").unwrap();
        let room = Room::Application(application.id);

        db.insert_chat_message(&student, room, "question").unwrap();
        db.insert_chat_message(&business, room, "answer").unwrap();
        assert_eq!(db.chat_history(room).unwrap().len(), 2);
        assert!(db.chat_history(Room::Project(application.id)).unwrap().is_empty());
    }

    #[test]
    fn test_only_author_deletes() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let admin = user(&db, "a@x.com", Role::Admin);
        let project = db.create_project(&owner, "P", "D").unwrap();
        let message = db
            .insert_chat_message(&owner, Room::Project(project.id), "hi")
            .unwrap();

        assert!(db.delete_chat_message(&admin, message.message_id).is_err());
        let room = db.delete_chat_message(&owner, message.message_id).unwrap();
        assert_eq!(room, Room::Project(project.id));
        assert!(db.get_chat_message(message.message_id).unwrap().is_none());
    }
}
