use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{MarketDb, ensure_role};
use crate::errors::MarketError;
use crate::market::models::*;

const REQUEST_SELECT: &str = "SELECT r.id, r.student_id, r.instructor_id, r.status,
     u.email, u.name, r.created_at
     FROM instructor_requests r JOIN users u ON r.student_id = u.id";

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<InstructorRequest> {
    Ok(InstructorRequest {
        id: row.get(0)?,
        student_id: row.get(1)?,
        instructor_id: row.get(2)?,
        status: row.get(3)?,
        student_email: row.get(4)?,
        student_name: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl MarketDb {
    fn get_request(&self, id: i64) -> Result<Option<InstructorRequest>> {
        self.conn
            .query_row(
                &format!("{} WHERE r.id = ?1", REQUEST_SELECT),
                params![id],
                request_from_row,
            )
            .optional()
            .context("Failed to query instructor request")
    }

    /// A student asks an instructor to take them on.
    pub fn send_instructor_request(
        &self,
        student: &User,
        instructor_id: i64,
    ) -> Result<InstructorRequest> {
        ensure_role(student, &[Role::Student], "Only students can send instructor requests")?;
        // Re-read: the session copy may predate an accepted request.
        let student = self.require_user(student.id)?;
        if student.instructor_id.is_some() {
            return Err(MarketError::conflict("You already have an instructor").into());
        }
        let target = self
            .get_user(instructor_id)?
            .filter(|u| u.role == Role::Instructor)
            .ok_or_else(|| MarketError::not_found("Instructor", instructor_id))?;
        if self.pending_request_of(student.id)?.is_some() {
            return Err(MarketError::conflict("You already have a pending request").into());
        }

        self.conn
            .execute(
                "INSERT INTO instructor_requests (student_id, instructor_id, status)
                 VALUES (?1, ?2, ?3)",
                params![student.id, target.id, RequestStatus::Pending],
            )
            .context("Failed to insert instructor request")?;
        let id = self.conn.last_insert_rowid();
        self.get_request(id)?
            .context("Instructor request not found after insert")
    }

    fn pending_request_of(&self, student_id: i64) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM instructor_requests WHERE student_id = ?1 AND status = ?2",
                params![student_id, RequestStatus::Pending],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query pending request")
    }

    pub fn cancel_instructor_request(&self, student: &User) -> Result<()> {
        ensure_role(student, &[Role::Student], "Only students can cancel instructor requests")?;
        let count = self
            .conn
            .execute(
                "DELETE FROM instructor_requests WHERE student_id = ?1 AND status = ?2",
                params![student.id, RequestStatus::Pending],
            )
            .context("Failed to cancel instructor request")?;
        if count == 0 {
            return Err(MarketError::not_found("Pending request for student", student.id).into());
        }
        Ok(())
    }

    /// Accept or deny a request addressed to `instructor`. Denied requests
    /// can still be accepted later.
    pub fn handle_instructor_request(
        &self,
        instructor: &User,
        request_id: i64,
        accept: bool,
    ) -> Result<InstructorRequest> {
        ensure_role(instructor, &[Role::Instructor], "Only instructors can handle requests")?;
        let request = self
            .get_request(request_id)?
            .filter(|r| r.instructor_id == instructor.id)
            .ok_or_else(|| MarketError::not_found("Request", request_id))?;
        if request.status == RequestStatus::Accepted {
            return Err(MarketError::conflict("Request has already been accepted").into());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if accept {
            tx.execute(
                "UPDATE users SET instructor_id = ?1 WHERE id = ?2",
                params![instructor.id, request.student_id],
            )
            .context("Failed to link student to instructor")?;
            tx.execute(
                "UPDATE instructor_requests SET status = ?1 WHERE id = ?2",
                params![RequestStatus::Accepted, request_id],
            )
            .context("Failed to accept request")?;
        } else {
            tx.execute(
                "UPDATE instructor_requests SET status = ?1 WHERE id = ?2",
                params![RequestStatus::Denied, request_id],
            )
            .context("Failed to deny request")?;
        }
        tx.commit().context("Failed to commit request handling")?;

        self.get_request(request_id)?
            .context("Instructor request vanished after update")
    }

    pub fn dismiss_denied_request(&self, instructor: &User, request_id: i64) -> Result<()> {
        ensure_role(instructor, &[Role::Instructor], "Only instructors can dismiss requests")?;
        let count = self
            .conn
            .execute(
                "DELETE FROM instructor_requests
                 WHERE id = ?1 AND instructor_id = ?2 AND status = ?3",
                params![request_id, instructor.id, RequestStatus::Denied],
            )
            .context("Failed to dismiss request")?;
        if count == 0 {
            return Err(MarketError::not_found("Denied request", request_id).into());
        }
        Ok(())
    }

    pub fn latest_request_for_student(&self, student_id: i64) -> Result<Option<InstructorRequest>> {
        self.conn
            .query_row(
                &format!(
                    "{} WHERE r.student_id = ?1 ORDER BY r.id DESC LIMIT 1",
                    REQUEST_SELECT
                ),
                params![student_id],
                request_from_row,
            )
            .optional()
            .context("Failed to query latest request")
    }

    pub fn requests_for_instructor(
        &self,
        instructor_id: i64,
        status: RequestStatus,
    ) -> Result<Vec<InstructorRequest>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE r.instructor_id = ?1 AND r.status = ?2 ORDER BY r.id",
                REQUEST_SELECT
            ))
            .context("Failed to prepare requests_for_instructor")?;
        let rows = stmt
            .query_map(params![instructor_id, status], request_from_row)
            .context("Failed to query requests")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read request row")
    }

    pub fn count_pending_requests(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM instructor_requests WHERE status = ?1",
                params![RequestStatus::Pending],
                |row| row.get(0),
            )
            .context("Failed to count pending requests")?;
        Ok(count as u64)
    }
}
