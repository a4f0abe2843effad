use std::fmt::Display;

use anyhow::{Context, Result};
use rusqlite::types::FromSql;
use rusqlite::{Connection, Row, params};

use super::teams::release_project_if_unassigned;
use super::users::{USER_COLUMNS, user_from_row};
use super::{MarketDb, like_pattern, required};
use crate::errors::MarketError;
use crate::market::models::*;

fn admin_message_from_row(row: &Row<'_>) -> rusqlite::Result<AdminMessage> {
    Ok(AdminMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        message: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

/// Projects held by the teams `instructor_id` runs.
fn team_projects(conn: &Connection, instructor_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT project_id FROM teams
             WHERE user_id = ?1 AND project_id IS NOT NULL",
        )
        .context("Failed to prepare team_projects")?;
    let rows = stmt
        .query_map(params![instructor_id], |row| row.get(0))
        .context("Failed to query team projects")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read team project row")
}

impl MarketDb {
    /// Run a `SELECT value, COUNT(*) ... GROUP BY value` query. Every value
    /// in `all` appears in the result, zero when absent.
    pub(super) fn count_by<E>(&self, sql: &str, all: &[E]) -> Result<Counts>
    where
        E: FromSql + Display + Copy,
    {
        let mut counts = Counts::default();
        for value in all {
            counts.0.insert(value.to_string(), 0);
        }
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare count query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, E>(0)?, row.get::<_, i64>(1)?)))
            .context("Failed to run count query")?;
        for row in rows {
            let (value, count) = row.context("Failed to read count row")?;
            counts.0.insert(value.to_string(), count as u64);
        }
        Ok(counts)
    }

    // ── Users ────────────────────────────────────────────────────────

    /// Users in id order, filtered by name/email substring and role, with
    /// global role counts.
    pub fn list_users_admin(
        &self,
        paging: Paging,
        q: Option<&str>,
        role: Option<Role>,
    ) -> Result<CountedPage<User>> {
        let pattern = like_pattern(q);
        let filter = "(?1 IS NULL OR u.name LIKE ?1 OR u.email LIKE ?1)
             AND (?2 IS NULL OR u.role = ?2)";
        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM users u WHERE {}", filter),
                params![pattern, role],
                |row| row.get(0),
            )
            .context("Failed to count users")?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM users u WHERE {} ORDER BY u.id ASC LIMIT ?3 OFFSET ?4",
                USER_COLUMNS, filter
            ))
            .context("Failed to prepare list_users_admin")?;
        let items = stmt
            .query_map(
                params![pattern, role, paging.per_page, paging.offset()],
                user_from_row,
            )
            .context("Failed to query users")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read user row")?;

        Ok(CountedPage {
            page: paging.wrap(items, total as u64),
            counts: self.user_role_counts()?,
        })
    }

    pub fn user_role_counts(&self) -> Result<Counts> {
        self.count_by("SELECT role, COUNT(*) FROM users GROUP BY role", Role::ALL)
    }

    /// Change a user's role. Anyone leaving the student role drops out of
    /// their team; an instructor losing the role takes their teams along and
    /// frees any project left without a team.
    pub fn update_user_role(&self, id: i64, role: Role) -> Result<User> {
        let current = self.require_user(id)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE users SET role = ?1, permission = ?2 WHERE id = ?3",
            params![role, i64::from(role == Role::Business), id],
        )
        .context("Failed to update user role")?;
        if role != Role::Student {
            tx.execute("DELETE FROM team_members WHERE user_id = ?1", params![id])
                .context("Failed to clear team membership")?;
        }
        if current.role == Role::Instructor && role != Role::Instructor {
            let projects = team_projects(&tx, id)?;
            tx.execute("DELETE FROM teams WHERE user_id = ?1", params![id])
                .context("Failed to delete instructor teams")?;
            for project_id in projects {
                release_project_if_unassigned(&tx, project_id)?;
            }
        }
        tx.commit().context("Failed to commit role change")?;
        self.require_user(id)
    }

    /// Admins cannot delete their own account. Teams owned by the user go
    /// with it, so their projects are released in the same transaction.
    pub fn admin_delete_user(&self, admin: &User, id: i64) -> Result<()> {
        if admin.id == id {
            return Err(MarketError::bad_request("You cannot delete your own account").into());
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let projects = team_projects(&tx, id)?;
        let count = tx
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .context("Failed to delete user")?;
        if count == 0 {
            return Err(MarketError::not_found("User", id).into());
        }
        for project_id in projects {
            release_project_if_unassigned(&tx, project_id)?;
        }
        tx.commit().context("Failed to commit user deletion")?;
        Ok(())
    }

    // ── Admin messages ───────────────────────────────────────────────

    pub fn send_admin_message(&self, sender: &User, message: &str) -> Result<AdminMessage> {
        let message = required(message, "Message")?;
        self.conn
            .execute(
                "INSERT INTO admin_messages (user_id, message) VALUES (?1, ?2)",
                params![sender.id, message],
            )
            .context("Failed to insert admin message")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT m.id, m.user_id, u.email, m.message, m.timestamp
                 FROM admin_messages m LEFT JOIN users u ON m.user_id = u.id
                 WHERE m.id = ?1",
                params![id],
                admin_message_from_row,
            )
            .context("Failed to read admin message")
    }

    /// Newest first.
    pub fn list_admin_messages(&self) -> Result<Vec<AdminMessage>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.id, m.user_id, u.email, m.message, m.timestamp
                 FROM admin_messages m LEFT JOIN users u ON m.user_id = u.id
                 ORDER BY m.timestamp DESC, m.id DESC",
            )
            .context("Failed to prepare list_admin_messages")?;
        let rows = stmt
            .query_map([], admin_message_from_row)
            .context("Failed to query admin messages")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read admin message row")
    }

    pub fn delete_admin_message(&self, id: i64) -> Result<()> {
        let count = self
            .conn
            .execute("DELETE FROM admin_messages WHERE id = ?1", params![id])
            .context("Failed to delete admin message")?;
        if count == 0 {
            return Err(MarketError::not_found("Admin message", id).into());
        }
        Ok(())
    }

    // ── Dashboard ────────────────────────────────────────────────────

    pub fn admin_stats(&self) -> Result<AdminStats> {
        let admin_messages: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM admin_messages", [], |row| row.get(0))
            .context("Failed to count admin messages")?;
        Ok(AdminStats {
            users_by_role: self.user_role_counts()?,
            projects_by_status: self.project_status_counts()?,
            jobs_by_status: self.job_status_counts()?,
            pending_requests: self.count_pending_requests()?,
            admin_messages: admin_messages as u64,
        })
    }
}
