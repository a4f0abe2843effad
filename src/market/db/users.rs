use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use super::MarketDb;
use crate::errors::MarketError;
use crate::market::models::*;

pub(super) const USER_COLUMNS: &str =
    "u.id, u.name, u.email, u.role, u.permission, u.bio, u.instructor_id, u.graduation,
     u.created_at";

pub(super) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        permission: row.get(4)?,
        bio: row.get(5)?,
        instructor_id: row.get(6)?,
        graduation: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Reads `id, name, email, role` starting at `offset`.
pub(super) fn summary_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        email: row.get(offset + 2)?,
        role: row.get(offset + 3)?,
    })
}

impl MarketDb {
    // ── Users ────────────────────────────────────────────────────────

    pub fn create_user(
        &self,
        name: Option<&str>,
        email: &str,
        password_hash: &str,
        role: Role,
        instructor_id: Option<i64>,
    ) -> Result<User> {
        let email = email.trim();
        if self.email_exists(email)? {
            return Err(MarketError::conflict("An account with this email already exists").into());
        }
        self.conn
            .execute(
                "INSERT INTO users (name, email, password, role, permission, instructor_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    name.map(str::trim),
                    email,
                    password_hash,
                    role,
                    i64::from(role == Role::Business),
                    instructor_id
                ],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
                params![email.trim()],
                |row| row.get(0),
            )
            .context("Failed to check email")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users u WHERE u.id = ?1", USER_COLUMNS),
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn require_user(&self, id: i64) -> Result<User> {
        self.get_user(id)?
            .ok_or_else(|| MarketError::not_found("User", id).into())
    }

    /// Look up a user and their password hash for login.
    pub fn find_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {}, u.password FROM users u WHERE u.email = ?1",
                    USER_COLUMNS
                ),
                params![email.trim()],
                |row| Ok((user_from_row(row)?, row.get(9)?)),
            )
            .optional()
            .context("Failed to query credentials")
    }

    pub fn list_users_by_role(&self, role: Role) -> Result<Vec<UserSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, email, role FROM users WHERE role = ?1 ORDER BY id")
            .context("Failed to prepare list_users_by_role")?;
        let rows = stmt
            .query_map(params![role], |row| summary_at(row, 0))
            .context("Failed to query users")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read user row")
    }

    /// Create the configured admin account unless the email is already taken.
    /// Returns true when an account was created.
    pub fn ensure_admin(&self, email: &str, password_hash: &str) -> Result<bool> {
        if self.email_exists(email)? {
            return Ok(false);
        }
        self.create_user(Some("Administrator"), email, password_hash, Role::Admin, None)?;
        Ok(true)
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Create a session for `user_id` valid for `ttl_hours`; returns the token.
    pub fn create_session(&self, user_id: i64, ttl_hours: u32) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at)
                 VALUES (?1, ?2, datetime('now', ?3))",
                params![token, user_id, format!("+{} hours", ttl_hours)],
            )
            .context("Failed to insert session")?;
        Ok(token)
    }

    /// The user behind an unexpired session token.
    pub fn session_user(&self, token: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions s JOIN users u ON s.user_id = u.id
                     WHERE s.token = ?1 AND s.expires_at > datetime('now')",
                    USER_COLUMNS
                ),
                params![token],
                user_from_row,
            )
            .optional()
            .context("Failed to query session")
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= datetime('now')",
                [],
            )
            .context("Failed to purge sessions")
    }

    // ── Profile ──────────────────────────────────────────────────────

    pub fn get_profile(&self, user_id: i64) -> Result<Profile> {
        let user = self.require_user(user_id)?;

        let projects = self.list_projects_by_owner(user_id)?;
        let jobs = if user.role == Role::Business {
            self.list_jobs_by_owner(user_id, false)?
        } else {
            Vec::new()
        };
        let applications = if user.role.can_apply_to_jobs() {
            self.list_applications_by_user(user_id)?
        } else {
            Vec::new()
        };
        let team = self.team_of_user(user_id)?;
        let instructor = match user.instructor_id {
            Some(id) => self.get_user(id)?.map(|u| UserSummary {
                id: u.id,
                name: u.name,
                email: u.email,
                role: u.role,
            }),
            None => None,
        };
        let instructor_request = if user.role == Role::Student {
            self.latest_request_for_student(user_id)?
        } else {
            None
        };
        let instructors = self.list_users_by_role(Role::Instructor)?;

        Ok(Profile {
            user,
            projects,
            jobs,
            applications,
            team,
            instructor,
            instructor_request,
            instructors,
        })
    }
}
