use anyhow::{Context, Result};
use tracing::info;

use super::MarketDb;

/// Tables in dependency order; `reset_schema` drops them in reverse.
const TABLES: &[&str] = &[
    "users",
    "sessions",
    "projects",
    "teams",
    "team_members",
    "instructor_requests",
    "jobs",
    "job_applications",
    "chat_messages",
    "admin_messages",
];

impl MarketDb {
    pub(super) fn create_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT,
                    email TEXT NOT NULL UNIQUE,
                    password TEXT NOT NULL,
                    role INTEGER NOT NULL,
                    permission INTEGER NOT NULL DEFAULT 0,
                    bio TEXT,
                    instructor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    graduation TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL,
                    status INTEGER NOT NULL DEFAULT 0,
                    project_link TEXT,
                    github_link TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS teams (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS team_members (
                    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (team_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS instructor_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    instructor_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    status INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    link TEXT,
                    status INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS job_applications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    message TEXT NOT NULL DEFAULT '',
                    status INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(job_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS chat_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER REFERENCES projects(id) ON DELETE CASCADE,
                    application_id INTEGER REFERENCES job_applications(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    message_text TEXT NOT NULL,
                    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                    CHECK ((project_id IS NULL) <> (application_id IS NULL))
                );

                CREATE TABLE IF NOT EXISTS admin_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    message TEXT NOT NULL,
                    timestamp TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_projects_user ON projects(user_id);
                CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);
                CREATE INDEX IF NOT EXISTS idx_teams_project ON teams(project_id);
                CREATE INDEX IF NOT EXISTS idx_requests_student
                    ON instructor_requests(student_id, status);
                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
                CREATE INDEX IF NOT EXISTS idx_applications_job ON job_applications(job_id);
                CREATE INDEX IF NOT EXISTS idx_chat_project ON chat_messages(project_id, timestamp);
                CREATE INDEX IF NOT EXISTS idx_chat_application
                    ON chat_messages(application_id, timestamp);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Drop every table and recreate the empty schema.
    pub fn reset_schema(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .context("Failed to disable foreign keys")?;
        for table in TABLES.iter().rev() {
            self.conn
                .execute(&format!("DROP TABLE IF EXISTS {}", table), [])
                .with_context(|| format!("Failed to drop table {}", table))?;
        }
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to re-enable foreign keys")?;
        self.create_schema()?;
        info!("Database schema reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use crate::market::models::Role;

    fn table_names(db: &MarketDb) -> Vec<String> {
        let mut stmt = db
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn test_creates_every_table() {
        let db = test_support::db();
        let names = table_names(&db);
        for table in TABLES {
            assert!(names.iter().any(|n| n == table), "missing table {}", table);
        }
    }

    #[test]
    fn test_schema_creation_is_idempotent() {
        let db = test_support::db();
        db.create_schema().unwrap();
        db.create_schema().unwrap();
    }

    #[test]
    fn test_reset_drops_rows() {
        let db = test_support::db();
        test_support::user(&db, "a@a.com", Role::Student);
        db.reset_schema().unwrap();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_chat_message_needs_exactly_one_room() {
        let db = test_support::db();
        let user = test_support::user(&db, "a@a.com", Role::Student);
        let result = db.conn.execute(
            "INSERT INTO chat_messages (user_id, message_text) VALUES (?1, 'hi')",
            [user.id],
        );
        assert!(result.is_err());
    }
}
