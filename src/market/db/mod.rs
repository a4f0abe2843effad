//! SQLite access for the marketplace.
//!
//! `MarketDb` owns a single `rusqlite::Connection`; query methods are split
//! across submodules by table family. Async code reaches it through
//! [`DbHandle`], which serializes access and runs each closure on tokio's
//! blocking pool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::errors::MarketError;
use crate::market::models::{Role, User};

mod admin;
mod chat;
mod jobs;
mod projects;
mod requests;
mod schema;
mod seed;
mod teams;
mod users;

pub use seed::SEED_PASSWORD;

/// Async-safe handle to the marketplace database.
///
/// Wraps `MarketDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<MarketDb>>,
}

impl DbHandle {
    pub fn new(db: MarketDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&MarketDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| MarketError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously for test setup.
    #[cfg(test)]
    pub(crate) fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, MarketDb>> {
        self.inner
            .lock()
            .map_err(|_| MarketError::LockPoisoned.into())
    }
}

pub struct MarketDb {
    conn: Connection,
}

impl MarketDb {
    /// Open (or create) a SQLite database at the given path and create the schema.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open the database, retrying up to `attempts` times with `delay` between tries.
    pub async fn open_with_retry(path: &Path, attempts: u32, delay: Duration) -> Result<Self> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            let owned = path.to_path_buf();
            let result = tokio::task::spawn_blocking(move || Self::new(&owned))
                .await
                .context("DB open task panicked")?;
            match result {
                Ok(db) => {
                    info!(path = %path.display(), attempt, "Connected to database");
                    return Ok(db);
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        attempts,
                        error = %e,
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Giving up on database after {} attempts", attempts)
                    });
                }
            }
        }
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.create_schema().context("Failed to create schema")?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// `LIKE` pattern for an optional substring search. Blank input means no filter.
pub(crate) fn like_pattern(q: Option<&str>) -> Option<String> {
    q.map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q))
}

/// Reject blank required text fields.
pub(crate) fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, MarketError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(MarketError::bad_request(format!("{} is required", what)))
    } else {
        Ok(trimmed)
    }
}

/// Fail with `Forbidden(msg)` unless the user holds one of `roles`.
pub(crate) fn ensure_role(user: &User, roles: &[Role], msg: &str) -> Result<(), MarketError> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        Err(MarketError::forbidden(msg))
    }
}

/// Blank optional text becomes `None`.
pub(crate) fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
