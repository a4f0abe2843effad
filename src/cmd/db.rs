//! Database maintenance commands: `init-db` and `seed`.

use anyhow::{Context, Result};
use campus_market::config::AppConfig;
use campus_market::market::db::{MarketDb, SEED_PASSWORD};
use campus_market::market::password::Hasher;
use tracing::info;

fn open(config: &AppConfig) -> Result<MarketDb> {
    let path = &config.database_path;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    MarketDb::new(path)
}

pub fn cmd_init_db(config: &AppConfig) -> Result<()> {
    open(config)?;
    println!("Database initialized at {}", config.database_path.display());
    Ok(())
}

/// Drop everything and load fixture data.
pub fn cmd_seed(config: &AppConfig) -> Result<()> {
    let db = open(config)?;
    let hasher = Hasher::new(config.argon2_memory_kib, config.argon2_iterations)?;
    db.reset_schema()?;
    db.seed(&hasher).context("Failed to seed database")?;
    info!(path = %config.database_path.display(), "Database seeded");
    println!(
        "Seeded {} (all accounts use password \"{}\")",
        config.database_path.display(),
        SEED_PASSWORD
    );
    Ok(())
}
