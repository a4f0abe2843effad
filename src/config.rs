//! Layered service configuration.
//!
//! Values are resolved in order: built-in defaults, then a TOML file
//! (`--config <path>`, or `marketplace.toml` in the working directory when
//! present), then environment variables, then command-line flags.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// File picked up automatically when no `--config` path is given.
pub const DEFAULT_CONFIG_FILE: &str = "marketplace.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => bail!("Invalid log format: '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    /// Reset and re-seed the database on every start.
    pub debug: bool,
    /// Permissive CORS for a separately served frontend.
    pub dev_mode: bool,
    pub session_ttl_hours: u32,
    pub db_connect_retries: u32,
    pub db_retry_delay_ms: u64,
    pub log_format: LogFormat,
    /// When set, logs are also written to daily files in this directory.
    pub log_dir: Option<PathBuf>,
    /// Password given to students created by an instructor.
    pub default_student_password: String,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            database_path: PathBuf::from("marketplace.db"),
            debug: false,
            dev_mode: false,
            session_ttl_hours: 168,
            db_connect_retries: 5,
            db_retry_delay_ms: 1000,
            log_format: LogFormat::Pretty,
            log_dir: None,
            default_student_password: "changeme".to_string(),
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            admin_email: None,
            admin_password: None,
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with the config file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Overlay values from environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DB_URL") {
            self.database_path = PathBuf::from(v.trim_start_matches("sqlite://"));
        }
        if let Some(v) = lookup("MARKET_HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("MARKET_PORT") {
            self.port = v
                .parse()
                .with_context(|| format!("MARKET_PORT must be a port number, got '{}'", v))?;
        }
        if let Some(v) = lookup("MARKET_DEBUG") {
            self.debug = parse_bool(&v)
                .with_context(|| format!("MARKET_DEBUG must be a boolean, got '{}'", v))?;
        }
        if let Some(v) = lookup("MARKET_LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        if let Some(v) = lookup("MARKET_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MARKET_SESSION_TTL_HOURS") {
            self.session_ttl_hours = v
                .parse()
                .with_context(|| {
                    format!("MARKET_SESSION_TTL_HOURS must be a number, got '{}'", v)
                })?;
        }
        if let Some(v) = lookup("MARKET_ADMIN_EMAIL") {
            self.admin_email = Some(v);
        }
        if let Some(v) = lookup("MARKET_ADMIN_PASSWORD") {
            self.admin_password = Some(v);
        }
        Ok(())
    }

    /// Return every problem with the configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.port == 0 {
            errors.push("port must be non-zero".to_string());
        }
        if self.database_path.as_os_str().is_empty() {
            errors.push("database_path must not be empty".to_string());
        }
        if self.session_ttl_hours == 0 {
            errors.push("session_ttl_hours must be at least 1".to_string());
        }
        if self.db_connect_retries == 0 {
            errors.push("db_connect_retries must be at least 1".to_string());
        }
        if self.default_student_password.is_empty() {
            errors.push("default_student_password must not be empty".to_string());
        }
        if self.admin_email.is_some() != self.admin_password.is_some() {
            errors.push("admin_email and admin_password must be set together".to_string());
        }
        errors
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if !errors.is_empty() {
            bail!("Invalid configuration: {}", errors.join("; "));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("not a boolean"),
    }
}
