use std::path::PathBuf;

use anyhow::Result;
use campus_market::config::{AppConfig, LogFormat};
use campus_market::logging;
use clap::{Parser, Subcommand};

mod cmd;

#[derive(Parser)]
#[command(name = "campus-market")]
#[command(version, about = "Project and job marketplace for students, instructors and businesses")]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./marketplace.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file. Overrides config and DB_URL.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log output format: pretty, json
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Reset and re-seed the database on startup
        #[arg(long)]
        debug: bool,

        /// Enable dev mode (CORS permissive for a separately served frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database schema and exit
    InitDb,
    /// Drop all data and load the demo fixtures
    Seed,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and list any problems
    Validate,
    /// Write a default marketplace.toml
    Init,
}

impl Cli {
    /// Apply command-line overrides, the last configuration layer.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(db) = &self.db {
            config.database_path = db.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Commands::Serve {
            host,
            port,
            debug,
            dev,
        } = &self.command
        {
            if let Some(host) = host {
                config.host = host.clone();
            }
            if let Some(port) = port {
                config.port = *port;
            }
            config.debug |= *debug;
            config.dev_mode |= *dev;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&config, command.clone());
    }

    config.ensure_valid()?;
    let _log_guard = logging::init(config.log_format, config.log_dir.as_deref())?;

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(&config).await?,
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::Seed => cmd::cmd_seed(&config)?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
