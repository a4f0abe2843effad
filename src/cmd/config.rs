//! Configuration view and validation: `campus-market config`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use campus_market::config::{AppConfig, DEFAULT_CONFIG_FILE};

use super::super::ConfigCommands;

/// Hide secrets before printing.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut shown = config.clone();
    if shown.admin_password.is_some() {
        shown.admin_password = Some("********".to_string());
    }
    shown
}

pub fn cmd_config(config: &AppConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let rendered = toml::to_string_pretty(&redacted(config))
                .context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let errors = config.validate();
            if errors.is_empty() {
                println!("Configuration is valid.");
            } else {
                for error in &errors {
                    println!("  - {}", error);
                }
                bail!("{} configuration problem(s) found", errors.len());
            }
        }
        Some(ConfigCommands::Init) => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            let rendered = toml::to_string_pretty(&AppConfig::default())
                .context("Failed to render default configuration")?;
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
