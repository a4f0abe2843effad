//! HTTP server command: `campus-market serve`.

use anyhow::Result;
use campus_market::config::AppConfig;

pub async fn cmd_serve(config: &AppConfig) -> Result<()> {
    campus_market::market::server::start_server(config).await
}
