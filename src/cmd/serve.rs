//! Server lifecycle commands (`testboard serve` and `testboard init-db`).

use anyhow::Result;

use testboard::config::AppConfig;
use testboard::dashboard::server::{open_database, start_server};

pub async fn cmd_serve(
    mut config: AppConfig,
    port: Option<u16>,
    host: Option<String>,
    dev: bool,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if dev {
        config.server.dev_mode = true;
    }
    start_server(config).await
}

pub fn cmd_init_db(config: &AppConfig) -> Result<()> {
    open_database(&config.server.db_path)?;
    println!(
        "Report database initialized at {}",
        config.server.db_path.display()
    );
    Ok(())
}
