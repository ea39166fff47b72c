//! HTTP server command: `tend serve`.

use anyhow::Result;

use tend::config::TendConfig;
use tend::server::{AppState, ServerConfig, start_server};

use super::session::open_engine;

pub async fn cmd_serve(config: &TendConfig, port: Option<u16>, dev: bool) -> Result<()> {
    let engine = open_engine(config)?;
    let server = &config.toml.server;

    // Dev mode listens on all interfaces for containerised frontends.
    let host = if dev {
        "0.0.0.0".to_string()
    } else {
        server.host.clone()
    };

    start_server(
        ServerConfig {
            host,
            port: port.unwrap_or(server.port),
            dev_mode: dev,
        },
        AppState::new(engine),
    )
    .await
}
