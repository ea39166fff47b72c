//! MCP stdio command: `tend mcp`.

use anyhow::Result;

use tend::config::TendConfig;
use tend::mcp::McpServer;

use super::session::open_engine;

pub async fn cmd_mcp(config: &TendConfig) -> Result<()> {
    let engine = open_engine(config)?;
    McpServer::new(engine).run().await
}
