//! MCP stdio server exposing the workflow as a single tool.
//!
//! Protocol: newline-delimited JSON-RPC 2.0 on stdin/stdout. Logging goes
//! to stderr; stdout carries protocol messages only.
//!
//! The `create_cbt_exercise` tool runs a fresh thread autonomously, passing
//! the human gate, and answers with the final exercise as markdown. The
//! thread is checkpointed and recorded in history like any other.

use anyhow::Result;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::engine::{GraphEngine, RunOutcome};

pub const TOOL_NAME: &str = "create_cbt_exercise";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;

pub struct McpServer {
    engine: GraphEngine,
}

impl McpServer {
    pub fn new(engine: GraphEngine) -> Self {
        Self { engine }
    }

    /// Serve on the process's stdin/stdout until stdin closes.
    pub async fn run(&self) -> Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve requests read from `reader`, one response line per request.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("mcp stdio server started");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_message(line).await {
                writer.write_all(response.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        info!("mcp stdio server stopped");
        Ok(())
    }

    /// Answer one JSON-RPC message. Notifications get no response.
    pub async fn handle_message(&self, line: &str) -> Option<String> {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return Some(error_response(
                    Value::Null,
                    PARSE_ERROR,
                    &format!("Parse error: {}", e),
                ));
            }
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let Some(id) = request.get("id").cloned() else {
            if !method.starts_with("notifications/") {
                warn!(method, "ignoring request without id");
            }
            return None;
        };
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

        let response = match method {
            "initialize" => success_response(id, initialize_result()),
            "tools/list" => success_response(id, json!({ "tools": [tool_definition()] })),
            "tools/call" => self.handle_tools_call(id, &params).await,
            "ping" => success_response(id, json!({})),
            _ => error_response(
                id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", method),
            ),
        };
        Some(response)
    }

    async fn handle_tools_call(&self, id: Value, params: &Value) -> String {
        let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let result = match tool_name {
            TOOL_NAME => self.create_exercise(&arguments).await,
            _ => Err(format!("Unknown tool: {}", tool_name)),
        };

        let (text, is_error) = match result {
            Ok(text) => (text, false),
            Err(text) => (text, true),
        };
        success_response(
            id,
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": is_error
            }),
        )
    }

    async fn create_exercise(&self, args: &Value) -> Result<String, String> {
        let intent = args
            .get("intent")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("Intent is required")?;

        let thread_id = self.engine.start(intent).await.map_err(|e| e.to_string())?;
        info!(thread_id = %thread_id, "mcp tool run started");

        let outcome = self
            .engine
            .run_to_completion(&thread_id)
            .await
            .map_err(|e| format!("Error executing agent: {}", e))?;

        match outcome {
            RunOutcome::Finished(cp) => match cp.snapshot.current_draft {
                Some(draft) => Ok(draft.to_markdown()),
                None => Err("Failed to generate a valid CBT exercise.".to_string()),
            },
            RunOutcome::Failed { message, .. } => {
                Err(format!("Error executing agent: {}", message))
            }
            RunOutcome::Interrupted { next, .. } => Err(format!(
                "Thread {} paused before {} unexpectedly",
                thread_id, next
            )),
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "tend",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn tool_definition() -> Value {
    json!({
        "name": TOOL_NAME,
        "description": "Create a comprehensive Cognitive Behavioral Therapy (CBT) exercise based on a user intent. The draft is reviewed for safety and clinical quality before it is returned.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "intent": {
                    "type": "string",
                    "description": "The user's request or intent for the exercise (e.g., 'Exposure hierarchy for agoraphobia')"
                }
            },
            "required": ["intent"]
        }
    })
}

fn success_response(id: Value, result: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
    .to_string()
}

fn error_response(id: Value, code: i32, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
    .to_string()
}
