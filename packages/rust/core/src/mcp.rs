//! MCP server over stdio: newline-delimited JSON-RPC 2.0.
//!
//! Exposes four tools backed by [`Service`]:
//!
//! ```json
//! {"jsonrpc":"2.0","method":"tools/call","params":{"name":"list_reports","arguments":{}},"id":3}
//! ```
//!
//! Tool failures are returned as results with `isError: true`; protocol
//! problems (bad JSON, unknown method) are JSON-RPC errors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use swr_shared::{Result, SwrError};

use crate::pipeline::StageRunner;
use crate::service::{DEFAULT_LOG_LINES, RunRequest, Service, render_report_list};

const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const SERVER_NAME: &str = "stock-weekly-report";

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Incoming request or notification (no `id`).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// Outgoing response: exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct GetReportArgs {
    #[serde(default)]
    folder: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GetLogsArgs {
    #[serde(default)]
    lines: Option<usize>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct McpServer<R: StageRunner + 'static> {
    service: Arc<Service<R>>,
}

impl<R: StageRunner + 'static> McpServer<R> {
    pub fn new(service: Service<R>) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Serve on the process's stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve one request per line until `reader` reaches EOF.
    pub async fn serve<Rd, W>(&self, reader: Rd, mut writer: W) -> Result<()>
    where
        Rd: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = SERVER_NAME, "MCP server listening on stdio");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.map_err(stdio_error)? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut out = serde_json::to_string(&response)
                    .map_err(|e| SwrError::config(format!("failed to encode response: {e}")))?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await.map_err(stdio_error)?;
                writer.flush().await.map_err(stdio_error)?;
            }
        }
        info!("stdin closed; MCP server exiting");
        Ok(())
    }

    /// Handle one raw line. Notifications produce no response.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable request");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("parse error: {e}"),
                ));
            }
        };

        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "notification");
            return None;
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            ));
        }

        debug!(method = %request.method, "request");
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tool_definitions() })),
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        };
        Some(response)
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let call: ToolCall = match params.map(serde_json::from_value::<ToolCall>).transpose() {
            Ok(Some(call)) => call,
            Ok(None) => return JsonRpcResponse::failure(id, INVALID_PARAMS, "missing params"),
            Err(e) => return JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
        };
        let args = call.arguments.unwrap_or_else(|| json!({}));
        info!(tool = %call.name, "tool call");

        let outcome = match call.name.as_str() {
            "run_pipeline" => match serde_json::from_value::<RunRequest>(args) {
                Ok(request) => self.run_pipeline(request).await,
                Err(e) => return JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
            },
            "list_reports" => self.service.list_reports().map(|l| render_report_list(&l)),
            "get_report" => match serde_json::from_value::<GetReportArgs>(args) {
                Ok(a) => self.service.get_report(a.folder.as_deref()),
                Err(e) => return JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
            },
            "get_logs" => match serde_json::from_value::<GetLogsArgs>(args) {
                Ok(a) => self.service.get_logs(a.lines.unwrap_or(DEFAULT_LOG_LINES)),
                Err(e) => return JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
            },
            other => {
                return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("unknown tool: {other}"));
            }
        };

        let (text, is_error) = match outcome {
            Ok(text) => (text, false),
            Err(e) => (e.to_string(), true),
        };
        JsonRpcResponse::success(
            id,
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": is_error,
            }),
        )
    }

    async fn run_pipeline(&self, request: RunRequest) -> Result<String> {
        let service = Arc::clone(&self.service);
        let joined = tokio::task::spawn_blocking(move || service.run_pipeline(&request)).await;
        match joined {
            Ok(Ok(result)) => Ok(result.summary()),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(SwrError::stage("pipeline", format!("run aborted: {e}"))),
        }
    }
}

fn stdio_error(e: std::io::Error) -> SwrError {
    SwrError::io("<stdio>", e)
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": "run_pipeline",
            "description": "Run the stock weekly report pipeline and return the stage summary.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "stages": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["fetch", "transcribe", "upload", "email", "cleanup"] },
                        "description": "Stages to run. Omit to run all stages."
                    },
                    "folder": { "type": "string", "description": "Run folder, e.g. 20260218-20260225." },
                    "notebook_id": { "type": "string", "description": "Reuse an existing notebook (skips upload)." },
                    "send_email": { "type": "boolean", "description": "false saves the report without mailing it.", "default": true }
                }
            }
        },
        {
            "name": "list_reports",
            "description": "List report folders, newest first.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "get_report",
            "description": "Read a weekly report. Defaults to the newest.",
            "inputSchema": {
                "type": "object",
                "properties": { "folder": { "type": "string" } }
            }
        },
        {
            "name": "get_logs",
            "description": "Tail the scheduled pipeline log.",
            "inputSchema": {
                "type": "object",
                "properties": { "lines": { "type": "integer", "minimum": 1, "default": DEFAULT_LOG_LINES } }
            }
        }
    ])
}
