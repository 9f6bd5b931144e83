//! Upstream bridge — serves the tool protocol to the MCP client over
//! stdio.
//!
//! Reads line-delimited JSON-RPC requests from stdin and writes responses
//! to stdout. Logging goes exclusively to stderr; stdout carries nothing
//! but protocol frames. EOF on stdin ends the loop, which the binary
//! treats as a shutdown request.

use std::io::Write;
use std::sync::Arc;

use kustomux_core::KustomuxResult;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::merge::ToolMerger;
use crate::protocol::{
    IncomingRequest, InitializeResult, JsonRpcError, OutgoingResponse, ServerCapabilities,
    ServerInfo, ToolsListResult,
};
use crate::router::DispatchRouter;

/// Protocol version advertised to the upstream client.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// The upstream-facing MCP server.
pub struct RouterBridge {
    merger: Arc<ToolMerger>,
    router: DispatchRouter,
}

impl RouterBridge {
    pub fn new(merger: Arc<ToolMerger>, router: DispatchRouter) -> Self {
        Self { merger, router }
    }

    /// Serve requests until stdin closes.
    pub async fn run(&self) -> KustomuxResult<()> {
        let stdin = tokio::io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();

        info!("upstream bridge serving on stdio");

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: IncomingRequest = match serde_json::from_str(trimmed) {
                Ok(req) => req,
                Err(e) => {
                    error!(error = %e, "failed to parse JSON-RPC request");
                    let response = OutgoingResponse::error(
                        Value::Null,
                        JsonRpcError::new(JsonRpcError::PARSE_ERROR, e.to_string()),
                    );
                    write_response(&mut stdout, &response)?;
                    continue;
                }
            };

            if request.jsonrpc != "2.0" {
                error!(got = %request.jsonrpc, method = %request.method, "invalid JSON-RPC version");
                let response = OutgoingResponse::error(
                    request.id.clone().unwrap_or(Value::Null),
                    JsonRpcError::new(JsonRpcError::INVALID_REQUEST, "invalid JSON-RPC version"),
                );
                write_response(&mut stdout, &response)?;
                continue;
            }

            let method = request.method.clone();
            let start = std::time::Instant::now();
            let response = self.handle_request(request).await;
            let elapsed_ms = start.elapsed().as_millis();

            match response {
                Some(response) => {
                    if response.error.is_some() {
                        warn!(method = %method, elapsed_ms, "request completed with error");
                    } else {
                        debug!(method = %method, elapsed_ms, "request completed");
                    }
                    write_response(&mut stdout, &response)?;
                }
                None => {
                    debug!(method = %method, "notification handled");
                }
            }
        }

        info!("stdin closed; upstream bridge shutting down");
        Ok(())
    }

    async fn handle_request(&self, request: IncomingRequest) -> Option<OutgoingResponse> {
        let is_notification = request.is_notification();
        let id = request.id.clone().unwrap_or(Value::Null);

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "initialized" | "notifications/initialized" => Ok(json!({})),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(request.params.as_ref()).await,
            other => Err(JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("method '{other}' not found"),
            )),
        };

        if is_notification {
            if let Err(e) = result {
                warn!(method = %request.method, error = %e.message, "notification handling failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => OutgoingResponse::success(id, value),
            Err(e) => OutgoingResponse::error(id, e),
        })
    }

    fn handle_initialize(&self) -> Result<Value, JsonRpcError> {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                resources: None,
                prompts: None,
            },
            server_info: Some(ServerInfo {
                name: "kustomux".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
        };
        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
    }

    async fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let table = self.merger.snapshot().await;
        let result = ToolsListResult {
            tools: table.tools.clone(),
        };
        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| {
            JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "missing params")
        })?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "missing 'name' parameter")
            })?;
        let args = params
            .get("arguments")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        debug!(tool = %name, "dispatching tool call");
        let result = self.router.dispatch(name, args).await;

        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
    }
}

fn write_response(out: &mut impl Write, response: &OutgoingResponse) -> KustomuxResult<()> {
    let json = serde_json::to_string(response)?;
    writeln!(out, "{json}")?;
    out.flush()?;
    Ok(())
}
