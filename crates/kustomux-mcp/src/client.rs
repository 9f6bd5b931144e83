//! MCP client — spawns a downstream server subprocess and exchanges
//! JSON-RPC 2.0 messages over its stdio.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kustomux_core::{KustomuxError, KustomuxResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::protocol::*;

/// Deadline for handshake and tool-call requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// MCP client bound to one downstream child process.
pub struct McpClient {
    stdin: Arc<Mutex<tokio::process::ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader_task: JoinHandle<()>,
    endpoint: String,
}

impl McpClient {
    /// Spawn the downstream command and perform the initialization
    /// handshake, returning the client, the child process handle, and the
    /// tools the server reported.
    ///
    /// `env_sets` are applied on top of the inherited environment;
    /// `env_removes` are scrubbed from it.
    pub async fn connect(
        program: &str,
        args: &[String],
        env_sets: &[(String, String)],
        env_removes: &[&str],
        endpoint: &str,
    ) -> KustomuxResult<(Self, Child, Vec<McpToolDef>)> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());

        for (key, val) in env_sets {
            cmd.env(key, val);
        }
        for key in env_removes {
            cmd.env_remove(key);
        }

        let mut child = cmd.spawn().map_err(|e| {
            KustomuxError::Connect(format!(
                "failed to spawn '{program}' for endpoint '{endpoint}': {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| KustomuxError::Connect("child stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KustomuxError::Connect("child stdout not available".into()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Reader task: route responses to their waiting callers. When the
        // child's stdout closes, drop every pending sender so in-flight
        // requests fail immediately instead of running out their deadlines.
        let pending_clone = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("downstream stdout closed");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(resp) => {
                                if let Some(id) = resp.id {
                                    let mut map = pending_clone.lock().await;
                                    if let Some(tx) = map.remove(&id) {
                                        let _ = tx.send(resp);
                                    }
                                }
                                // Notifications (no id) are ignored.
                            }
                            Err(e) => {
                                debug!(line = %trimmed, error = %e, "non-JSON-RPC line from downstream");
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "error reading downstream stdout");
                        break;
                    }
                }
            }
            pending_clone.lock().await.clear();
        });

        let client = Self {
            stdin: Arc::new(Mutex::new(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            reader_task,
            endpoint: endpoint.to_string(),
        };

        let init_result = client.initialize().await?;
        info!(
            endpoint = %client.endpoint,
            version = %init_result.protocol_version,
            "downstream server initialized"
        );

        client.notify("notifications/initialized", None).await?;

        let tools = client.list_tools().await?;
        info!(
            endpoint = %client.endpoint,
            tools = tools.len(),
            "downstream tools discovered"
        );

        Ok((client, child, tools))
    }

    /// Send a JSON-RPC request and wait for the response.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> KustomuxResult<JsonRpcResponse> {
        self.request_with_timeout(method, params, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Send a JSON-RPC request and wait for the response, bounded by the
    /// given deadline.
    async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Duration,
    ) -> KustomuxResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }

        let msg = serde_json::to_string(&req)?;

        let write_result = async {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(msg.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = write_result {
            self.pending.lock().await.remove(&id);
            return Err(KustomuxError::Transport(format!(
                "failed to write request '{method}' to '{}': {e}",
                self.endpoint
            )));
        }

        let resp = match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(KustomuxError::Transport(format!(
                    "downstream '{}' closed before answering '{method}'",
                    self.endpoint
                )));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(KustomuxError::Transport(format!(
                    "request '{method}' to '{}' timed out after {}s",
                    self.endpoint,
                    deadline.as_secs()
                )));
            }
        };

        if let Some(err) = &resp.error {
            return Err(KustomuxError::Protocol(format!(
                "downstream error {}: {}",
                err.code, err.message
            )));
        }

        Ok(resp)
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> KustomuxResult<()> {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or(serde_json::json!({})),
        });
        let serialized = serde_json::to_string(&msg)?;

        let mut stdin = self.stdin.lock().await;
        let write = async {
            stdin.write_all(serialized.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        write.map_err(|e| {
            KustomuxError::Transport(format!(
                "failed to write notification to '{}': {e}",
                self.endpoint
            ))
        })
    }

    /// Perform the MCP initialize handshake.
    async fn initialize(&self) -> KustomuxResult<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "kustomux",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| KustomuxError::Protocol("empty initialize result".into()))?,
        )?;

        Ok(result)
    }

    /// List the tools the downstream server exposes.
    pub async fn list_tools(&self) -> KustomuxResult<Vec<McpToolDef>> {
        let resp = self.request("tools/list", None).await?;
        let result = resp
            .result
            .ok_or_else(|| KustomuxError::Protocol("empty tools/list result".into()))?;

        let tools: Vec<McpToolDef> = serde_json::from_value(
            result
                .get("tools")
                .cloned()
                .unwrap_or(serde_json::json!([])),
        )?;

        Ok(tools)
    }

    /// Call a tool on the downstream server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> KustomuxResult<McpToolResult> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let resp = self.request("tools/call", Some(params)).await?;
        let result = resp
            .result
            .ok_or_else(|| KustomuxError::Protocol("empty tools/call result".into()))?;

        let tool_result: McpToolResult = serde_json::from_value(result)?;
        Ok(tool_result)
    }

    /// Protocol-level liveness probe, bounded by the caller's deadline.
    pub async fn ping(&self, deadline: Duration) -> KustomuxResult<()> {
        self.request_with_timeout("ping", None, deadline).await?;
        Ok(())
    }

    /// The endpoint this client is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Best-effort close: shut the child's stdin so it sees EOF and stop
    /// the reader task. Errors are ignored.
    pub async fn close(&self) {
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        self.reader_task.abort();
        self.pending.lock().await.clear();
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
