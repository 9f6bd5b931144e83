//! Endpoint supervisor — owns the process-level connection to every
//! downstream cluster server.
//!
//! Each endpoint record is mutated only through this type; long I/O
//! (spawning, handshakes, tool calls) happens outside the map lock and
//! state transitions re-check a per-record generation counter, so a stale
//! exit watcher can never clobber a newer connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use kustomux_core::{ClusterMapping, KustomuxError, KustomuxResult, RouterSettings};
use serde::Serialize;
use tokio::process::Child;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::client::McpClient;
use crate::protocol::{McpContent, McpToolDef, McpToolResult};

/// Consecutive ping failures before an endpoint is declared disconnected.
const PING_FAILURE_THRESHOLD: u32 = 3;

/// Grace period for a child to exit after its stdin closes.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the exit watcher polls a child for termination.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Environment variable overriding the downstream server command.
pub const SERVER_COMMAND_ENV: &str = "KUSTOMUX_SERVER_COMMAND";

/// Default downstream server command.
pub const DEFAULT_SERVER_COMMAND: &str = "kusto-mcp-server";

const AUTH_ERROR_MARKERS: [&str; 4] = ["401", "403", "Unauthorized", "Forbidden"];

/// True when a transport error smells like an authentication failure.
pub(crate) fn is_auth_error(message: &str) -> bool {
    AUTH_ERROR_MARKERS.iter().any(|m| message.contains(m))
}

/// The command used to spawn one downstream server. The endpoint URL is
/// appended as the final argument so each child binds to its own cluster.
#[derive(Debug, Clone)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ChildCommand {
    /// Resolve the command from `KUSTOMUX_SERVER_COMMAND`, falling back to
    /// the default server binary.
    pub fn from_env() -> Self {
        match std::env::var(SERVER_COMMAND_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Self::parse(&raw),
            _ => Self::parse(DEFAULT_SERVER_COMMAND),
        }
    }

    /// Split a whitespace-separated command line into program + args.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split_whitespace();
        let program = parts.next().unwrap_or(DEFAULT_SERVER_COMMAND).to_string();
        Self {
            program,
            args: parts.map(str::to_string).collect(),
        }
    }
}

/// Lifecycle state of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndpointStatus {
    Connecting,
    Connected,
    Failed,
    Disconnected,
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointStatus::Connecting => "connecting",
            EndpointStatus::Connected => "connected",
            EndpointStatus::Failed => "failed",
            EndpointStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one endpoint, for the health loop and logs.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatusReport {
    pub url: String,
    pub status: EndpointStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub tool_count: usize,
}

/// Internal state for one supervised endpoint.
struct EndpointRecord {
    url: String,
    identity: String,
    status: EndpointStatus,
    child: Option<Arc<Mutex<Child>>>,
    client: Option<Arc<McpClient>>,
    last_heartbeat: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    tools: Vec<McpToolDef>,
    reconnecting: bool,
    generation: u64,
}

impl EndpointRecord {
    fn new(mapping: &ClusterMapping) -> Self {
        Self {
            url: mapping.url.clone(),
            identity: mapping.identity.clone(),
            status: EndpointStatus::Connecting,
            child: None,
            client: None,
            last_heartbeat: None,
            consecutive_failures: 0,
            tools: Vec::new(),
            reconnecting: false,
            generation: 0,
        }
    }
}

/// Callback invoked once per unexpected child exit, with the endpoint URL.
pub type ExitCallback = Box<dyn Fn(&str) + Send + Sync>;

struct SupervisorShared {
    endpoints: RwLock<HashMap<String, EndpointRecord>>,
    exit_callback: RwLock<Option<ExitCallback>>,
    settings: RouterSettings,
    command: ChildCommand,
}

/// Supervises one downstream child process per configured cluster.
///
/// Cheap to clone; clones share the same endpoint map.
#[derive(Clone)]
pub struct EndpointSupervisor {
    shared: Arc<SupervisorShared>,
}

impl EndpointSupervisor {
    pub fn new(settings: RouterSettings, command: ChildCommand) -> Self {
        Self {
            shared: Arc::new(SupervisorShared {
                endpoints: RwLock::new(HashMap::new()),
                exit_callback: RwLock::new(None),
                settings,
                command,
            }),
        }
    }

    /// Register the child-exit callback. A later registrant replaces an
    /// earlier one (single-consumer API).
    pub async fn set_exit_callback(&self, callback: ExitCallback) {
        *self.shared.exit_callback.write().await = Some(callback);
    }

    /// Create records for every mapping (deduplicated by normalized URL)
    /// and connect them all in parallel. Individual failures are logged,
    /// not fatal. Returns the number of endpoints that ended up connected.
    pub async fn initialize_all(&self, mappings: &[ClusterMapping]) -> usize {
        let mut urls = Vec::new();
        {
            let mut endpoints = self.shared.endpoints.write().await;
            for mapping in mappings {
                if endpoints.contains_key(&mapping.url) {
                    warn!(endpoint = %mapping.url, "duplicate cluster mapping dropped");
                    continue;
                }
                endpoints.insert(mapping.url.clone(), EndpointRecord::new(mapping));
                urls.push(mapping.url.clone());
            }
        }

        let mut handles = Vec::new();
        for url in urls {
            let supervisor = self.clone();
            let endpoint = url.clone();
            handles.push((
                url,
                tokio::spawn(async move { supervisor.connect(&endpoint).await }),
            ));
        }

        for (url, handle) in handles {
            match handle.await {
                Ok(Ok(())) => info!(endpoint = %url, "endpoint connected"),
                Ok(Err(e)) => warn!(endpoint = %url, error = %e, "failed to connect endpoint"),
                Err(e) => warn!(endpoint = %url, error = %e, "connect task panicked"),
            }
        }

        self.connected_count().await
    }

    /// Spawn the child for one endpoint, run the handshake, discover its
    /// tools, and install the exit watcher. On failure the endpoint is
    /// marked `Failed`.
    pub async fn connect(&self, url: &str) -> KustomuxResult<()> {
        let identity = {
            let mut endpoints = self.shared.endpoints.write().await;
            let rec = endpoints.get_mut(url).ok_or_else(|| {
                KustomuxError::Connect(format!("endpoint '{url}' is not configured"))
            })?;
            rec.status = EndpointStatus::Connecting;
            rec.identity.clone()
        };

        let (env_sets, env_removes) = child_env(&identity);
        let mut args = self.shared.command.args.clone();
        args.push(url.to_string());

        let connected = McpClient::connect(
            &self.shared.command.program,
            &args,
            &env_sets,
            &env_removes,
            url,
        )
        .await;

        let (client, child, tools) = match connected {
            Ok(v) => v,
            Err(e) => {
                let mut endpoints = self.shared.endpoints.write().await;
                if let Some(rec) = endpoints.get_mut(url) {
                    rec.status = EndpointStatus::Failed;
                }
                return Err(e);
            }
        };

        let child = Arc::new(Mutex::new(child));
        let generation = {
            let mut endpoints = self.shared.endpoints.write().await;
            let Some(rec) = endpoints.get_mut(url) else {
                drop(endpoints);
                client.close().await;
                let mut guard = child.lock().await;
                let _ = guard.kill().await;
                return Err(KustomuxError::Connect(format!(
                    "endpoint '{url}' was removed during connect"
                )));
            };
            rec.generation += 1;
            rec.child = Some(child.clone());
            rec.client = Some(Arc::new(client));
            rec.tools = tools;
            rec.status = EndpointStatus::Connected;
            rec.last_heartbeat = Some(Utc::now());
            rec.consecutive_failures = 0;
            rec.generation
        };

        self.spawn_exit_watcher(url.to_string(), generation, child);
        Ok(())
    }

    /// Watch the child for termination. When it exits and the record still
    /// belongs to this connection generation, mark the endpoint
    /// disconnected, drop the references, and fire the exit callback once.
    fn spawn_exit_watcher(&self, url: String, generation: u64, child: Arc<Mutex<Child>>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                let exit = {
                    let mut guard = child.lock().await;
                    match guard.try_wait() {
                        Ok(None) => None,
                        Ok(Some(status)) => Some(status.to_string()),
                        Err(e) => Some(format!("wait failed: {e}")),
                    }
                };
                let Some(exit) = exit else { continue };

                let notify = {
                    let mut endpoints = supervisor.shared.endpoints.write().await;
                    match endpoints.get_mut(&url) {
                        Some(rec) if rec.generation == generation => {
                            rec.status = EndpointStatus::Disconnected;
                            rec.child = None;
                            rec.client = None;
                            true
                        }
                        _ => false,
                    }
                };

                if notify {
                    warn!(endpoint = %url, exit = %exit, "downstream child exited");
                    let callback = supervisor.shared.exit_callback.read().await;
                    if let Some(cb) = callback.as_ref() {
                        cb(&url);
                    }
                }
                break;
            }
        });
    }

    /// Ping one endpoint. Only `Connected` endpoints are pinged; anything
    /// else returns false immediately. Failures escalate the status but
    /// never remove the record.
    pub async fn ping(&self, url: &str) -> bool {
        let client = {
            let endpoints = self.shared.endpoints.read().await;
            match endpoints.get(url) {
                Some(rec) if rec.status == EndpointStatus::Connected => rec.client.clone(),
                _ => return false,
            }
        };
        let Some(client) = client else { return false };

        let deadline = Duration::from_secs(self.shared.settings.ping_timeout_secs);
        match client.ping(deadline).await {
            Ok(()) => {
                let mut endpoints = self.shared.endpoints.write().await;
                if let Some(rec) = endpoints.get_mut(url) {
                    rec.last_heartbeat = Some(Utc::now());
                    rec.consecutive_failures = 0;
                }
                true
            }
            Err(e) => {
                let mut endpoints = self.shared.endpoints.write().await;
                if let Some(rec) = endpoints.get_mut(url) {
                    rec.consecutive_failures += 1;
                    rec.status = if rec.consecutive_failures >= PING_FAILURE_THRESHOLD {
                        EndpointStatus::Disconnected
                    } else {
                        EndpointStatus::Failed
                    };
                    warn!(
                        endpoint = %url,
                        failures = rec.consecutive_failures,
                        error = %e,
                        "ping failed"
                    );
                }
                false
            }
        }
    }

    /// Tear down and re-establish one endpoint's connection. Guarded so at
    /// most one reconnect per endpoint is in flight.
    pub async fn reconnect(&self, url: &str) -> bool {
        {
            let mut endpoints = self.shared.endpoints.write().await;
            let Some(rec) = endpoints.get_mut(url) else {
                return false;
            };
            if rec.reconnecting {
                debug!(endpoint = %url, "reconnect already in flight");
                return false;
            }
            rec.reconnecting = true;
        }

        self.teardown(url).await;
        let result = self.connect(url).await;

        {
            let mut endpoints = self.shared.endpoints.write().await;
            if let Some(rec) = endpoints.get_mut(url) {
                rec.reconnecting = false;
            }
        }

        match result {
            Ok(()) => {
                info!(endpoint = %url, "endpoint reconnected");
                true
            }
            Err(e) => {
                warn!(endpoint = %url, error = %e, "reconnect failed");
                false
            }
        }
    }

    /// Best-effort teardown: close the client, give the child 5 seconds to
    /// exit after stdin closes, then kill it. Bumping the generation first
    /// silences the exit watcher for this deliberate shutdown.
    async fn teardown(&self, url: &str) {
        let (client, child) = {
            let mut endpoints = self.shared.endpoints.write().await;
            let Some(rec) = endpoints.get_mut(url) else {
                return;
            };
            rec.generation += 1;
            if rec.status == EndpointStatus::Connected {
                rec.status = EndpointStatus::Disconnected;
            }
            (rec.client.take(), rec.child.take())
        };

        if let Some(client) = client {
            client.close().await;
        }
        if let Some(child) = child {
            let mut guard = child.lock().await;
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, guard.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = guard.kill().await;
                }
            }
        }
    }

    /// Call one tool on one endpoint. Unknown or disconnected endpoints
    /// synthesize an error result naming the configured clusters.
    pub async fn call_on_one(
        &self,
        url: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> McpToolResult {
        let target = {
            let endpoints = self.shared.endpoints.read().await;
            endpoints.get(url).and_then(|rec| {
                if rec.status == EndpointStatus::Connected {
                    rec.client.clone().map(|c| (c, rec.identity.clone()))
                } else {
                    None
                }
            })
        };

        match target {
            Some((client, identity)) => {
                self.call_endpoint(url, &identity, &client, tool, args).await
            }
            None => McpToolResult::error_text(format!(
                "Cluster '{url}' is not connected. Available clusters: {}",
                self.endpoint_urls().await.join(", ")
            )),
        }
    }

    async fn call_endpoint(
        &self,
        url: &str,
        identity: &str,
        client: &Arc<McpClient>,
        tool: &str,
        args: serde_json::Value,
    ) -> McpToolResult {
        match client.call_tool(tool, args).await {
            Ok(result) => result,
            Err(e) => {
                let message = e.to_string();
                if is_auth_error(&message) {
                    error!(
                        endpoint = %url,
                        identity = %identity,
                        tool = %tool,
                        error = %message,
                        "authentication failure calling downstream"
                    );
                }
                McpToolResult::error_text(format!(
                    "Tool '{tool}' failed on cluster '{url}': {message}"
                ))
            }
        }
    }

    /// Fan a tool call out to every connected endpoint and merge the
    /// results. All calls run in parallel and all outcomes are collected;
    /// successful content is concatenated in endpoint-URL order and each
    /// failure contributes a textual error entry.
    pub async fn call_on_all(&self, tool: &str, args: serde_json::Value) -> McpToolResult {
        let mut targets: Vec<(String, String, Arc<McpClient>)> = {
            let endpoints = self.shared.endpoints.read().await;
            endpoints
                .values()
                .filter(|rec| rec.status == EndpointStatus::Connected)
                .filter_map(|rec| {
                    rec.client
                        .clone()
                        .map(|c| (rec.url.clone(), rec.identity.clone(), c))
                })
                .collect()
        };
        targets.sort_by(|a, b| a.0.cmp(&b.0));

        if targets.is_empty() {
            return McpToolResult::error_text(
                "No clusters connected. The tool call cannot be executed.",
            );
        }

        let calls = targets.iter().map(|(url, identity, client)| {
            let args = args.clone();
            async move {
                (
                    url.as_str(),
                    self.call_endpoint(url, identity, client, tool, args).await,
                )
            }
        });
        let results = join_all(calls).await;

        let mut content = Vec::new();
        let mut is_error = false;
        for (url, result) in results {
            if result.is_error {
                is_error = true;
                content.push(McpContent::text(format!("[{url}] {}", result.joined_text())));
            } else {
                content.extend(result.content);
            }
        }

        McpToolResult { content, is_error }
    }

    /// Tear every endpoint down in parallel and clear the map.
    pub async fn shutdown_all(&self) {
        let urls = self.endpoint_urls().await;
        join_all(urls.iter().map(|url| self.teardown(url))).await;
        self.shared.endpoints.write().await.clear();
        info!("all endpoints shut down");
    }

    /// Configured endpoint URLs in sorted order.
    pub async fn endpoint_urls(&self) -> Vec<String> {
        let endpoints = self.shared.endpoints.read().await;
        let mut urls: Vec<String> = endpoints.keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Number of endpoints currently connected.
    pub async fn connected_count(&self) -> usize {
        let endpoints = self.shared.endpoints.read().await;
        endpoints
            .values()
            .filter(|rec| rec.status == EndpointStatus::Connected)
            .count()
    }

    /// Status snapshot of every endpoint, sorted by URL.
    pub async fn statuses(&self) -> Vec<EndpointStatusReport> {
        let endpoints = self.shared.endpoints.read().await;
        let mut reports: Vec<EndpointStatusReport> = endpoints
            .values()
            .map(|rec| EndpointStatusReport {
                url: rec.url.clone(),
                status: rec.status,
                last_heartbeat: rec.last_heartbeat,
                consecutive_failures: rec.consecutive_failures,
                tool_count: rec.tools.len(),
            })
            .collect();
        reports.sort_by(|a, b| a.url.cmp(&b.url));
        reports
    }

    /// Tool list of the first connected endpoint (sorted URL order) that
    /// reported a non-empty list. All endpoints are assumed to expose
    /// identical tool schemas; this is not validated.
    pub async fn first_connected_tools(&self) -> Option<Vec<McpToolDef>> {
        let endpoints = self.shared.endpoints.read().await;
        let mut connected: Vec<&EndpointRecord> = endpoints
            .values()
            .filter(|rec| rec.status == EndpointStatus::Connected && !rec.tools.is_empty())
            .collect();
        connected.sort_by(|a, b| a.url.cmp(&b.url));
        connected.first().map(|rec| rec.tools.clone())
    }
}

/// Environment applied to every spawned child, derived from the parent
/// environment via `lookup` and the mapping's identity.
fn child_env_from(
    lookup: impl Fn(&str) -> Option<String>,
    identity: &str,
) -> (Vec<(String, String)>, Vec<&'static str>) {
    let mut sets = Vec::new();
    let mut removes = Vec::new();

    let credentials = lookup("AZURE_TOKEN_CREDENTIALS")
        .unwrap_or_else(|| "managedidentitycredential".to_string());
    sets.push(("AZURE_TOKEN_CREDENTIALS".to_string(), credentials));

    for key in ["IDENTITY_ENDPOINT", "IDENTITY_HEADER"] {
        if let Some(value) = lookup(key) {
            sets.push((key.to_string(), value));
        }
    }

    if identity.is_empty() {
        removes.push("AZURE_CLIENT_ID");
    } else {
        sets.push(("AZURE_CLIENT_ID".to_string(), identity.to_string()));
    }

    (sets, removes)
}

fn child_env(identity: &str) -> (Vec<(String, String)>, Vec<&'static str>) {
    child_env_from(|key| std::env::var(key).ok(), identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_child_env_defaults_token_credentials() {
        let (sets, removes) = child_env_from(lookup_from(&[]), "");
        assert!(sets.contains(&(
            "AZURE_TOKEN_CREDENTIALS".to_string(),
            "managedidentitycredential".to_string()
        )));
        assert!(removes.contains(&"AZURE_CLIENT_ID"));
    }

    #[test]
    fn test_child_env_inherits_token_credentials() {
        let lookup = lookup_from(&[("AZURE_TOKEN_CREDENTIALS", "azurecli")]);
        let (sets, _) = child_env_from(lookup, "");
        assert!(sets.contains(&("AZURE_TOKEN_CREDENTIALS".to_string(), "azurecli".to_string())));
    }

    #[test]
    fn test_child_env_forwards_identity_endpoint() {
        let lookup = lookup_from(&[
            ("IDENTITY_ENDPOINT", "http://169.254.169.254"),
            ("IDENTITY_HEADER", "secret"),
        ]);
        let (sets, _) = child_env_from(lookup, "");
        assert!(sets
            .iter()
            .any(|(k, v)| k == "IDENTITY_ENDPOINT" && v == "http://169.254.169.254"));
        assert!(sets.iter().any(|(k, v)| k == "IDENTITY_HEADER" && v == "secret"));
    }

    #[test]
    fn test_child_env_sets_client_id_from_identity() {
        let (sets, removes) = child_env_from(lookup_from(&[]), "/sub/rg/id");
        assert!(sets.iter().any(|(k, v)| k == "AZURE_CLIENT_ID" && v == "/sub/rg/id"));
        assert!(!removes.contains(&"AZURE_CLIENT_ID"));
    }

    #[test]
    fn test_child_command_parse() {
        let cmd = ChildCommand::parse("npx -y @azure/kusto-mcp");
        assert_eq!(cmd.program, "npx");
        assert_eq!(cmd.args, vec!["-y", "@azure/kusto-mcp"]);

        let cmd = ChildCommand::parse("kusto-mcp-server");
        assert_eq!(cmd.program, "kusto-mcp-server");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_is_auth_error_markers() {
        assert!(is_auth_error("HTTP 401 from gateway"));
        assert!(is_auth_error("status 403"));
        assert!(is_auth_error("Unauthorized: token expired"));
        assert!(is_auth_error("Forbidden"));
        assert!(!is_auth_error("connection reset by peer"));
    }

    fn test_supervisor() -> EndpointSupervisor {
        EndpointSupervisor::new(
            RouterSettings::default(),
            ChildCommand::parse("/nonexistent/kusto-mcp-server"),
        )
    }

    fn mapping(url: &str) -> ClusterMapping {
        ClusterMapping::parse(url).unwrap()
    }

    #[tokio::test]
    async fn test_empty_supervisor() {
        let sup = test_supervisor();
        assert_eq!(sup.connected_count().await, 0);
        assert!(sup.endpoint_urls().await.is_empty());
        assert!(sup.statuses().await.is_empty());
        assert!(sup.first_connected_tools().await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_all_with_unspawnable_command() {
        let sup = test_supervisor();
        let connected = sup
            .initialize_all(&[mapping("https://c1.example"), mapping("https://c2.example")])
            .await;
        assert_eq!(connected, 0);

        let reports = sup.statuses().await;
        assert_eq!(reports.len(), 2);
        for report in reports {
            assert_eq!(report.status, EndpointStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_initialize_all_dedupes_by_normalized_url() {
        let sup = test_supervisor();
        sup.initialize_all(&[
            mapping("https://c1.example"),
            mapping("https://C1.EXAMPLE/"),
            mapping("c1.example"),
        ])
        .await;
        assert_eq!(sup.endpoint_urls().await, vec!["https://c1.example"]);
    }

    #[tokio::test]
    async fn test_call_on_one_unknown_endpoint() {
        let sup = test_supervisor();
        sup.initialize_all(&[mapping("https://c1.example")]).await;

        let result = sup
            .call_on_one("https://other.example", "kusto_query", serde_json::json!({}))
            .await;
        assert!(result.is_error);
        let text = result.joined_text();
        assert!(text.contains("https://other.example"));
        assert!(text.contains("https://c1.example"));
    }

    #[tokio::test]
    async fn test_call_on_all_with_no_connections() {
        let sup = test_supervisor();
        let result = sup
            .call_on_all("kusto_cluster_list", serde_json::json!({}))
            .await;
        assert!(result.is_error);
        assert!(result.joined_text().contains("No clusters connected"));
    }

    #[tokio::test]
    async fn test_ping_requires_connected_status() {
        let sup = test_supervisor();
        sup.initialize_all(&[mapping("https://c1.example")]).await;
        // The endpoint ended up Failed, so ping must bail out without a probe.
        assert!(!sup.ping("https://c1.example").await);
        assert!(!sup.ping("https://unknown.example").await);
    }

    #[tokio::test]
    async fn test_reconnect_unknown_endpoint_returns_false() {
        let sup = test_supervisor();
        assert!(!sup.reconnect("https://nowhere.example").await);
    }

    #[tokio::test]
    async fn test_reconnect_failure_leaves_endpoint_failed() {
        let sup = test_supervisor();
        sup.initialize_all(&[mapping("https://c1.example")]).await;

        assert!(!sup.reconnect("https://c1.example").await);
        let reports = sup.statuses().await;
        assert_eq!(reports[0].status, EndpointStatus::Failed);
    }

    #[tokio::test]
    async fn test_shutdown_all_clears_endpoints() {
        let sup = test_supervisor();
        sup.initialize_all(&[mapping("https://c1.example"), mapping("https://c2.example")])
            .await;
        sup.shutdown_all().await;
        assert!(sup.endpoint_urls().await.is_empty());
    }
}
