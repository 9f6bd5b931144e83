//! Dispatch router — translates one upstream `call_tool` into one or many
//! supervisor calls.
//!
//! The decision logic is a pure function over the classification table so
//! it can be exercised without any live endpoint; `DispatchRouter` is a
//! thin executor on top. The router never retries: every transient problem
//! surfaces as an `isError` result.

use serde_json::{Map, Value};

use kustomux_core::normalize_cluster_url;

use crate::merge::{ToolMerger, ToolTable};
use crate::protocol::McpToolResult;
use crate::supervisor::EndpointSupervisor;

/// Outcome of routing one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Forward to a single endpoint with the given arguments.
    One { url: String, args: Map<String, Value> },
    /// Fan out to every connected endpoint with the given arguments.
    All { args: Map<String, Value> },
    /// Answer the caller directly with an error result.
    Reject { message: String },
}

/// Apply the routing decision table.
///
/// Routable tools require a `cluster` argument and keep it in the
/// forwarded arguments; fan-out tools have their synthetic `cluster`
/// argument stripped before forwarding. Unknown tools with a `cluster`
/// argument are routed optimistically.
pub fn decide(
    table: &ToolTable,
    urls: &[String],
    name: &str,
    args: &Map<String, Value>,
) -> Dispatch {
    let cluster_arg = args
        .get("cluster")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if table.routable.contains(name) {
        return match cluster_arg {
            Some(raw) => match resolve_cluster(raw, urls) {
                Ok(url) => Dispatch::One {
                    url,
                    args: args.clone(),
                },
                Err(message) => Dispatch::Reject { message },
            },
            None => Dispatch::Reject {
                message: format!(
                    "The 'cluster' parameter is required for tool '{name}'. Available clusters: {}",
                    urls.join(", ")
                ),
            },
        };
    }

    if table.fan_out.contains(name) {
        return match cluster_arg {
            Some(raw) => match resolve_cluster(raw, urls) {
                Ok(url) => Dispatch::One {
                    url,
                    args: strip_cluster(args),
                },
                Err(message) => Dispatch::Reject { message },
            },
            None => Dispatch::All {
                args: strip_cluster(args),
            },
        };
    }

    // Unknown tool: with a cluster argument, pass it through optimistically
    // to the named endpoint; without one there is nothing sane to do.
    match cluster_arg {
        Some(raw) => match resolve_cluster(raw, urls) {
            Ok(url) => Dispatch::One {
                url,
                args: strip_cluster(args),
            },
            Err(message) => Dispatch::Reject { message },
        },
        None => Dispatch::Reject {
            message: format!(
                "Unknown tool \"{name}\". Available tools: {}",
                table.tool_names().join(", ")
            ),
        },
    }
}

/// Normalize a caller-supplied cluster value and match it against the
/// configured endpoints.
fn resolve_cluster(raw: &str, urls: &[String]) -> Result<String, String> {
    let normalized = normalize_cluster_url(raw);
    if urls.iter().any(|u| *u == normalized) {
        Ok(normalized)
    } else {
        Err(format!(
            "Cluster '{raw}' is not configured. Available clusters: {}",
            urls.join(", ")
        ))
    }
}

/// The forwarded arguments minus the synthetic `cluster` key.
fn strip_cluster(args: &Map<String, Value>) -> Map<String, Value> {
    let mut stripped = args.clone();
    stripped.remove("cluster");
    stripped
}

/// Executes routing decisions against the supervisor.
#[derive(Clone)]
pub struct DispatchRouter {
    supervisor: EndpointSupervisor,
    merger: std::sync::Arc<ToolMerger>,
}

impl DispatchRouter {
    pub fn new(supervisor: EndpointSupervisor, merger: std::sync::Arc<ToolMerger>) -> Self {
        Self { supervisor, merger }
    }

    /// Route one upstream tool call and return the (possibly merged)
    /// result.
    pub async fn dispatch(&self, name: &str, args: Map<String, Value>) -> McpToolResult {
        let table = self.merger.snapshot().await;
        let urls = self.supervisor.endpoint_urls().await;

        match decide(&table, &urls, name, &args) {
            Dispatch::One { url, args } => {
                self.supervisor
                    .call_on_one(&url, name, Value::Object(args))
                    .await
            }
            Dispatch::All { args } => self.supervisor.call_on_all(name, Value::Object(args)).await,
            Dispatch::Reject { message } => McpToolResult::error_text(message),
        }
    }
}
