//! Schema merger & classifier — builds the unified tool surface exposed
//! upstream from whichever endpoint's tools are available.
//!
//! A tool whose input schema declares a `cluster` property is *routable*
//! (invoked on exactly one endpoint); every other tool *fans out* to all
//! endpoints and gains an optional synthetic `cluster` parameter that
//! forces single-endpoint mode. That property is the only classification
//! signal; tool names are never special-cased.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::protocol::McpToolDef;
use crate::supervisor::EndpointSupervisor;

const ROUTED_SUFFIX: &str = "(Routed to the specified cluster)";
const FAN_OUT_SUFFIX: &str = "(Queries all available clusters unless a specific cluster is specified)";

/// The merged tool list and its route-vs-fan-out classification.
#[derive(Debug, Default)]
pub struct ToolTable {
    pub tools: Vec<McpToolDef>,
    pub routable: HashSet<String>,
    pub fan_out: HashSet<String>,
}

impl ToolTable {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Holds the current [`ToolTable`] and swaps it atomically on refresh.
/// Readers get an `Arc` snapshot and are never exposed to a torn table.
pub struct ToolMerger {
    table: RwLock<Arc<ToolTable>>,
}

impl ToolMerger {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(ToolTable::default())),
        }
    }

    /// Rebuild the classification table from the supervisor's current
    /// state and swap it in. Re-runnable at any time.
    pub async fn refresh(&self, supervisor: &EndpointSupervisor) {
        let urls = supervisor.endpoint_urls().await;
        let table = match supervisor.first_connected_tools().await {
            Some(source) => {
                let table = build_table(&source, &urls);
                info!(
                    tools = table.tools.len(),
                    routable = table.routable.len(),
                    fan_out = table.fan_out.len(),
                    "tool table refreshed"
                );
                table
            }
            None => {
                warn!("no connected endpoint reported any tools; exposing an empty tool list");
                ToolTable::default()
            }
        };

        *self.table.write().await = Arc::new(table);
    }

    /// Current table snapshot.
    pub async fn snapshot(&self) -> Arc<ToolTable> {
        self.table.read().await.clone()
    }
}

impl Default for ToolMerger {
    fn default() -> Self {
        Self::new()
    }
}

/// True when the tool's input schema declares a `cluster` property.
pub fn has_cluster_property(tool: &McpToolDef) -> bool {
    tool.input_schema
        .get("properties")
        .and_then(|p| p.get("cluster"))
        .is_some()
}

/// Classify and rewrite every source tool against the configured endpoint
/// URLs.
pub fn build_table(source: &[McpToolDef], urls: &[String]) -> ToolTable {
    let mut table = ToolTable::default();
    for tool in source {
        if has_cluster_property(tool) {
            table.routable.insert(tool.name.clone());
            table.tools.push(rewrite_routable(tool, urls));
        } else {
            table.fan_out.insert(tool.name.clone());
            table.tools.push(rewrite_fan_out(tool, urls));
        }
    }
    table
}

/// Rewrite a routable tool: pin the `cluster` property to the configured
/// URLs and make it required.
pub fn rewrite_routable(tool: &McpToolDef, urls: &[String]) -> McpToolDef {
    let mut schema = ensure_object_schema(tool.input_schema.clone());

    if let Some(obj) = schema.as_object_mut() {
        let properties = obj
            .entry("properties")
            .or_insert_with(|| json!({}));
        if let Some(props) = properties.as_object_mut() {
            let cluster = props.entry("cluster").or_insert_with(|| json!({}));
            if let Some(cluster) = cluster.as_object_mut() {
                cluster.insert("type".to_string(), json!("string"));
                cluster.insert("enum".to_string(), json!(urls));
                cluster.insert(
                    "description".to_string(),
                    json!(format!(
                        "Kusto cluster to target. Available clusters: {}",
                        urls.join(", ")
                    )),
                );
            }
        }

        let required = obj.entry("required").or_insert_with(|| json!([]));
        if let Some(required) = required.as_array_mut() {
            if !required.iter().any(|v| v == "cluster") {
                required.push(json!("cluster"));
            }
        }
    }

    McpToolDef {
        name: tool.name.clone(),
        description: append_suffix(&tool.description, ROUTED_SUFFIX),
        input_schema: schema,
    }
}

/// Rewrite a fan-out tool: add an optional synthetic `cluster` property
/// that forces single-endpoint mode when supplied.
pub fn rewrite_fan_out(tool: &McpToolDef, urls: &[String]) -> McpToolDef {
    let mut schema = ensure_object_schema(tool.input_schema.clone());

    if let Some(obj) = schema.as_object_mut() {
        let properties = obj
            .entry("properties")
            .or_insert_with(|| json!({}));
        if let Some(props) = properties.as_object_mut() {
            props.insert(
                "cluster".to_string(),
                json!({
                    "type": "string",
                    "enum": urls,
                    "description": format!(
                        "Optional cluster to target. When omitted the call is sent to every available cluster. Available clusters: {}",
                        urls.join(", ")
                    ),
                }),
            );
        }
    }

    McpToolDef {
        name: tool.name.clone(),
        description: append_suffix(&tool.description, FAN_OUT_SUFFIX),
        input_schema: schema,
    }
}

fn ensure_object_schema(schema: Value) -> Value {
    if schema.is_object() {
        schema
    } else {
        json!({"type": "object", "properties": {}})
    }
}

fn append_suffix(description: &str, suffix: &str) -> String {
    if description.is_empty() {
        suffix.to_string()
    } else {
        format!("{description} {suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> Vec<String> {
        vec![
            "https://c1.example".to_string(),
            "https://c2.example".to_string(),
        ]
    }

    fn query_tool() -> McpToolDef {
        McpToolDef {
            name: "kusto_query".to_string(),
            description: "Run a KQL query".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cluster": {"type": "string"},
                    "database": {"type": "string"},
                    "query": {"type": "string"}
                },
                "required": ["database", "query"]
            }),
        }
    }

    fn list_tool() -> McpToolDef {
        McpToolDef {
            name: "kusto_cluster_list".to_string(),
            description: "List clusters".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "subscriptionId": {"type": "string"}
                }
            }),
        }
    }

    #[test]
    fn test_classification_by_cluster_property() {
        assert!(has_cluster_property(&query_tool()));
        assert!(!has_cluster_property(&list_tool()));
    }

    #[test]
    fn test_build_table_sets_are_disjoint_and_cover_all_tools() {
        let table = build_table(&[query_tool(), list_tool()], &urls());
        assert!(table.routable.contains("kusto_query"));
        assert!(table.fan_out.contains("kusto_cluster_list"));
        assert!(table.routable.is_disjoint(&table.fan_out));
        for tool in &table.tools {
            assert!(
                table.routable.contains(&tool.name) || table.fan_out.contains(&tool.name)
            );
        }
    }

    #[test]
    fn test_rewrite_routable_pins_enum_and_requires_cluster() {
        let rewritten = rewrite_routable(&query_tool(), &urls());
        let schema = &rewritten.input_schema;

        assert_eq!(schema["properties"]["cluster"]["type"], "string");
        assert_eq!(
            schema["properties"]["cluster"]["enum"],
            json!(["https://c1.example", "https://c2.example"])
        );
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "cluster"));
        assert!(required.iter().any(|v| v == "database"));
        assert!(rewritten.description.ends_with(ROUTED_SUFFIX));
    }

    #[test]
    fn test_rewrite_routable_does_not_duplicate_required_entry() {
        let mut tool = query_tool();
        tool.input_schema["required"] = json!(["cluster", "database", "query"]);
        let rewritten = rewrite_routable(&tool, &urls());
        let required = rewritten.input_schema["required"].as_array().unwrap();
        assert_eq!(required.iter().filter(|v| **v == json!("cluster")).count(), 1);
    }

    #[test]
    fn test_rewrite_fan_out_adds_optional_cluster() {
        let rewritten = rewrite_fan_out(&list_tool(), &urls());
        let schema = &rewritten.input_schema;

        assert_eq!(schema["properties"]["cluster"]["type"], "string");
        assert_eq!(
            schema["properties"]["cluster"]["enum"],
            json!(["https://c1.example", "https://c2.example"])
        );
        // Original properties survive the rewrite.
        assert!(schema["properties"]["subscriptionId"].is_object());
        // `cluster` must not become required.
        let required = schema.get("required").and_then(|r| r.as_array());
        assert!(required.map_or(true, |r| !r.iter().any(|v| v == "cluster")));
        assert!(rewritten.description.ends_with(FAN_OUT_SUFFIX));
    }

    #[test]
    fn test_rewrite_preserves_original_tool() {
        let tool = list_tool();
        let _ = rewrite_fan_out(&tool, &urls());
        // The source definition is deep-copied, never mutated.
        assert!(tool.input_schema["properties"].get("cluster").is_none());
    }

    #[test]
    fn test_append_suffix_on_empty_description() {
        let mut tool = list_tool();
        tool.description = String::new();
        let rewritten = rewrite_fan_out(&tool, &urls());
        assert_eq!(rewritten.description, FAN_OUT_SUFFIX);
    }

    #[tokio::test]
    async fn test_merger_starts_empty_and_refreshes_empty_without_endpoints() {
        use crate::supervisor::ChildCommand;
        use kustomux_core::RouterSettings;

        let merger = ToolMerger::new();
        assert!(merger.snapshot().await.is_empty());

        let supervisor = EndpointSupervisor::new(
            RouterSettings::default(),
            ChildCommand::parse("/nonexistent/kusto-mcp-server"),
        );
        merger.refresh(&supervisor).await;
        let table = merger.snapshot().await;
        assert!(table.is_empty());
        assert!(table.routable.is_empty());
        assert!(table.fan_out.is_empty());
    }
}
