//! Tool registry: a thin adapter over an external MCP manager. This crate
//! runs no tools itself; it only shapes whatever the MCP manager reports
//! into the `ToolDescriptor` list a model call expects.

pub mod sentinel;

use crate::model::provider::ToolDescriptor;
use std::collections::HashSet;

/// External collaborator: the MCP tool-server manager. Tool execution
/// lives outside this crate; only the contract this registry needs is
/// modeled here.
#[async_trait::async_trait]
pub trait McpManager: Send + Sync {
    /// Current tool list as the MCP manager reports it, before `mcp_`
    /// prefixing or schema normalization.
    fn list_tools(&self) -> Vec<RawToolSpec>;

    /// Invoke a tool by its final (already `mcp_`-prefixed) name. The
    /// `Err` side is for transport/protocol failures reaching the tool
    /// server itself, not for the tool's own `{error, message}` results,
    /// which travel as `Ok` values — the loop engine normalizes both shapes.
    async fn execute(&self, name: &str, input: serde_json::Value) -> Result<serde_json::Value, String>;
}

#[derive(Debug, Clone)]
pub struct RawToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Option<serde_json::Value>,
}

const MCP_PREFIX: &str = "mcp_";

fn fallback_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// No-op manager for running without an MCP tool server wired up: reports
/// no tools and refuses any execution attempt.
pub struct NullMcpManager;

#[async_trait::async_trait]
impl McpManager for NullMcpManager {
    fn list_tools(&self) -> Vec<RawToolSpec> {
        Vec::new()
    }

    async fn execute(&self, name: &str, _input: serde_json::Value) -> Result<serde_json::Value, String> {
        Err(format!("no MCP manager configured; cannot execute '{name}'"))
    }
}

/// Build the tool list to pass to a model call: prefix unprefixed names
/// with `mcp_`, substitute a minimal object schema when the manager's
/// schema is absent, and drop later duplicates by final name.
pub fn build_tool_list(manager: &dyn McpManager) -> Vec<ToolDescriptor> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in manager.list_tools() {
        let name = if raw.name.starts_with(MCP_PREFIX) {
            raw.name
        } else {
            format!("{MCP_PREFIX}{}", raw.name)
        };
        if !seen.insert(name.clone()) {
            continue;
        }
        out.push(ToolDescriptor {
            name,
            description: raw.description,
            input_schema: raw.input_schema.unwrap_or_else(fallback_schema),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedManager(Vec<RawToolSpec>);
    #[async_trait::async_trait]
    impl McpManager for FixedManager {
        fn list_tools(&self) -> Vec<RawToolSpec> {
            self.0.clone()
        }

        async fn execute(&self, _name: &str, _input: serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({}))
        }
    }

    #[test]
    fn prefixes_unprefixed_names() {
        let manager = FixedManager(vec![RawToolSpec {
            name: "run_shell_command".into(),
            description: "run a shell command".into(),
            input_schema: None,
        }]);
        let tools = build_tool_list(&manager);
        assert_eq!(tools[0].name, "mcp_run_shell_command");
        assert_eq!(tools[0].input_schema, fallback_schema());
    }

    #[test]
    fn leaves_already_prefixed_names_alone() {
        let manager = FixedManager(vec![RawToolSpec {
            name: "mcp_read_file".into(),
            description: "read a file".into(),
            input_schema: Some(serde_json::json!({"type": "object"})),
        }]);
        let tools = build_tool_list(&manager);
        assert_eq!(tools[0].name, "mcp_read_file");
    }

    #[test]
    fn deduplicates_by_final_name_preserving_first() {
        let manager = FixedManager(vec![
            RawToolSpec { name: "mcp_read_file".into(), description: "first".into(), input_schema: None },
            RawToolSpec { name: "read_file".into(), description: "second".into(), input_schema: None },
        ]);
        let tools = build_tool_list(&manager);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "first");
    }
}
