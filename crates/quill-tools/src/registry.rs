//! Tool registry — central index of registered tools.
//!
//! The runtime registers tools at startup, queries the registry to dispatch
//! calls and to generate the model-facing schema list, and derives
//! restricted registries for sub-agent runs via [`ToolRegistry::filtered`].

use std::collections::HashMap;
use std::sync::Arc;

use quill_core::tools::ToolSpec;
use tracing::debug;

use crate::traits::AgentTool;

/// Whether `tool_name` is allowed by an allow-list entry.
///
/// An entry matches exactly, or as a hyphen prefix: `"filesystem"` allows
/// `"filesystem-read"` and `"filesystem-edit"` but not `"filesystemx"`.
#[must_use]
pub fn allow_entry_matches(entry: &str, tool_name: &str) -> bool {
    tool_name == entry || tool_name.strip_prefix(entry).is_some_and(|rest| rest.starts_with('-'))
}

/// Whether `tool_name` passes an allow-list.
#[must_use]
pub fn allowed_by(allow_list: &[String], tool_name: &str) -> bool {
    allow_list
        .iter()
        .any(|entry| allow_entry_matches(entry, tool_name))
}

/// Central registry mapping tool names to implementations.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        debug!(tool_name = tool.name(), "tool registered");
        let _ = self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool schemas, sorted by name for a stable model-facing order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// All tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// A restricted copy containing only tools passing the allow-list.
    #[must_use]
    pub fn filtered(&self, allow_list: &[String]) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| allowed_by(allow_list, name))
            .map(|(name, tool)| (name.clone(), tool.clone()))
            .collect();
        ToolRegistry { tools }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
