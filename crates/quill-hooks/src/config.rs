//! Two-scope rule loading.
//!
//! Rule files are JSON maps keyed by interception point name:
//!
//! ```json
//! {
//!   "beforeToolCall": [
//!     {"description": "block prod deploys", "matcher": "toolName:terminal-*",
//!      "actions": [{"type": "command", "command": "./check.sh"}]}
//!   ]
//! }
//! ```
//!
//! Project scope overrides global scope per point: if the project file has
//! rules for a point, the global file is not consulted for that point.
//! Files are re-read on every `rules_for` call — edits made during a run
//! are observed at the next `execute`, never mid-batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::HookError;
use crate::types::{HookPoint, HookRule, validate_rules};

/// A source of ordered rules per interception point.
pub trait RuleSource: Send + Sync {
    /// Rules for the point, already scope-resolved, in file order.
    fn rules_for(&self, point: HookPoint) -> Vec<HookRule>;
}

/// Fixed in-memory rules (tests, programmatic setups).
#[derive(Default)]
pub struct StaticRuleSource {
    rules: HashMap<HookPoint, Vec<HookRule>>,
}

impl StaticRuleSource {
    /// An empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rules for a point.
    #[must_use]
    pub fn with_rules(mut self, point: HookPoint, rules: Vec<HookRule>) -> Self {
        let _ = self.rules.insert(point, rules);
        self
    }
}

impl RuleSource for StaticRuleSource {
    fn rules_for(&self, point: HookPoint) -> Vec<HookRule> {
        self.rules.get(&point).cloned().unwrap_or_default()
    }
}

/// File-backed source with project and global scope.
pub struct FileRuleSource {
    project_path: Option<PathBuf>,
    global_path: Option<PathBuf>,
}

impl FileRuleSource {
    /// Build from optional scope file paths.
    #[must_use]
    pub fn new(project_path: Option<PathBuf>, global_path: Option<PathBuf>) -> Self {
        Self {
            project_path,
            global_path,
        }
    }

    fn load_scope(path: &Path, point: HookPoint) -> Result<Vec<HookRule>, HookError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(path).map_err(|e| HookError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let by_point: HashMap<String, Vec<HookRule>> =
            serde_json::from_str(&text).map_err(|e| HookError::Load {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let rules = by_point.get(point.key()).cloned().unwrap_or_default();
        validate_rules(&rules)?;
        Ok(rules)
    }
}

impl RuleSource for FileRuleSource {
    fn rules_for(&self, point: HookPoint) -> Vec<HookRule> {
        if let Some(path) = &self.project_path {
            match Self::load_scope(path, point) {
                Ok(rules) if !rules.is_empty() => {
                    debug!(point = %point, scope = "project", count = rules.len(), "loaded hook rules");
                    return rules;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(point = %point, error = %e, "skipping unreadable project hook file");
                }
            }
        }
        if let Some(path) = &self.global_path {
            match Self::load_scope(path, point) {
                Ok(rules) => {
                    if !rules.is_empty() {
                        debug!(point = %point, scope = "global", count = rules.len(), "loaded hook rules");
                    }
                    return rules;
                }
                Err(e) => {
                    warn!(point = %point, error = %e, "skipping unreadable global hook file");
                }
            }
        }
        Vec::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
