//! Content search tool: regex over workspace files.

use async_trait::async_trait;
use globset::Glob;
use quill_core::tools::{ToolOutput, ToolParameterSchema, ToolSpec, text_output};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{Value, json};
use walkdir::WalkDir;

use crate::errors::ToolError;
use crate::traits::{AgentTool, ToolContext, decode_args};

/// Maximum matches reported per search.
const MAX_MATCHES: usize = 200;

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Regex content search with optional glob filtering.
pub struct GrepTool;

#[derive(Deserialize)]
struct GrepParams {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
}

#[async_trait]
impl AgentTool for GrepTool {
    fn name(&self) -> &str {
        "search-grep"
    }

    fn spec(&self) -> ToolSpec {
        let mut props = serde_json::Map::new();
        let _ = props.insert(
            "pattern".into(),
            json!({"type": "string", "description": "Regular expression to search for"}),
        );
        let _ = props.insert(
            "path".into(),
            json!({"type": "string", "description": "Directory to search (defaults to the workspace root)"}),
        );
        let _ = props.insert(
            "glob".into(),
            json!({"type": "string", "description": "Filename glob filter, e.g. *.rs"}),
        );
        let _ = props.insert(
            "case_insensitive".into(),
            json!({"type": "boolean", "description": "Match case-insensitively"}),
        );
        ToolSpec {
            name: self.name().into(),
            description: "Search file contents with a regular expression".into(),
            parameters: ToolParameterSchema::object(props, vec!["pattern".into()]),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: GrepParams = decode_args(self.name(), args)?;
        let regex = RegexBuilder::new(&params.pattern)
            .case_insensitive(params.case_insensitive)
            .build()
            .map_err(|e| ToolError::invalid_arguments(self.name(), e))?;
        let glob_matcher = match &params.glob {
            Some(glob) => Some(
                Glob::new(glob)
                    .map_err(|e| ToolError::invalid_arguments(self.name(), e))?
                    .compile_matcher(),
            ),
            None => None,
        };

        let root = match &params.path {
            Some(p) => std::path::Path::new(&ctx.working_directory).join(p),
            None => std::path::PathBuf::from(&ctx.working_directory),
        };

        // Search is CPU+disk bound; run it off the async executor.
        let root_display = root.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            for entry in WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| {
                    !e.file_type().is_dir()
                        || e.file_name()
                            .to_str()
                            .is_none_or(|n| !SKIP_DIRS.contains(&n))
                })
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                if let Some(matcher) = &glob_matcher {
                    if !matcher.is_match(entry.file_name().to_string_lossy().as_ref()) {
                        continue;
                    }
                }
                // Binary or unreadable files are skipped silently.
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                for (line_no, line) in content.lines().enumerate() {
                    if regex.is_match(line) {
                        matches.push(format!("{rel}:{}:{line}", line_no + 1));
                        if matches.len() >= MAX_MATCHES {
                            return matches;
                        }
                    }
                }
            }
            matches
        })
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?;

        if matches.is_empty() {
            return Ok(text_output(format!(
                "no matches for pattern in {}",
                root_display.display()
            )));
        }
        let mut text = matches.join("\n");
        if matches.len() >= MAX_MATCHES {
            text.push_str(&format!("\n[stopped at {MAX_MATCHES} matches]"));
        }
        Ok(text_output(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new("tc-1", "run-1", dir.path().to_string_lossy())
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\nstruct X;").unwrap();

        let out = GrepTool
            .execute(json!({"pattern": "fn \\w+"}), &ctx(&dir))
            .await
            .unwrap();
        assert!(out.content.contains("a.rs:1:fn main() {}"));
    }

    #[tokio::test]
    async fn glob_filter_limits_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "needle").unwrap();
        std::fs::write(dir.path().join("b.txt"), "needle").unwrap();

        let out = GrepTool
            .execute(json!({"pattern": "needle", "glob": "*.rs"}), &ctx(&dir))
            .await
            .unwrap();
        assert!(out.content.contains("a.rs"));
        assert!(!out.content.contains("b.txt"));
    }

    #[tokio::test]
    async fn case_insensitive_option() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "NeEdLe").unwrap();

        let out = GrepTool
            .execute(
                json!({"pattern": "needle", "case_insensitive": true}),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert!(out.content.contains("NeEdLe"));
    }

    #[tokio::test]
    async fn no_matches_reports_cleanly() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing here").unwrap();

        let out = GrepTool
            .execute(json!({"pattern": "zzz999"}), &ctx(&dir))
            .await
            .unwrap();
        assert!(out.content.contains("no matches"));
    }

    #[tokio::test]
    async fn invalid_regex_is_argument_error() {
        let dir = TempDir::new().unwrap();
        let err = GrepTool
            .execute(json!({"pattern": "("}), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn skips_git_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "needle").unwrap();
        std::fs::write(dir.path().join("a.txt"), "needle").unwrap();

        let out = GrepTool
            .execute(json!({"pattern": "needle"}), &ctx(&dir))
            .await
            .unwrap();
        assert!(!out.content.contains(".git"));
        assert!(out.content.contains("a.txt"));
    }
}
