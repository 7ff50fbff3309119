//! Filesystem tools: read, write, edit.
//!
//! Paths resolve against the call context's working directory when
//! relative. Reads are line-windowed so the model can page through large
//! files instead of pulling them whole.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quill_core::tools::{ToolOutput, ToolParameterSchema, ToolSpec, text_output};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::ToolError;
use crate::traits::{AgentTool, ToolContext, decode_args};

/// Maximum lines returned by a single read when no limit is given.
const DEFAULT_READ_LIMIT: usize = 2000;

fn resolve(working_directory: &str, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        Path::new(working_directory).join(p)
    }
}

fn string_prop(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

// ─────────────────────────────────────────────────────────────────────────────
// filesystem-read
// ─────────────────────────────────────────────────────────────────────────────

/// Read a file, optionally windowed by line offset and limit.
pub struct FileReadTool;

#[derive(Deserialize)]
struct ReadParams {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl AgentTool for FileReadTool {
    fn name(&self) -> &str {
        "filesystem-read"
    }

    fn spec(&self) -> ToolSpec {
        let mut props = serde_json::Map::new();
        let _ = props.insert("path".into(), string_prop("File path to read"));
        let _ = props.insert(
            "offset".into(),
            json!({"type": "integer", "description": "1-based first line to return"}),
        );
        let _ = props.insert(
            "limit".into(),
            json!({"type": "integer", "description": "Maximum number of lines to return"}),
        );
        ToolSpec {
            name: self.name().into(),
            description: "Read a file from the workspace, optionally a line range".into(),
            parameters: ToolParameterSchema::object(props, vec!["path".into()]),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: ReadParams = decode_args(self.name(), args)?;
        let path = resolve(&ctx.working_directory, &params.path);
        let content = tokio::fs::read_to_string(&path).await?;

        let offset = params.offset.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(DEFAULT_READ_LIMIT);
        let total = content.lines().count();
        let window: Vec<&str> = content.lines().skip(offset - 1).take(limit).collect();

        let mut text = window.join("\n");
        if offset - 1 + window.len() < total {
            text.push_str(&format!(
                "\n[showing lines {}-{} of {}]",
                offset,
                offset - 1 + window.len(),
                total
            ));
        }
        Ok(text_output(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// filesystem-write
// ─────────────────────────────────────────────────────────────────────────────

/// Create or overwrite a file.
pub struct FileWriteTool;

#[derive(Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

#[async_trait]
impl AgentTool for FileWriteTool {
    fn name(&self) -> &str {
        "filesystem-write"
    }

    fn spec(&self) -> ToolSpec {
        let mut props = serde_json::Map::new();
        let _ = props.insert("path".into(), string_prop("File path to write"));
        let _ = props.insert("content".into(), string_prop("Full file content"));
        ToolSpec {
            name: self.name().into(),
            description: "Create or overwrite a file with the given content".into(),
            parameters: ToolParameterSchema::object(
                props,
                vec!["path".into(), "content".into()],
            ),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: WriteParams = decode_args(self.name(), args)?;
        let path = resolve(&ctx.working_directory, &params.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &params.content).await?;
        Ok(text_output(format!(
            "wrote {} bytes to {}",
            params.content.len(),
            params.path
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// filesystem-edit
// ─────────────────────────────────────────────────────────────────────────────

/// Replace an exact string occurrence in a file.
pub struct FileEditTool;

#[derive(Deserialize)]
struct EditParams {
    path: String,
    old_string: String,
    new_string: String,
}

#[async_trait]
impl AgentTool for FileEditTool {
    fn name(&self) -> &str {
        "filesystem-edit"
    }

    fn spec(&self) -> ToolSpec {
        let mut props = serde_json::Map::new();
        let _ = props.insert("path".into(), string_prop("File path to edit"));
        let _ = props.insert(
            "old_string".into(),
            string_prop("Exact text to replace (must occur exactly once)"),
        );
        let _ = props.insert("new_string".into(), string_prop("Replacement text"));
        ToolSpec {
            name: self.name().into(),
            description: "Replace one exact occurrence of a string in a file".into(),
            parameters: ToolParameterSchema::object(
                props,
                vec!["path".into(), "old_string".into(), "new_string".into()],
            ),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: EditParams = decode_args(self.name(), args)?;
        let path = resolve(&ctx.working_directory, &params.path);
        let content = tokio::fs::read_to_string(&path).await?;

        let occurrences = content.matches(&params.old_string).count();
        if occurrences == 0 {
            return Err(ToolError::Execution(format!(
                "old_string not found in {}",
                params.path
            )));
        }
        if occurrences > 1 {
            return Err(ToolError::Execution(format!(
                "old_string occurs {occurrences} times in {}; provide more context",
                params.path
            )));
        }

        let updated = content.replacen(&params.old_string, &params.new_string, 1);
        tokio::fs::write(&path, updated).await?;
        Ok(text_output(format!("edited {}", params.path)))
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
    async fn read_whole_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree").unwrap();

        let out = FileReadTool
            .execute(json!({"path": "a.txt"}), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(out.content, "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn read_windowed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "1\n2\n3\n4\n5").unwrap();

        let out = FileReadTool
            .execute(json!({"path": "a.txt", "offset": 2, "limit": 2}), &ctx(&dir))
            .await
            .unwrap();
        assert!(out.content.starts_with("2\n3"));
        assert!(out.content.contains("[showing lines 2-3 of 5]"));
    }

    #[tokio::test]
    async fn read_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = FileReadTool
            .execute(json!({"path": "missing.txt"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }

    #[tokio::test]
    async fn read_rejects_bad_args() {
        let dir = TempDir::new().unwrap();
        let err = FileReadTool
            .execute(json!({"paht": "typo"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let out = FileWriteTool
            .execute(
                json!({"path": "sub/dir/b.txt", "content": "hello"}),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert!(out.content.contains("5 bytes"));
        let written = std::fs::read_to_string(dir.path().join("sub/dir/b.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn edit_replaces_unique_occurrence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("c.txt"), "let x = 1;").unwrap();

        let _ = FileEditTool
            .execute(
                json!({"path": "c.txt", "old_string": "x = 1", "new_string": "x = 2"}),
                &ctx(&dir),
            )
            .await
            .unwrap();
        let updated = std::fs::read_to_string(dir.path().join("c.txt")).unwrap();
        assert_eq!(updated, "let x = 2;");
    }

    #[tokio::test]
    async fn edit_rejects_missing_string() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("c.txt"), "abc").unwrap();

        let err = FileEditTool
            .execute(
                json!({"path": "c.txt", "old_string": "zzz", "new_string": "y"}),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn edit_rejects_ambiguous_string() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("c.txt"), "aa aa").unwrap();

        let err = FileEditTool
            .execute(
                json!({"path": "c.txt", "old_string": "aa", "new_string": "b"}),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 times"));
    }

    #[test]
    fn specs_have_required_fields() {
        for spec in [FileReadTool.spec(), FileWriteTool.spec(), FileEditTool.spec()] {
            assert!(spec.parameters.required.is_some());
        }
    }
}
