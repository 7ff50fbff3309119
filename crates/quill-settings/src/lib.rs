//! # quill-settings
//!
//! Configuration for the Quill agent.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `QUILL_`-prefixed environment overrides (highest priority)
//!
//! Deep merge rules: objects merge recursively (file overrides defaults
//! per key), arrays and primitives are replaced entirely, nulls in the
//! file are skipped.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Errors from settings loading.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file (or merged result) was not valid.
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Approval gate configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalSettings {
    /// Tools approved without prompting, persisted across runs.
    pub always_allowed: Vec<String>,
    /// Substrings marking a terminal command as sensitive. Sensitive
    /// commands always prompt, even under YOLO.
    pub sensitive_commands: Vec<String>,
    /// Auto-approve every non-sensitive tool call.
    pub yolo: bool,
    /// Where the persisted always-approved set lives.
    pub store_path: Option<PathBuf>,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            always_allowed: Vec::new(),
            sensitive_commands: vec![
                "rm -rf".into(),
                "sudo ".into(),
                "git push --force".into(),
                "mkfs".into(),
                "> /dev/".into(),
            ],
            yolo: false,
            store_path: None,
        }
    }
}

/// Hook rule file locations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HookSettings {
    /// Project-scope rule file (overrides global per point).
    pub project_path: Option<PathBuf>,
    /// Global-scope rule file.
    pub global_path: Option<PathBuf>,
}

/// A user-defined sub-agent spec. Specs sharing a built-in id fully
/// shadow the built-in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentSpecConfig {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Tool allow-list (exact or hyphen-prefix entries).
    pub allowed_tools: Vec<String>,
    /// Role text appended to the delegated prompt.
    #[serde(default)]
    pub role: Option<String>,
}

/// Per-provider endpoints and credential env names.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// OpenAI-compatible base URL.
    pub openai_base_url: String,
    /// Gemini base URL.
    pub google_base_url: String,
    /// Anthropic base URL.
    pub anthropic_base_url: String,
    /// Env var holding the OpenAI API key.
    pub openai_api_key_env: String,
    /// Env var holding the Google API key.
    pub google_api_key_env: String,
    /// Env var holding the Anthropic API key.
    pub anthropic_api_key_env: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".into(),
            google_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            anthropic_base_url: "https://api.anthropic.com".into(),
            openai_api_key_env: "OPENAI_API_KEY".into(),
            google_api_key_env: "GEMINI_API_KEY".into(),
            anthropic_api_key_env: "ANTHROPIC_API_KEY".into(),
        }
    }
}

/// Top-level settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Main conversational model.
    pub model: String,
    /// Compact model for hook prompt actions and compression.
    pub compact_model: String,
    /// Input-token ceiling that triggers compression.
    pub max_context_tokens: u64,
    /// Turn-count backstop per run.
    pub max_turns: u32,
    /// Tool result ceiling in tokens.
    pub tool_output_token_limit: u64,
    /// Approval gate configuration.
    pub approval: ApprovalSettings,
    /// Hook rule file locations.
    pub hooks: HookSettings,
    /// User-defined sub-agent specs.
    pub subagents: Vec<SubagentSpecConfig>,
    /// Provider endpoints and credentials.
    pub providers: ProviderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".into(),
            compact_model: "claude-haiku-4-5".into(),
            max_context_tokens: 160_000,
            max_turns: 50,
            tool_output_token_limit: 100_000,
            approval: ApprovalSettings::default(),
            hooks: HookSettings::default(),
            subagents: Vec::new(),
            providers: ProviderSettings::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Default settings file path (`~/.quill/settings.json`).
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
    PathBuf::from(home).join(".quill").join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load() -> Result<Settings, SettingsError> {
    load_from_path(&settings_path())
}

/// Load settings from a specific path with env overrides.
///
/// A missing file yields defaults; an unparseable file is an error.
pub fn load_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge: objects merge per key, nulls in `source` are
/// skipped, everything else is replaced by `source`.
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `QUILL_`-prefixed environment overrides.
///
/// Invalid values are ignored, falling back to file/default values.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = std::env::var("QUILL_MODEL") {
        if !v.trim().is_empty() {
            settings.model = v;
        }
    }
    if let Ok(v) = std::env::var("QUILL_COMPACT_MODEL") {
        if !v.trim().is_empty() {
            settings.compact_model = v;
        }
    }
    if let Some(v) = read_env_u64("QUILL_MAX_CONTEXT_TOKENS") {
        settings.max_context_tokens = v;
    }
    if let Some(v) = read_env_u64("QUILL_TOOL_OUTPUT_TOKEN_LIMIT") {
        settings.tool_output_token_limit = v;
    }
    if let Some(v) = read_env_u64("QUILL_MAX_TURNS") {
        settings.max_turns = u32::try_from(v).unwrap_or(settings.max_turns);
    }
    if let Some(v) = read_env_bool("QUILL_YOLO") {
        settings.approval.yolo = v;
    }
}

fn read_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn read_env_bool(name: &str) -> Option<bool> {
    parse_bool(&std::env::var(name).ok()?)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
