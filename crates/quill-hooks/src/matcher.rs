//! Rule selector evaluation.
//!
//! A matcher is a comma-separated OR of tests. Each test is either
//! `key:pattern` — the pattern's `*` wildcards become an anchored
//! case-insensitive regex tested against the stringified context value —
//! or a bare pattern, tested for substring containment in the
//! JSON-serialized context. An absent matcher always matches.

use regex::RegexBuilder;
use serde_json::{Map, Value};
use tracing::warn;

/// Evaluate a rule's matcher against a context map.
#[must_use]
pub fn rule_matches(matcher: Option<&str>, context: &Map<String, Value>) -> bool {
    let Some(matcher) = matcher else {
        return true;
    };
    let matcher = matcher.trim();
    if matcher.is_empty() {
        return true;
    }
    matcher
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .any(|test| single_test(test, context))
}

fn single_test(test: &str, context: &Map<String, Value>) -> bool {
    if let Some((key, pattern)) = test.split_once(':') {
        let Some(value) = context.get(key.trim()) else {
            return false;
        };
        return glob_matches(pattern.trim(), &stringify(value));
    }
    // Bare pattern: substring of the serialized context.
    let serialized = Value::Object(context.clone()).to_string();
    serialized.contains(test)
}

/// Stringify a context value the way a dynamic-language `String()` would:
/// strings stay bare, everything else uses its JSON rendering.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Test a `*`-wildcard pattern, anchored and case-insensitive.
fn glob_matches(pattern: &str, value: &str) -> bool {
    let mut regex_text = String::with_capacity(pattern.len() + 8);
    regex_text.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            regex_text.push_str(".*");
        } else {
            regex_text.push_str(&regex::escape(&ch.to_string()));
        }
    }
    regex_text.push('$');

    match RegexBuilder::new(&regex_text).case_insensitive(true).build() {
        Ok(re) => re.is_match(value),
        Err(e) => {
            warn!(pattern, error = %e, "unusable matcher pattern");
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn absent_matcher_always_matches() {
        assert!(rule_matches(None, &ctx(&[])));
        assert!(rule_matches(Some(""), &ctx(&[])));
        assert!(rule_matches(Some("   "), &ctx(&[])));
    }

    #[test]
    fn key_glob_exact() {
        let context = ctx(&[("toolName", json!("terminal-execute"))]);
        assert!(rule_matches(Some("toolName:terminal-execute"), &context));
        assert!(!rule_matches(Some("toolName:filesystem-read"), &context));
    }

    #[test]
    fn key_glob_wildcard() {
        let context = ctx(&[("toolName", json!("filesystem-read"))]);
        assert!(rule_matches(Some("toolName:filesystem-*"), &context));
        assert!(rule_matches(Some("toolName:*-read"), &context));
        assert!(!rule_matches(Some("toolName:terminal-*"), &context));
    }

    #[test]
    fn key_glob_case_insensitive() {
        let context = ctx(&[("toolName", json!("Terminal-Execute"))]);
        assert!(rule_matches(Some("toolName:terminal-execute"), &context));
    }

    #[test]
    fn key_glob_is_anchored() {
        let context = ctx(&[("toolName", json!("terminal-execute"))]);
        // Unanchored substring must not match without wildcards.
        assert!(!rule_matches(Some("toolName:terminal"), &context));
    }

    #[test]
    fn missing_key_never_matches() {
        let context = ctx(&[("other", json!("x"))]);
        assert!(!rule_matches(Some("toolName:*"), &context));
    }

    #[test]
    fn non_string_values_stringified() {
        let context = ctx(&[("exitCode", json!(2))]);
        assert!(rule_matches(Some("exitCode:2"), &context));
    }

    #[test]
    fn comma_is_or() {
        let context = ctx(&[("toolName", json!("search-grep"))]);
        assert!(rule_matches(
            Some("toolName:terminal-*, toolName:search-*"),
            &context
        ));
        assert!(!rule_matches(
            Some("toolName:terminal-*, toolName:filesystem-*"),
            &context
        ));
    }

    #[test]
    fn bare_pattern_is_substring_of_serialized_context() {
        let context = ctx(&[("arguments", json!({"path": "src/main.rs"}))]);
        assert!(rule_matches(Some("main.rs"), &context));
        assert!(!rule_matches(Some("nonexistent.rs"), &context));
    }

    #[test]
    fn regex_metachars_in_pattern_are_literal() {
        let context = ctx(&[("toolName", json!("a.b"))]);
        assert!(rule_matches(Some("toolName:a.b"), &context));
        // The dot is literal, not "any char".
        assert!(!rule_matches(Some("toolName:axb"), &context));
    }
}
