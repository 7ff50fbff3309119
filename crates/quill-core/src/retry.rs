//! Retry configuration and backoff math.
//!
//! The portable building blocks for retry logic. The async retry execution
//! lives in `quill-llm` (which wraps provider streams); this module holds
//! the config type and the delay calculation.

use serde::{Deserialize, Serialize};

/// Default maximum retries.
pub const DEFAULT_MAX_RETRIES: u32 = 4;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 ± jitter)`.
/// `attempt` is one-based (the first retry passes 1).
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms(attempt: u32, config: &RetryConfig) -> u64 {
    let exp = attempt.saturating_sub(1).min(31);
    let base = config
        .base_delay_ms
        .saturating_mul(1u64 << exp)
        .min(config.max_delay_ms);
    if config.jitter_factor <= 0.0 {
        return base;
    }
    let spread = config.jitter_factor.clamp(0.0, 1.0);
    let factor = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * spread;
    ((base as f64) * factor).max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.base_delay_ms, DEFAULT_BASE_DELAY_MS);
        assert_eq!(config.max_delay_ms, DEFAULT_MAX_DELAY_MS);
    }

    #[test]
    fn config_serde_applies_field_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn backoff_doubles_without_jitter() {
        let config = no_jitter();
        assert_eq!(backoff_delay_ms(1, &config), 1000);
        assert_eq!(backoff_delay_ms(2, &config), 2000);
        assert_eq!(backoff_delay_ms(3, &config), 4000);
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = no_jitter();
        assert_eq!(backoff_delay_ms(10, &config), DEFAULT_MAX_DELAY_MS);
        // Huge attempt values must not overflow.
        assert_eq!(backoff_delay_ms(u32::MAX, &config), DEFAULT_MAX_DELAY_MS);
    }

    #[test]
    fn backoff_jitter_stays_in_band() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let delay = backoff_delay_ms(2, &config);
            // 2000ms ± 20%
            assert!((1600..=2400).contains(&delay), "delay {delay} out of band");
        }
    }
}
