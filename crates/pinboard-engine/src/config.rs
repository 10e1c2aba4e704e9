//! Engine configuration.
//!
//! TOML file with serde defaults, plus environment overrides
//! (`PB_*`). Tunables cover the retry/backoff policy, the hydration
//! dedup window, and the flush debounce/safety-net cadence.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    /// Concurrent hydration callers within this window share a fetch.
    pub dedup_window_ms: u64,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Debounce between a mutation and the flush it schedules.
    pub debounce_ms: u64,
    /// Periodic safety-net flush cadence.
    pub interval_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub hydration: HydrationConfig,
    pub flush: FlushConfig,
}

impl EngineConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.hydration.dedup_window_ms)
    }

    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush.debounce_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush.interval_ms)
    }
}

/// Load config from a TOML file, falling back to defaults when the
/// file is absent, then apply env overrides.
pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
    let mut config = if path.exists() {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        EngineConfig::default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn apply_env_overrides(config: &mut EngineConfig) {
    override_u64("PB_BACKOFF_BASE_MS", &mut config.retry.backoff_base_ms);
    override_u64("PB_BACKOFF_MAX_MS", &mut config.retry.backoff_max_ms);
    override_u32("PB_MAX_ATTEMPTS", &mut config.retry.max_attempts);
    override_u64(
        "PB_HYDRATION_DEDUP_WINDOW_MS",
        &mut config.hydration.dedup_window_ms,
    );
    override_u64("PB_FLUSH_DEBOUNCE_MS", &mut config.flush.debounce_ms);
    override_u64("PB_FLUSH_INTERVAL_MS", &mut config.flush.interval_ms);
}

fn override_u64(name: &str, slot: &mut u64) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) => *slot = value,
        Err(err) => tracing::warn!("invalid {name}, ignoring: {err}"),
    }
}

fn override_u32(name: &str, slot: &mut u32) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.trim().parse::<u32>() {
        Ok(value) => *slot = value,
        Err(err) => tracing::warn!("invalid {name}, ignoring: {err}"),
    }
}
