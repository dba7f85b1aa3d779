//! Semaphore configuration that downstream crates can serialize/deserialize.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resources::Resources;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemaphoreConfig {
    /// Name used in error messages and log events.
    pub name: String,

    /// Maximum number of concurrently admitted reads.
    pub count: i64,

    /// Memory (in bytes) the admitted reads' buffers may hold in aggregate.
    pub memory_bytes: i64,

    /// Admissions that may wait in the queue before new ones are rejected
    /// with an overload error.
    pub max_queue_length: usize,

    /// Default admission timeout for callers that do not carry their own deadline.
    pub default_timeout_ms: u64,
}

impl Default for SemaphoreConfig {
    fn default() -> Self {
        Self {
            name: "reads".to_string(),
            count: 100,
            memory_bytes: 64 * 1024 * 1024, // 64 MiB default
            max_queue_length: 1000,
            default_timeout_ms: 10_000,
        }
    }
}

impl SemaphoreConfig {
    /// Build from defaults, then override from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("READGATE_NAME") {
            if !s.trim().is_empty() {
                cfg.name = s;
            }
        }

        if let Ok(s) = std::env::var("READGATE_COUNT") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.count = v;
            }
        }

        if let Ok(s) = std::env::var("READGATE_MEMORY_BYTES") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.memory_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("READGATE_MAX_QUEUE_LENGTH") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_queue_length = v;
            }
        }

        if let Ok(s) = std::env::var("READGATE_TIMEOUT_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.default_timeout_ms = v;
            }
        }

        cfg
    }

    /// Parse a JSON document, filling missing fields with defaults.
    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.count <= 0 {
            return Err(Error::Config(format!(
                "count must be positive, got {}",
                self.count
            )));
        }
        if self.memory_bytes <= 0 {
            return Err(Error::Config(format!(
                "memory_bytes must be positive, got {}",
                self.memory_bytes
            )));
        }
        Ok(())
    }

    /// Total resources the semaphore starts with.
    pub fn initial_resources(&self) -> Resources {
        Resources::new(self.count, self.memory_bytes)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SemaphoreConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.initial_resources(), Resources::new(100, 64 * 1024 * 1024));
        assert_eq!(cfg.default_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = SemaphoreConfig::from_json(r#"{"name":"user","count":4}"#).unwrap();
        assert_eq!(cfg.name, "user");
        assert_eq!(cfg.count, 4);
        assert_eq!(cfg.max_queue_length, SemaphoreConfig::default().max_queue_length);
    }

    #[test]
    fn rejects_non_positive_limits() {
        assert!(SemaphoreConfig::from_json(r#"{"count":0}"#).is_err());
        assert!(SemaphoreConfig::from_json(r#"{"memory_bytes":-5}"#).is_err());
        assert!(SemaphoreConfig::from_json("not json").is_err());
    }
}
