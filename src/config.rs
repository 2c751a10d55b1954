//! Engine Configuration
//!
//! Tunables for queues, pools, retry and shutdown behavior. Values come
//! from `Default`, from a TOML file, or from the embedding application
//! building the struct directly. Every field has a working default so an
//! empty file is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for one engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded capacity of each action queue
    pub queue_capacity: usize,

    /// One bounded send attempt while enqueueing; retried until shutdown
    pub enqueue_timeout_ms: u64,

    /// Worker cap for the inbound (fetch) pool
    pub inbound_notelings: usize,

    /// Worker cap for the outbound (delivery) pool
    pub outbound_notelings: usize,

    /// How long the dispatch loop waits for a free worker per attempt
    pub acquire_timeout_ms: u64,

    /// Delay before a retryable action is re-submitted
    pub retry_delay_ms: u64,

    /// Reschedules allowed before an action is abandoned
    pub retry_ceiling: u32,

    /// Consecutive fatal failures before a dispatch loop terminates
    pub max_consecutive_failures: u32,

    /// Grace period for dispatch loops to finish after a stop request
    pub shutdown_grace_ms: u64,

    /// Maximum wait for active workers to drain at shutdown
    pub drain_wait_ms: u64,

    /// Interval between drain progress log lines
    pub drain_log_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            enqueue_timeout_ms: 500,
            inbound_notelings: 10,
            outbound_notelings: 10,
            acquire_timeout_ms: 1_000,
            retry_delay_ms: 60_000,
            retry_ceiling: 10,
            max_consecutive_failures: 10,
            shutdown_grace_ms: 5_000,
            drain_wait_ms: 30_000,
            drain_log_interval_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        log::info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be greater than 0".to_string());
        }

        if self.enqueue_timeout_ms == 0 {
            return Err("Enqueue timeout must be greater than 0".to_string());
        }

        if self.inbound_notelings == 0 || self.outbound_notelings == 0 {
            return Err("Noteling pools must allow at least one worker".to_string());
        }

        if self.acquire_timeout_ms == 0 {
            return Err("Acquire timeout must be greater than 0".to_string());
        }

        if self.max_consecutive_failures == 0 {
            return Err("Consecutive failure threshold must be greater than 0".to_string());
        }

        if self.drain_log_interval_ms == 0 || self.drain_log_interval_ms > self.drain_wait_ms {
            return Err(
                "Drain log interval must be nonzero and within the drain wait".to_string(),
            );
        }

        Ok(())
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_millis(self.drain_wait_ms)
    }

    pub fn drain_log_interval(&self) -> Duration {
        Duration::from_millis(self.drain_log_interval_ms)
    }
}
