use std::time::Duration;

use serde::Deserialize;
use tdship_engine::{OutputConfig, ShipError};

/// Agent configuration: the output plus how events are buffered in front
/// of it.
///
/// ```toml
/// [output]
/// apikey = "..."
/// auto_create_table = true
///
/// [buffer]
/// chunk_limit = 33554432
/// flush_interval = 60
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub output: OutputConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Bytes of encoded records after which a chunk is cut.
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: u64,
    /// Seconds between flushes of partially filled chunks.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
    /// Retries of a chunk after a retryable error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay in milliseconds, doubled per retry.
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
    #[serde(default = "default_retry_max_wait_ms")]
    pub retry_max_wait_ms: u64,
}

fn default_chunk_limit() -> u64 {
    32 * 1024 * 1024
}
fn default_flush_interval() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_wait_ms() -> u64 {
    1_000
}
fn default_retry_max_wait_ms() -> u64 {
    60_000
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_limit: default_chunk_limit(),
            flush_interval: default_flush_interval(),
            max_retries: default_max_retries(),
            retry_wait_ms: default_retry_wait_ms(),
            retry_max_wait_ms: default_retry_max_wait_ms(),
        }
    }
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval.max(1))
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    pub fn retry_max_wait(&self) -> Duration {
        Duration::from_millis(self.retry_max_wait_ms)
    }
}

impl AgentConfig {
    pub fn load(path: &str) -> Result<Self, ShipError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ShipError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    pub fn parse(toml_str: &str) -> Result<Self, ShipError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ShipError::Config(e.to_string()))?;
        config.output.validate()?;
        if config.buffer.chunk_limit == 0 {
            return Err(ShipError::Config("'chunk_limit' must be positive".into()));
        }
        Ok(config)
    }
}
