//! Configuration management
//!
//! Handles loading and validating send path configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Demo server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to accept clients on
    pub bind_addr: SocketAddr,
    /// Interval between heartbeat packets in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Per-connection send path configuration.
///
/// Fixed at construction; a running path never observes changes.
#[derive(Debug, Clone, Deserialize)]
pub struct SendConfig {
    /// Bytes per small block
    #[serde(default = "default_small_block_size")]
    pub small_block_size: usize,
    /// Bytes per large block
    #[serde(default = "default_large_block_size")]
    pub large_block_size: usize,
    /// Number of small blocks
    #[serde(default = "default_small_block_count")]
    pub small_block_count: usize,
    /// Number of large blocks
    #[serde(default = "default_large_block_count")]
    pub large_block_count: usize,
    /// Transport write timeout in milliseconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    /// How long shutdown waits for the writer thread, per attempt
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,
}

impl SendConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Validate block geometry and timeouts
    pub fn validate(&self) -> Result<()> {
        if self.small_block_count == 0 || self.large_block_count == 0 {
            anyhow::bail!("block counts must be > 0");
        }
        if self.small_block_size < crate::protocol::HEADER_LEN {
            anyhow::bail!(
                "small_block_size must hold at least a {}-byte header",
                crate::protocol::HEADER_LEN
            );
        }
        if self.small_block_size >= self.large_block_size {
            anyhow::bail!("small_block_size must be < large_block_size");
        }
        if self.large_block_size > u16::MAX as usize {
            anyhow::bail!("large_block_size must fit a 16-bit length prefix");
        }
        let small_arena = self.small_block_size.checked_mul(self.small_block_count);
        let large_arena = self.large_block_size.checked_mul(self.large_block_count);
        if small_arena.is_none() || large_arena.is_none() {
            anyhow::bail!("block size * block count overflows the arena size");
        }
        if self.write_timeout_ms == 0 || self.join_timeout_ms == 0 {
            anyhow::bail!("timeouts must be > 0");
        }
        Ok(())
    }
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            small_block_size: default_small_block_size(),
            large_block_size: default_large_block_size(),
            small_block_count: default_small_block_count(),
            large_block_count: default_large_block_count(),
            write_timeout_ms: default_write_timeout(),
            join_timeout_ms: default_join_timeout(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics server bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_heartbeat_interval() -> u64 { 1000 }
fn default_small_block_size() -> usize { 128 }
fn default_large_block_size() -> usize { 16384 }
fn default_small_block_count() -> usize { 4096 }
fn default_large_block_count() -> usize { 192 }
fn default_write_timeout() -> u64 { 5000 }
fn default_join_timeout() -> u64 { 2000 }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        self.send.validate().context("invalid [send] section")?;
        if self.server.heartbeat_interval_ms == 0 {
            anyhow::bail!("heartbeat_interval_ms must be > 0");
        }
        Ok(())
    }
}
