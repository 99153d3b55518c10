//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (KINEMA_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use kinema_core::{PipelineConfig, DEFAULT_SUBSCRIBER_BUFFER};
use kinema_model::SkeletonMode;
use kinema_store::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Ingest pipeline configuration.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path; `:memory:` for an ephemeral store.
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Ingest pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Minimum interval between live broadcasts per user, in milliseconds.
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_ms: u64,

    /// Require a full pose skeleton (≥ 25 points) per frame.
    #[serde(default)]
    pub require_full_skeleton: bool,

    /// Per-subscriber mailbox capacity.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Page size used when a list call does not specify one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("KINEMA_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("KINEMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8090)
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "kinema.db".to_string()
}

fn default_broadcast_interval() -> u64 {
    500
}

fn default_subscriber_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: DatabaseConfig::default(),
            ingest: IngestConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: default_broadcast_interval(),
            require_full_skeleton: false,
            subscriber_buffer: default_subscriber_buffer(),
            default_page_size: default_page_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "kinema.toml",
            "/etc/kinema/kinema.toml",
            "~/.config/kinema/kinema.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host:port")
    }

    /// Pipeline tuning derived from the ingest section.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            broadcast_interval: Duration::from_millis(self.ingest.broadcast_interval_ms),
            skeleton_mode: if self.ingest.require_full_skeleton {
                SkeletonMode::FullSkeleton
            } else {
                SkeletonMode::AnyPose
            },
            subscriber_buffer: self.ingest.subscriber_buffer,
        }
    }
}
