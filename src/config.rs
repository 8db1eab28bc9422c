//! Configuration management for the ensemble serving core

use crate::models::DEFAULT_ALGORITHMS;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub serving: ServingConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Where model artifacts live and which algorithms to look for
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory scanned for bundles and per-algorithm files
    pub dir: String,
    /// Supported algorithm names, in ensemble order
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,
}

/// Prediction behaviour
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Number of top features attached to each result
    #[serde(default = "default_top_features")]
    pub top_features: usize,
    /// Log and count model calls slower than this (no cancellation)
    #[serde(default)]
    pub slow_model_warn_ms: Option<u64>,
    /// Check for a newer artifact before every prediction
    #[serde(default = "default_reload_on_predict")]
    pub reload_on_predict: bool,
}

impl EngineConfig {
    pub fn slow_model_threshold(&self) -> Option<Duration> {
        self.slow_model_warn_ms.map(Duration::from_millis)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_features: default_top_features(),
            slow_model_warn_ms: None,
            reload_on_predict: default_reload_on_predict(),
        }
    }
}

/// Serving loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServingConfig {
    /// Maximum requests processed concurrently
    pub workers: usize,
    /// Maximum feature vectors in one batch request
    pub batch_size: usize,
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between periodic summaries (0 disables)
    pub report_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

fn default_algorithms() -> Vec<String> {
    DEFAULT_ALGORITHMS.iter().map(|s| s.to_string()).collect()
}

fn default_top_features() -> usize {
    5
}

fn default_reload_on_predict() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            artifacts: ArtifactsConfig {
                dir: "models".to_string(),
                algorithms: default_algorithms(),
            },
            engine: EngineConfig::default(),
            serving: ServingConfig {
                workers: 4,
                batch_size: 256,
            },
            metrics: MetricsConfig {
                report_interval_secs: 60,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
