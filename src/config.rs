//! Configuration management for the BIN processor router

use anyhow::{ensure, Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

use crate::models::gbdt::GbdtParams;
use crate::models::ranker::{RankingOptions, DEFAULT_THRESHOLD, DEFAULT_TOP_N};

/// Processors of the original deployment that are only used as a fallback
pub const DEFAULT_EXTERNAL_PROCESSORS: [&str; 5] = [
    "TWP",
    "TWP (US)",
    "Fin - MID 01",
    "Npay",
    "Dreamzpay - Altitudepay",
];

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub artifacts: ArtifactsConfig,
    pub ranking: RankingConfig,
    pub retraining: RetrainingConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject prediction requests arrive on
    pub request_subject: String,
    /// Where replies go when a request carries no reply subject
    pub response_subject: String,
    /// Queue group shared by router instances; unset subscribes directly
    pub queue_group: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            request_subject: "routing.predict".to_string(),
            response_subject: "routing.predictions".to_string(),
            queue_group: Some("bin-router".to_string()),
        }
    }
}

/// Model artifact location and reload policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Directory holding versioned artifacts and `latest.json`
    pub models_dir: String,
    /// Seconds between checks for a newly published model; 0 disables
    pub reload_interval_secs: u64,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            reload_interval_secs: 60,
        }
    }
}

/// Ranking defaults; requests may override threshold and top-N
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub threshold: f64,
    pub top_n: usize,
    /// Display names of fallback-only processors
    pub external_processors: Vec<String>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_n: DEFAULT_TOP_N,
            external_processors: DEFAULT_EXTERNAL_PROCESSORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RankingConfig {
    pub fn options(&self) -> RankingOptions {
        RankingOptions {
            threshold: self.threshold,
            top_n: self.top_n,
        }
    }
}

/// Retraining inputs, outputs and model parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrainingConfig {
    /// Accumulated training records
    pub base_data_path: String,
    /// Records that arrived since the last run
    pub new_data_path: String,
    /// Directory for monthly archives of consumed batches
    pub archive_dir: String,
    /// JSON object mapping processor display names to encoded ids
    pub processor_names_path: String,
    /// Processors seen fewer times are left out of training
    pub min_processor_support: usize,
    pub gbdt: GbdtParams,
}

impl Default for RetrainingConfig {
    fn default() -> Self {
        Self {
            base_data_path: "data/base_data.csv".to_string(),
            new_data_path: "data/new_data.csv".to_string(),
            archive_dir: "data/archive".to_string(),
            processor_names_path: "data/processor_name_mapping.json".to_string(),
            min_processor_support: 10,
            gbdt: GbdtParams::default(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Requests handled concurrently
    pub workers: usize,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
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

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.ranking.threshold),
            "ranking.threshold must be within [0, 1], got {}",
            self.ranking.threshold
        );
        ensure!(self.ranking.top_n >= 1, "ranking.top_n must be at least 1");
        ensure!(
            self.retraining.min_processor_support >= 1,
            "retraining.min_processor_support must be at least 1"
        );
        ensure!(self.pipeline.workers >= 1, "pipeline.workers must be at least 1");
        self.retraining
            .gbdt
            .validate()
            .map_err(|e| anyhow::anyhow!("retraining.gbdt: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.request_subject, "routing.predict");
        assert_eq!(config.nats.queue_group.as_deref(), Some("bin-router"));
        assert_eq!(config.ranking.threshold, 0.80);
        assert_eq!(config.ranking.top_n, 5);
        assert_eq!(config.ranking.external_processors.len(), 5);
        assert_eq!(config.retraining.min_processor_support, 10);
        assert_eq!(config.retraining.gbdt.num_trees, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(
            r#"
[ranking]
threshold = 0.75
external_processors = ["Npay"]

[retraining.gbdt]
num_trees = 50
"#,
        );

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.ranking.threshold, 0.75);
        assert_eq!(config.ranking.top_n, 5);
        assert_eq!(config.ranking.external_processors, vec!["Npay"]);
        assert_eq!(config.retraining.gbdt.num_trees, 50);
        assert_eq!(config.retraining.gbdt.max_depth, 5);
        assert_eq!(config.artifacts.models_dir, "models");
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let file = write_config("[ranking]\nthreshold = 1.5\n");
        assert!(AppConfig::load_from_path(file.path()).is_err());
    }
}
