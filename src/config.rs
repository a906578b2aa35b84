use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::pipeline::processing::extraction::ExtractionConfig;
use crate::pipeline::processing::normalize::noise::NoiseConfig;
use crate::pipeline::processing::queue::QueueConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

/// Top-level pipeline configuration, loaded once at startup and passed down.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub noise: NoiseConfig,
    pub queue: QueueConfig,
    pub extraction: ExtractionConfig,
    pub metrics: MetricsConfig,
}

/// Locations of every stage table. Each stage owns its output path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_reviews: PathBuf,
    pub normalized: PathBuf,
    pub deduped: PathBuf,
    pub tagged: PathBuf,
    pub queue: PathBuf,
    pub extraction_results: PathBuf,
    pub extraction_items: PathBuf,
    pub analysis_dir: PathBuf,
    /// Lexicon file; the bundled lexicon is used when unset
    pub lexicon: Option<PathBuf>,
    pub log_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_reviews: PathBuf::from("data/raw/reviews.ndjson"),
            normalized: PathBuf::from("data/processed/reviews_normalized.ndjson"),
            deduped: PathBuf::from("data/processed/reviews_dedup.ndjson"),
            tagged: PathBuf::from("data/processed/reviews_tagged.ndjson"),
            queue: PathBuf::from("data/llm/llm_queue.ndjson"),
            extraction_results: PathBuf::from("data/llm/llm_results.ndjson"),
            extraction_items: PathBuf::from("data/llm/llm_items.ndjson"),
            analysis_dir: PathBuf::from("data/analysis"),
            lexicon: None,
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint, e.g. "127.0.0.1:9000"
    pub listen_addr: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Loads the file when present, otherwise falls back to built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.extraction.batch_size == 0 {
            return Err(PipelineError::Config(
                "extraction.batch_size must be at least 1".to_string(),
            ));
        }
        if self.extraction.models.is_empty() {
            return Err(PipelineError::Config(
                "extraction.models must name at least one model".to_string(),
            ));
        }
        if self.queue.max_chars < 16 {
            return Err(PipelineError::Config(format!(
                "queue.max_chars too small: {}",
                self.queue.max_chars
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.queue.max_golden, 1500);
        assert_eq!(config.queue.seed, 42);
        assert_eq!(config.extraction.batch_size, 10);
        assert_eq!(config.noise.min_content_chars, 15);
        assert!(config.paths.lexicon.is_none());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml(
            r#"
            [queue]
            max_random = 50

            [paths]
            lexicon = "custom/lexicon.toml"
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.max_random, 50);
        assert_eq!(config.queue.max_low, 1500);
        assert_eq!(
            config.paths.lexicon,
            Some(PathBuf::from("custom/lexicon.toml"))
        );
    }

    #[test]
    fn test_invalid_batch_size_rejected() {
        let err = Config::from_toml("[extraction]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
