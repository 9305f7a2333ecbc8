use crate::error::{EngineError, EngineResult};
use crate::types::PValueMethod;
use serde::Deserialize;
use std::path::Path;

/// Root application configuration. Loaded from environment variables
/// with the prefix `EXPERIMENT_LAB__`, optionally layered over a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Seed mixed into every bucket computation, for experiments and flags
    /// alike. Changing it reshuffles every user.
    #[serde(default = "default_bucketing_seed")]
    pub bucketing_seed: String,
    #[serde(default)]
    pub experiments: ExperimentConfig,
    #[serde(default)]
    pub flags: FlagConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
    #[serde(default = "default_min_sample_size")]
    pub default_min_sample_size: u64,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default)]
    pub p_value_method: PValueMethod,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FlagConfig {
    /// When set, a user override wins even on a disabled flag.
    #[serde(default)]
    pub overrides_bypass_disabled: bool,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_bucketing_seed() -> String {
    "experiment-engine-v1".to_string()
}
fn default_max_variants() -> usize {
    10
}
fn default_min_sample_size() -> u64 {
    100
}
fn default_confidence_level() -> f64 {
    0.95
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            max_variants: default_max_variants(),
            default_min_sample_size: default_min_sample_size(),
            confidence_level: default_confidence_level(),
            p_value_method: PValueMethod::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            bucketing_seed: default_bucketing_seed(),
            experiments: ExperimentConfig::default(),
            flags: FlagConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> EngineResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file overlaid by environment
    /// variables, then validate it.
    pub fn load_from(path: Option<&Path>) -> EngineResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("EXPERIMENT_LAB")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.bucketing_seed.trim().is_empty() {
            return Err(EngineError::Config(
                "bucketing_seed must not be empty".to_string(),
            ));
        }
        if self.experiments.max_variants < 2 {
            return Err(EngineError::Config(format!(
                "experiments.max_variants must be at least 2, got {}",
                self.experiments.max_variants
            )));
        }
        let level = self.experiments.confidence_level;
        if !(level > 0.0 && level < 1.0) {
            return Err(EngineError::Config(format!(
                "experiments.confidence_level must be in (0, 1), got {level}"
            )));
        }
        Ok(())
    }
}
