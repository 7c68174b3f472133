//! Configuration structures for Hydra
//!
//! Files are JSON or YAML, chosen by extension. Every section has defaults, so
//! a config file only needs the values it changes.

use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::search::{BayesianConfig, Direction, SearchSpace, StrategyKind};
use crate::training::config::{OptimizerConfig, TrainingParams};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydraConfig {
    /// Network settings
    pub model: ModelConfig,
    /// Dataset locations
    pub data: DataConfig,
    /// Per-run training parameters
    pub training: TrainingParams,
    /// Optimizer settings
    pub optimizer: OptimizerConfig,
    /// Coefficient search settings
    pub search: SearchConfig,
    /// Metrics and run labelling
    pub logging: LoggingConfig,
}

impl HydraConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, format chosen by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.training.validate()?;
        self.optimizer.validate()?;
        self.search.validate()?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Device choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    /// CPU
    #[default]
    Cpu,
    /// First CUDA GPU
    Cuda,
    /// Apple Metal
    Metal,
    /// CUDA when available, CPU otherwise
    Auto,
}

impl DeviceChoice {
    /// Open the device
    pub fn to_device(self) -> Result<Device> {
        Ok(match self {
            Self::Cpu => Device::Cpu,
            Self::Cuda => Device::new_cuda(0)?,
            Self::Metal => Device::new_metal(0)?,
            Self::Auto => Device::cuda_if_available(0)?,
        })
    }
}

/// Network settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// BERT-family `config.json`; RoBERTa-base shape when absent
    pub encoder_config: Option<PathBuf>,
    /// Pretrained encoder weights (safetensors)
    pub encoder_weights: Option<PathBuf>,
    /// Prefix of encoder tensor names in the weights file
    pub weights_prefix: Option<String>,
    /// Dropout inside each head
    pub head_dropout: f32,
    /// Compute device
    pub device: DeviceChoice,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            encoder_config: None,
            encoder_weights: None,
            weights_prefix: None,
            head_dropout: 0.3,
            device: DeviceChoice::Cpu,
        }
    }
}

impl ModelConfig {
    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.head_dropout) {
            return Err(Error::config("head_dropout must lie in [0, 1)"));
        }
        Ok(())
    }
}

/// Pre-tokenized JSONL datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Disaster-labelled training rows
    pub disaster_train: PathBuf,
    /// Sentiment-labelled training rows
    pub sentiment_train: PathBuf,
    /// Disaster-labelled validation rows
    pub disaster_valid: PathBuf,
    /// Sentiment-labelled validation rows
    pub sentiment_valid: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            disaster_train: PathBuf::from("data/disaster_train.jsonl"),
            sentiment_train: PathBuf::from("data/sentiment_train.jsonl"),
            disaster_valid: PathBuf::from("data/disaster_valid.jsonl"),
            sentiment_valid: PathBuf::from("data/sentiment_valid.jsonl"),
        }
    }
}

/// Coefficient search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Trial budget
    pub total_trials: usize,
    /// Name of the objective value
    pub objective_name: String,
    /// Minimise instead of maximise
    pub minimize: bool,
    /// Proposal strategy
    pub strategy: StrategyKind,
    /// `lambda1` bounds
    pub lambda1_bounds: (f64, f64),
    /// `lambda2` bounds
    pub lambda2_bounds: (f64, f64),
    /// Bayesian strategy settings (the seed also drives random search)
    pub bayesian: BayesianConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            total_trials: 7,
            objective_name: "t1_f1_score".to_string(),
            minimize: false,
            strategy: StrategyKind::Bayesian,
            lambda1_bounds: (0.0, 1.0),
            lambda2_bounds: (0.0, 1.0),
            bayesian: BayesianConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.total_trials == 0 {
            return Err(Error::config("total_trials must be > 0"));
        }
        self.space()?;
        self.bayesian.validate()
    }

    /// Bounded search space
    pub fn space(&self) -> Result<SearchSpace> {
        SearchSpace::new(self.lambda1_bounds, self.lambda2_bounds)
    }

    /// Optimisation direction
    pub fn direction(&self) -> Direction {
        Direction::from_minimize(self.minimize)
    }
}

/// Metrics and run labelling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Project reported to the metrics sink
    pub project: String,
    /// Run group shared by the trials of one search
    pub group: String,
    /// JSONL metrics output; metrics go to the log when absent
    pub metrics_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            project: "hydra".to_string(),
            group: "bayes_optim".to_string(),
            metrics_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = HydraConfig::default();
        config.validate().unwrap();
        assert_eq!(config.search.total_trials, 7);
        assert_eq!(config.search.objective_name, "t1_f1_score");
        assert_eq!(config.search.direction(), Direction::Maximize);
        assert_eq!(config.training.num_epochs, 2);
        assert_eq!(config.optimizer.learning_rate, 1e-5);
    }

    #[test]
    fn test_yaml_and_json_round_trip() {
        let dir = tempdir().unwrap();
        let mut config = HydraConfig::default();
        config.search.total_trials = 3;
        config.search.strategy = StrategyKind::Grid;

        for name in ["hydra.yaml", "hydra.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            assert_eq!(HydraConfig::from_file(&path).unwrap(), config);
        }
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.yml");
        std::fs::write(&path, "search:\n  total_trials: 5\n  lambda2_bounds: [0.2, 0.8]\n").unwrap();
        let config = HydraConfig::from_file(&path).unwrap();
        assert_eq!(config.search.total_trials, 5);
        assert_eq!(config.search.lambda2_bounds, (0.2, 0.8));
        assert_eq!(config.training.train_batch_size, 32);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut config = HydraConfig::default();
        config.search.lambda1_bounds = (0.0, 2.0);
        assert!(matches!(config.validate(), Err(Error::InvalidCoefficients { .. })));

        let mut config = HydraConfig::default();
        config.search.total_trials = 0;
        assert!(config.validate().is_err());
    }
}
