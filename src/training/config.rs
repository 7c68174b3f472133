//! Training configuration
//!
//! Defaults: two epochs per run, batches of 32, Adam at 1e-5.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-run training parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Epochs per training run
    pub num_epochs: usize,
    /// Training batch size
    pub train_batch_size: usize,
    /// Validation batch size
    pub valid_batch_size: usize,
    /// Maximum token sequence length (informational; inputs arrive padded)
    pub max_seq_length: usize,
    /// Seed for data shuffling
    pub seed: u64,
    /// Log running metrics at info level every N steps
    pub log_every: usize,
    /// Run a combined validation pass after each training epoch
    pub validate_each_epoch: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_epochs: 2,
            train_batch_size: 32,
            valid_batch_size: 32,
            max_seq_length: 512,
            seed: 2023,
            log_every: 5000,
            validate_each_epoch: true,
        }
    }
}

impl TrainingParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if self.num_epochs == 0 {
            return Err(Error::config("num_epochs must be > 0"));
        }
        if self.train_batch_size == 0 || self.valid_batch_size == 0 {
            return Err(Error::config("batch sizes must be > 0"));
        }
        if self.log_every == 0 {
            return Err(Error::config("log_every must be > 0"));
        }
        Ok(())
    }
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Beta1 parameter (momentum)
    pub beta1: f64,
    /// Beta2 parameter (RMSprop)
    pub beta2: f64,
    /// Epsilon for numerical stability
    pub epsilon: f64,
    /// Decoupled weight decay; 0 gives plain Adam
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-5,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
        }
    }
}

impl OptimizerConfig {
    /// Validate optimizer settings
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(Error::config("learning_rate must be > 0"));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(Error::config("beta1 and beta2 must lie in [0, 1)"));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::config("weight_decay must be >= 0"));
        }
        Ok(())
    }

    /// Name reported to metrics sinks
    pub fn optimizer_name(&self) -> &'static str {
        if self.weight_decay == 0.0 {
            "Adam"
        } else {
            "AdamW"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        TrainingParams::default().validate().unwrap();
        OptimizerConfig::default().validate().unwrap();
        assert_eq!(OptimizerConfig::default().optimizer_name(), "Adam");
    }

    #[test]
    fn test_invalid_params() {
        let params = TrainingParams {
            num_epochs: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let optimizer = OptimizerConfig {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(optimizer.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let params: TrainingParams = serde_json::from_str(r#"{"num_epochs": 3}"#).unwrap();
        assert_eq!(params.num_epochs, 3);
        assert_eq!(params.train_batch_size, 32);
    }
}
