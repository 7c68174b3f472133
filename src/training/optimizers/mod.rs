//! Optimizer construction
//!
//! Parameters are updated with candle's AdamW. With zero weight decay (the
//! default) this is plain Adam.

use candle_core::Var;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use tracing::debug;

use crate::error::Result;
use crate::training::config::OptimizerConfig;

/// Build an optimizer over `vars`
pub fn create_optimizer(config: &OptimizerConfig, vars: Vec<Var>) -> Result<AdamW> {
    config.validate()?;
    let params = ParamsAdamW {
        lr: config.learning_rate,
        beta1: config.beta1,
        beta2: config.beta2,
        eps: config.epsilon,
        weight_decay: config.weight_decay,
    };
    debug!(
        vars = vars.len(),
        lr = config.learning_rate,
        optimizer = config.optimizer_name(),
        "creating optimizer"
    );
    Ok(AdamW::new(vars, params)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};

    #[test]
    fn test_step_moves_parameters() {
        let var = Var::zeros(3, DType::F32, &Device::Cpu).unwrap();
        let config = OptimizerConfig {
            learning_rate: 0.1,
            ..Default::default()
        };
        let mut optimizer = create_optimizer(&config, vec![var.clone()]).unwrap();
        assert_eq!(optimizer.learning_rate(), 0.1);

        let target = Tensor::new(&[1f32, 1., 1.], &Device::Cpu).unwrap();
        let loss = var.as_tensor().sub(&target).unwrap().sqr().unwrap().sum_all().unwrap();
        optimizer.backward_step(&loss).unwrap();

        let values = var.as_tensor().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = OptimizerConfig {
            learning_rate: -1.0,
            ..Default::default()
        };
        assert!(create_optimizer(&config, Vec::new()).is_err());
    }
}
