//! Task-specific classification heads

use candle_core::Tensor;
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};

use crate::error::Result;

/// `Linear(h, h) -> ReLU -> Dropout -> Linear(h, k)` on the pooled encoding
pub struct ClassificationHead {
    pre_classifier: Linear,
    dropout: Dropout,
    classifier: Linear,
    num_classes: usize,
}

impl ClassificationHead {
    /// Build a head with `num_classes` outputs under `vb`
    pub fn new(vb: VarBuilder, hidden_size: usize, num_classes: usize, dropout: f32) -> Result<Self> {
        Ok(Self {
            pre_classifier: linear(hidden_size, hidden_size, vb.pp("pre_classifier"))?,
            dropout: Dropout::new(dropout),
            classifier: linear(hidden_size, num_classes, vb.pp("classifier"))?,
            num_classes,
        })
    }

    /// Output width
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// `[batch, hidden]` to `[batch, num_classes]`
    pub fn forward(&self, pooled: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.pre_classifier.forward(pooled)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        Ok(self.classifier.forward(&xs)?)
    }
}
