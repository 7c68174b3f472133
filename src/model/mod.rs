//! Dual-head multi-task model
//!
//! One shared encoder, two task heads. A single forward pass produces both
//! heads' logits; per-task selection happens afterwards on the logits.

pub mod heads;
pub mod network;

pub use heads::ClassificationHead;
pub use network::HydraNet;

use candle_core::{Tensor, Var};

use crate::error::Result;
use crate::task::Task;

/// Logits of both heads for one batch
#[derive(Debug, Clone)]
pub struct HeadLogits {
    /// Task 1 logits [batch, 2]
    pub disaster: Tensor,
    /// Task 2 logits [batch, 3]
    pub sentiment: Tensor,
}

impl HeadLogits {
    /// Logits of `task`'s head
    pub fn get(&self, task: Task) -> &Tensor {
        match task {
            Task::Disaster => &self.disaster,
            Task::Sentiment => &self.sentiment,
        }
    }

    /// Copy of both outputs cut off from the autograd graph
    pub fn detach(&self) -> Self {
        Self {
            disaster: self.disaster.detach(),
            sentiment: self.sentiment.detach(),
        }
    }
}

/// A model mapping (token ids, attention mask) to both heads' logits
pub trait MultiTaskModel {
    /// Run the shared encoder once and both heads on its output.
    /// `train` enables dropout. An empty batch yields `[0, k]` logits.
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<HeadLogits>;

    /// Parameters updated by the optimizer (shared encoder and both heads)
    fn trainable_vars(&self) -> Vec<Var>;
}
