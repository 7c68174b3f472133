//! Data pipeline for multi-task training
//!
//! Examples arrive already tokenized: a fixed-length id sequence, its attention
//! mask and one optional label per task. The pipeline groups them into
//! [`Batch`]es and splits each batch into per-task [`SubBatch`]es.

pub mod batching;
pub mod datasets;
pub mod loaders;

pub use batching::{Batch, SubBatch};
pub use datasets::MultiTaskDataset;
pub use loaders::{DataLoader, DataLoaderConfig};

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Per-example labels; a task without a label is `None`, never a sentinel class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPair {
    /// Task 1 label in `{0, 1}`
    #[serde(default)]
    pub disaster: Option<u32>,
    /// Task 2 label in `{0, 1, 2}`
    #[serde(default)]
    pub sentiment: Option<u32>,
}

impl LabelPair {
    /// Labels for an example that only carries a disaster target
    pub fn disaster(label: u32) -> Self {
        Self {
            disaster: Some(label),
            sentiment: None,
        }
    }

    /// Labels for an example that only carries a sentiment target
    pub fn sentiment(label: u32) -> Self {
        Self {
            disaster: None,
            sentiment: Some(label),
        }
    }

    /// Label for `task`, if present
    pub fn get(&self, task: Task) -> Option<u32> {
        match task {
            Task::Disaster => self.disaster,
            Task::Sentiment => self.sentiment,
        }
    }
}

/// A single tokenized example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Token ids, padded to the dataset's fixed length
    pub input_ids: Vec<u32>,
    /// 1 for real tokens, 0 for padding
    pub attention_mask: Vec<u32>,
    /// Optional label per task
    #[serde(flatten)]
    pub labels: LabelPair,
}

impl Example {
    /// Create an example from ids, mask and labels
    pub fn new(input_ids: Vec<u32>, attention_mask: Vec<u32>, labels: LabelPair) -> Self {
        Self {
            input_ids,
            attention_mask,
            labels,
        }
    }

    /// Sequence length
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Whether the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}
