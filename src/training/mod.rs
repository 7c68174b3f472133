//! Training infrastructure for the dual-head model
//!
//! # Main Components
//!
//! - **Data**: tokenized examples, batches and the per-task batch splitter
//! - **Loss**: cross-entropy per task mixed by fixed coefficients
//! - **Metrics**: running per-task accumulators and metrics sinks
//! - **Scoring**: precision, recall and F1 over recorded predictions
//! - **Optimizers**: Adam(W) construction
//! - **Trainer**: the per-epoch training and validation driver

pub mod config;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod optimizers;
pub mod scoring;
pub mod trainer;

pub use config::{OptimizerConfig, TrainingParams};
pub use data::{Batch, DataLoader, DataLoaderConfig, Example, LabelPair, MultiTaskDataset, SubBatch};
pub use loss::{Coefficients, CombinedLoss, TaskLoss, WeightedLoss};
pub use metrics::{EpochMetrics, MetricRecord, MetricsSink, Phase, TaskAccumulator};
pub use optimizers::create_optimizer;
pub use scoring::{ClassificationReport, Prediction};
pub use trainer::{
    predict, validate_disaster, validate_task, EpochReport, TaskPredictions, Trainer, TrainingContext,
    ValidationReport,
};
