//! Running per-task metrics and the flat metric records emitted to sinks
//!
//! Running sums only grow within an epoch and are reset once at each epoch
//! boundary. Derived rates are recomputed from the sums on demand and are
//! defined as zero whenever a task has seen no examples.

pub mod exporters;

pub use exporters::{JsonLinesSink, MemorySink, MetricsSink, NullSink, RunInfo, TracingSink};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Running totals for one task
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAccumulator {
    /// Summed loss contributions
    pub loss_sum: f64,
    /// Number of updates (steps)
    pub steps: usize,
    /// Correct predictions
    pub correct: usize,
    /// Examples seen
    pub examples: usize,
}

impl TaskAccumulator {
    /// Add one step's loss contribution and prediction counts
    pub fn update(&mut self, loss_value: f64, correct: usize, examples: usize) {
        self.loss_sum += loss_value;
        self.steps += 1;
        self.correct += correct;
        self.examples += examples;
    }

    /// Mean loss per step; 0 before any example was seen
    pub fn mean_loss(&self) -> f64 {
        if self.examples == 0 || self.steps == 0 {
            return 0.0;
        }
        self.loss_sum / self.steps as f64
    }

    /// Accuracy in percent; 0 before any example was seen
    pub fn accuracy(&self) -> f64 {
        if self.examples == 0 {
            return 0.0;
        }
        self.correct as f64 * 100.0 / self.examples as f64
    }

    /// `(mean_loss, accuracy_pct)`
    pub fn snapshot(&self) -> (f64, f64) {
        (self.mean_loss(), self.accuracy())
    }
}

/// Whether metrics come from a training or a validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Training pass
    Train,
    /// Validation pass
    Test,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Test => "test",
        }
    }
}

/// Per-task running totals for one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    disaster: TaskAccumulator,
    sentiment: TaskAccumulator,
}

impl EpochMetrics {
    /// Fresh, zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one step for `task`
    pub fn update(&mut self, task: Task, loss_value: f64, correct: usize, examples: usize) {
        self.task_mut(task).update(loss_value, correct, examples);
    }

    /// `(mean_loss, accuracy_pct)` for `task`
    pub fn snapshot(&self, task: Task) -> (f64, f64) {
        self.task(task).snapshot()
    }

    /// Totals of `task`
    pub fn task(&self, task: Task) -> &TaskAccumulator {
        match task {
            Task::Disaster => &self.disaster,
            Task::Sentiment => &self.sentiment,
        }
    }

    fn task_mut(&mut self, task: Task) -> &mut TaskAccumulator {
        match task {
            Task::Disaster => &mut self.disaster,
            Task::Sentiment => &mut self.sentiment,
        }
    }

    /// Zero all totals at an epoch boundary
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Sum of both tasks' mean losses
    pub fn total_loss(&self) -> f64 {
        self.disaster.mean_loss() + self.sentiment.mean_loss()
    }

    /// Flat named view: `d1_<phase>_loss`, `d1_<phase>_accuracy`, ... `total_<phase>_loss`
    pub fn record(&self, phase: Phase, step: usize) -> MetricRecord {
        let mut values = BTreeMap::new();
        for task in Task::ALL {
            let (loss, accuracy) = self.snapshot(task);
            let prefix = task.metric_prefix();
            values.insert(format!("{prefix}_{}_loss", phase.as_str()), loss);
            values.insert(format!("{prefix}_{}_accuracy", phase.as_str()), accuracy);
        }
        values.insert(format!("total_{}_loss", phase.as_str()), self.total_loss());
        MetricRecord::new(step, values)
    }
}

/// One flat mapping of named numeric metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Global step the record belongs to
    pub step: usize,
    /// Wall-clock time of emission
    pub timestamp: DateTime<Utc>,
    /// Metric values by name
    pub values: BTreeMap<String, f64>,
}

impl MetricRecord {
    /// Create a record stamped now
    pub fn new(step: usize, values: BTreeMap<String, f64>) -> Self {
        Self {
            step,
            timestamp: Utc::now(),
            values,
        }
    }

    /// Value of `name`
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

impl fmt::Display for MetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}", self.step)?;
        for (name, value) in &self.values {
            write!(f, " {name}={value:.4}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_zero_examples_snapshot_is_zero() {
        let metrics = EpochMetrics::new();
        assert_eq!(metrics.snapshot(Task::Disaster), (0.0, 0.0));

        let mut metrics = EpochMetrics::new();
        metrics.update(Task::Sentiment, 0.0, 0, 0);
        metrics.update(Task::Sentiment, 0.0, 0, 0);
        assert_eq!(metrics.snapshot(Task::Sentiment), (0.0, 0.0));
    }

    #[test]
    fn test_running_rates() {
        let mut metrics = EpochMetrics::new();
        metrics.update(Task::Disaster, 0.6, 3, 4);
        metrics.update(Task::Disaster, 0.0, 0, 0);
        metrics.update(Task::Disaster, 0.3, 1, 4);
        let (loss, accuracy) = metrics.snapshot(Task::Disaster);
        assert_relative_eq!(loss, 0.3, epsilon = 1e-12);
        assert_relative_eq!(accuracy, 50.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reset() {
        let mut metrics = EpochMetrics::new();
        metrics.update(Task::Disaster, 1.0, 1, 1);
        metrics.reset();
        assert_eq!(metrics, EpochMetrics::new());
    }

    #[test]
    fn test_record_names() {
        let mut metrics = EpochMetrics::new();
        metrics.update(Task::Disaster, 0.4, 1, 2);
        metrics.update(Task::Sentiment, 0.2, 2, 2);
        let record = metrics.record(Phase::Train, 5);
        assert_eq!(record.step, 5);
        assert_relative_eq!(record.get("d1_train_loss").unwrap(), 0.4);
        assert_relative_eq!(record.get("d1_train_accuracy").unwrap(), 50.0);
        assert_relative_eq!(record.get("d2_train_accuracy").unwrap(), 100.0);
        assert_relative_eq!(record.get("total_train_loss").unwrap(), 0.6, epsilon = 1e-12);

        let test = EpochMetrics::new().record(Phase::Test, 0);
        assert_eq!(test.values.len(), 5);
        assert_eq!(test.get("d2_test_loss"), Some(0.0));
    }

    proptest! {
        #[test]
        fn prop_sums_never_decrease(steps in prop::collection::vec((0.0f64..5.0, 0usize..8, 0usize..8), 1..40)) {
            let mut acc = TaskAccumulator::default();
            for (loss, correct, extra) in steps {
                let before = acc;
                acc.update(loss, correct, correct + extra);
                prop_assert!(acc.loss_sum >= before.loss_sum);
                prop_assert!(acc.correct >= before.correct);
                prop_assert!(acc.examples >= before.examples);
                let (_, accuracy) = acc.snapshot();
                prop_assert!((0.0..=100.0).contains(&accuracy));
            }
        }
    }
}
