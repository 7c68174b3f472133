//! Weighted multi-task loss
//!
//! Each task contributes a cross-entropy loss over its own sub-batch. A task
//! whose sub-batch is empty has no defined loss; it contributes exactly zero,
//! both to the backward pass and to the running metrics. The combined
//! objective is `lambda1 * loss1 + lambda2 * loss2`.

use candle_core::{DType, Tensor, D};
use candle_nn::loss::cross_entropy;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::HeadLogits;
use crate::task::Task;
use crate::training::data::{Batch, SubBatch};

/// Loss mixing coefficients, each within `[0, 1]`. They need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    /// Weight of the disaster loss
    pub lambda1: f64,
    /// Weight of the sentiment loss
    pub lambda2: f64,
}

impl Coefficients {
    /// Create coefficients, rejecting values outside `[0, 1]`
    pub fn new(lambda1: f64, lambda2: f64) -> Result<Self> {
        let coefficients = Self { lambda1, lambda2 };
        coefficients.validate()?;
        Ok(coefficients)
    }

    /// Check both values lie within `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("lambda1", self.lambda1), ("lambda2", self.lambda2)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidCoefficients {
                    name: name.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// Weight applied to `task`'s loss
    pub fn weight(&self, task: Task) -> f64 {
        match task {
            Task::Disaster => self.lambda1,
            Task::Sentiment => self.lambda2,
        }
    }
}

/// Loss and predictions of one task on one batch
#[derive(Debug, Clone)]
pub struct TaskLoss {
    /// Task
    pub task: Task,
    /// Scalar loss tensor, still attached to the graph when defined.
    /// A detached zero when the sub-batch is empty.
    pub loss: Tensor,
    /// Unweighted loss value; 0 when undefined
    pub value: f64,
    /// Argmax predictions, aligned with the sub-batch targets
    pub predictions: Vec<u32>,
    /// Sub-batch targets
    pub targets: Vec<u32>,
    /// Number of correct predictions
    pub correct: usize,
}

impl TaskLoss {
    /// Number of examples the loss was computed over
    pub fn examples(&self) -> usize {
        self.targets.len()
    }
}

/// Both task losses and their weighted sum
#[derive(Debug, Clone)]
pub struct CombinedLoss {
    /// Scalar `lambda1 * loss1 + lambda2 * loss2`
    pub total: Tensor,
    /// Value of `total`
    pub total_value: f64,
    /// Disaster loss
    pub disaster: TaskLoss,
    /// Sentiment loss
    pub sentiment: TaskLoss,
}

impl CombinedLoss {
    /// Loss of `task`
    pub fn task(&self, task: Task) -> &TaskLoss {
        match task {
            Task::Disaster => &self.disaster,
            Task::Sentiment => &self.sentiment,
        }
    }

    /// Whether any task had examples, i.e. whether a backward pass can move parameters
    pub fn has_signal(&self) -> bool {
        self.disaster.examples() > 0 || self.sentiment.examples() > 0
    }
}

/// Cross-entropy per task, mixed by fixed [`Coefficients`]
#[derive(Debug, Clone)]
pub struct WeightedLoss {
    coefficients: Coefficients,
}

impl WeightedLoss {
    /// Create a combiner for validated coefficients
    pub fn new(coefficients: Coefficients) -> Result<Self> {
        coefficients.validate()?;
        Ok(Self { coefficients })
    }

    /// Mixing coefficients
    pub fn coefficients(&self) -> Coefficients {
        self.coefficients
    }

    /// Cross-entropy of one head's logits against its sub-batch.
    /// `logits` are the full-batch logits of `sub.task`'s head.
    pub fn task_loss(&self, logits: &Tensor, sub: &SubBatch) -> Result<TaskLoss> {
        let zero = Tensor::zeros((), DType::F32, logits.device())?;
        if sub.is_empty() {
            return Ok(TaskLoss {
                task: sub.task,
                loss: zero,
                value: 0.0,
                predictions: Vec::new(),
                targets: Vec::new(),
                correct: 0,
            });
        }

        let selected = sub.select_rows(logits)?;
        let targets = sub.targets_tensor(logits.device())?;
        let loss = cross_entropy(&selected, &targets)?;
        let raw = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;

        let (loss, value) = if raw.is_finite() {
            (loss, raw)
        } else {
            warn!(task = %sub.task, examples = sub.len(), "non-finite loss replaced with zero");
            (zero, 0.0)
        };

        let predictions = selected.detach().argmax(D::Minus1)?.to_vec1::<u32>()?;
        let correct = predictions
            .iter()
            .zip(&sub.targets)
            .filter(|(p, t)| p == t)
            .count();

        Ok(TaskLoss {
            task: sub.task,
            loss,
            value,
            predictions,
            targets: sub.targets.clone(),
            correct,
        })
    }

    /// Split `batch`, score both heads and mix the losses
    pub fn combine(&self, logits: &HeadLogits, batch: &Batch) -> Result<CombinedLoss> {
        let disaster = self.task_loss(&logits.disaster, &batch.split(Task::Disaster))?;
        let sentiment = self.task_loss(&logits.sentiment, &batch.split(Task::Sentiment))?;

        let total = ((&disaster.loss * self.coefficients.lambda1)?
            + (&sentiment.loss * self.coefficients.lambda2)?)?;
        let total_value = self.coefficients.lambda1 * disaster.value
            + self.coefficients.lambda2 * sentiment.value;

        Ok(CombinedLoss {
            total,
            total_value,
            disaster,
            sentiment,
        })
    }

    /// Unweighted cross-entropy of a single task, used by single-head training
    pub fn single(logits: &HeadLogits, batch: &Batch, task: Task) -> Result<TaskLoss> {
        let combiner = Self {
            coefficients: Coefficients {
                lambda1: 1.0,
                lambda2: 1.0,
            },
        };
        combiner.task_loss(logits.get(task), &batch.split(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::{Example, LabelPair};
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn batch(labels: &[LabelPair]) -> Batch {
        let examples: Vec<Example> = labels
            .iter()
            .map(|l| Example::new(vec![1, 2], vec![1, 1], *l))
            .collect();
        let refs: Vec<&Example> = examples.iter().collect();
        Batch::from_examples(&refs, &Device::Cpu).unwrap()
    }

    fn logits(n: usize) -> HeadLogits {
        let d: Vec<f32> = (0..n).flat_map(|i| [0.2 * i as f32, 1.0 - 0.3 * i as f32]).collect();
        let s: Vec<f32> = (0..n).flat_map(|i| [0.5, i as f32 * 0.1, -0.4]).collect();
        HeadLogits {
            disaster: Tensor::from_vec(d, (n, 2), &Device::Cpu).unwrap(),
            sentiment: Tensor::from_vec(s, (n, 3), &Device::Cpu).unwrap(),
        }
    }

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_coefficient_bounds() {
        assert!(Coefficients::new(0.0, 1.0).is_ok());
        let err = Coefficients::new(1.2, 0.5).unwrap_err();
        assert!(matches!(err, Error::InvalidCoefficients { ref name, .. } if name == "lambda1"));
        assert!(Coefficients::new(0.5, -0.1).is_err());
        assert!(Coefficients::new(f64::NAN, 0.5).is_err());
    }

    #[test]
    fn test_mixed_batch_loss_is_defined() {
        let b = batch(&[
            LabelPair::disaster(0),
            LabelPair::disaster(1),
            LabelPair::disaster(0),
            LabelPair::sentiment(2),
        ]);
        let combiner = WeightedLoss::new(Coefficients::new(0.5, 0.5).unwrap()).unwrap();
        let combined = combiner.combine(&logits(4), &b).unwrap();

        assert_eq!(combined.disaster.examples(), 3);
        assert_eq!(combined.sentiment.examples(), 1);
        let total = scalar(&combined.total);
        assert!(total.is_finite());
        assert_relative_eq!(
            total as f64,
            0.5 * combined.disaster.value + 0.5 * combined.sentiment.value,
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_empty_task_contributes_zero() {
        let b = batch(&[LabelPair::disaster(1), LabelPair::disaster(0)]);
        for lambda2 in [0.0, 0.3, 1.0] {
            let combiner = WeightedLoss::new(Coefficients::new(0.7, lambda2).unwrap()).unwrap();
            let combined = combiner.combine(&logits(2), &b).unwrap();
            assert_eq!(combined.sentiment.value, 0.0);
            assert_eq!(scalar(&combined.sentiment.loss), 0.0);
            assert_relative_eq!(
                scalar(&combined.total),
                scalar(&combined.disaster.loss) * 0.7,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_non_finite_loss_is_replaced_with_zero() {
        let b = batch(&[LabelPair::disaster(1), LabelPair::sentiment(0)]);
        let mut heads = logits(2);
        heads.sentiment = Tensor::new(&[[0.5f32, 0.1, -0.4], [f32::NAN, 0.0, 0.0]], &Device::Cpu).unwrap();

        let combiner = WeightedLoss::new(Coefficients::new(0.5, 0.5).unwrap()).unwrap();
        let combined = combiner.combine(&heads, &b).unwrap();
        assert_eq!(combined.sentiment.examples(), 1);
        assert_eq!(combined.sentiment.value, 0.0);
        assert_eq!(scalar(&combined.sentiment.loss), 0.0);
        assert!(combined.total_value.is_finite());
        assert_relative_eq!(
            scalar(&combined.total),
            scalar(&combined.disaster.loss) * 0.5,
            epsilon = 1e-6
        );
        assert!(combined.has_signal());
    }

    #[test]
    fn test_lambda2_zero_gives_task1_loss_exactly() {
        let b = batch(&[LabelPair::disaster(1), LabelPair::sentiment(0), LabelPair::sentiment(1)]);
        let combiner = WeightedLoss::new(Coefficients::new(1.0, 0.0).unwrap()).unwrap();
        let combined = combiner.combine(&logits(3), &b).unwrap();
        assert!(combined.sentiment.value > 0.0);
        assert_eq!(scalar(&combined.total), scalar(&combined.disaster.loss));
    }

    #[test]
    fn test_correct_counts() {
        // disaster rows: argmax of [0, 1] is 1, of [0.2, 0.7] is 1
        let b = batch(&[LabelPair::disaster(1), LabelPair::disaster(0)]);
        let loss = WeightedLoss::single(&logits(2), &b, Task::Disaster).unwrap();
        assert_eq!(loss.predictions, vec![1, 1]);
        assert_eq!(loss.correct, 1);
    }
}
