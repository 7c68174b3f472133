//! Training and validation driver
//!
//! One epoch is: for every batch, split by task, run a single forward pass,
//! score both heads, and in training mode take one optimizer step on the
//! weighted loss. Running metrics accumulate in batch order and are reset at
//! each epoch boundary. Validation runs without dropout or parameter updates
//! and records every prediction for later scoring.

use candle_nn::{AdamW, Optimizer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::model::MultiTaskModel;
use crate::task::Task;
use crate::training::config::OptimizerConfig;
use crate::training::data::DataLoader;
use crate::training::loss::{Coefficients, CombinedLoss, WeightedLoss};
use crate::training::metrics::exporters::emit;
use crate::training::metrics::{EpochMetrics, MetricsSink, Phase, TaskAccumulator};
use crate::training::optimizers::create_optimizer;
use crate::training::scoring::{ClassificationReport, Prediction};

/// Everything one training run needs besides the model and data.
/// Created once per run and owned by the [`Trainer`].
pub struct TrainingContext<'a> {
    /// Optimizer over the model's trainable parameters
    pub optimizer: AdamW,
    /// Loss combiner with the run's coefficients
    pub loss: WeightedLoss,
    /// Metrics receiver
    pub sink: &'a mut dyn MetricsSink,
    /// Info-level progress interval in steps
    pub log_every: usize,
}

impl<'a> TrainingContext<'a> {
    /// Build a context for `model`
    pub fn new<M: MultiTaskModel>(
        model: &M,
        optimizer: &OptimizerConfig,
        coefficients: Coefficients,
        sink: &'a mut dyn MetricsSink,
        log_every: usize,
    ) -> Result<Self> {
        Ok(Self {
            optimizer: create_optimizer(optimizer, model.trainable_vars())?,
            loss: WeightedLoss::new(coefficients)?,
            sink,
            log_every: log_every.max(1),
        })
    }
}

/// Metrics of one completed epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochReport {
    /// Zero-based epoch index
    pub epoch: usize,
    /// Training totals
    pub train: EpochMetrics,
    /// Combined validation totals, when a validation pass ran
    pub validation: Option<EpochMetrics>,
}

/// Predictions of both heads over a validation set, per task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPredictions {
    /// Disaster head predictions for disaster-labelled examples
    pub disaster: Vec<Prediction>,
    /// Sentiment head predictions for sentiment-labelled examples
    pub sentiment: Vec<Prediction>,
}

impl TaskPredictions {
    /// Predictions of `task`
    pub fn get(&self, task: Task) -> &[Prediction] {
        match task {
            Task::Disaster => &self.disaster,
            Task::Sentiment => &self.sentiment,
        }
    }

    fn get_mut(&mut self, task: Task) -> &mut Vec<Prediction> {
        match task {
            Task::Disaster => &mut self.disaster,
            Task::Sentiment => &mut self.sentiment,
        }
    }

    /// Classification report of `task`
    pub fn report(&self, task: Task) -> ClassificationReport {
        ClassificationReport::from_predictions(self.get(task), task.num_classes())
    }
}

/// Result of validating a single task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Validated task
    pub task: Task,
    /// Every prediction, in validation order
    pub predictions: Vec<Prediction>,
    /// Scores over `predictions`
    pub report: ClassificationReport,
}

impl ValidationReport {
    /// Support-weighted F1
    pub fn weighted_f1(&self) -> f64 {
        self.report.weighted_f1
    }

    /// Accuracy as a fraction
    pub fn accuracy(&self) -> f64 {
        self.report.accuracy
    }
}

/// Drives training epochs of one model
pub struct Trainer<'a, M: MultiTaskModel> {
    model: &'a M,
    context: TrainingContext<'a>,
    global_step: usize,
}

impl<'a, M: MultiTaskModel> Trainer<'a, M> {
    /// Create a trainer
    pub fn new(model: &'a M, context: TrainingContext<'a>) -> Self {
        Self {
            model,
            context,
            global_step: 0,
        }
    }

    /// Optimizer steps taken so far
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// Coefficients of this run
    pub fn coefficients(&self) -> Coefficients {
        self.context.loss.coefficients()
    }

    fn accumulate(&self, metrics: &mut EpochMetrics, combined: &CombinedLoss) {
        let coefficients = self.context.loss.coefficients();
        for task in Task::ALL {
            let loss = combined.task(task);
            metrics.update(
                task,
                coefficients.weight(task) * loss.value,
                loss.correct,
                loss.examples(),
            );
        }
    }

    /// Train for `num_epochs`, validating on `valid` after each epoch if given
    pub fn fit(
        &mut self,
        train: &mut DataLoader,
        mut valid: Option<&mut DataLoader>,
        num_epochs: usize,
    ) -> Result<Vec<EpochReport>> {
        let mut reports = Vec::with_capacity(num_epochs);
        for epoch in 0..num_epochs {
            info!("Starting epoch {}/{}", epoch + 1, num_epochs);
            let train_metrics = self.train_epoch(train, epoch)?;
            let validation = match valid.as_deref_mut() {
                Some(loader) => Some(self.evaluate_epoch(loader)?),
                None => None,
            };
            reports.push(EpochReport {
                epoch,
                train: train_metrics,
                validation,
            });
        }
        Ok(reports)
    }

    /// One training epoch over the mixed-task loader
    #[instrument(skip(self, loader))]
    pub fn train_epoch(&mut self, loader: &mut DataLoader, epoch: usize) -> Result<EpochMetrics> {
        let mut metrics = EpochMetrics::new();

        for (step, batch) in loader.epoch().enumerate() {
            let batch = batch?;
            let logits = self
                .model
                .forward(&batch.input_ids, &batch.attention_mask, true)?;
            let combined = self.context.loss.combine(&logits, &batch)?;

            if combined.has_signal() {
                self.context.optimizer.backward_step(&combined.total)?;
            }
            self.global_step += 1;

            self.accumulate(&mut metrics, &combined);
            emit(&mut *self.context.sink, &metrics.record(Phase::Train, self.global_step));

            debug!(step, total_loss = combined.total_value, "training step");
            if step % self.context.log_every == 0 {
                let (d1_loss, d1_acc) = metrics.snapshot(Task::Disaster);
                let (d2_loss, d2_acc) = metrics.snapshot(Task::Sentiment);
                info!(
                    "Step {} - d1 loss {:.4} acc {:.2}% | d2 loss {:.4} acc {:.2}%",
                    step, d1_loss, d1_acc, d2_loss, d2_acc
                );
            }
        }

        info!(
            "Epoch {} training - total loss {:.4}, d1 accuracy {:.2}%, d2 accuracy {:.2}%",
            epoch,
            metrics.total_loss(),
            metrics.task(Task::Disaster).accuracy(),
            metrics.task(Task::Sentiment).accuracy()
        );
        Ok(metrics)
    }

    /// Combined validation pass: no dropout, no updates, `_test_` metrics
    /// emitted once at the end
    #[instrument(skip(self, loader))]
    pub fn evaluate_epoch(&mut self, loader: &mut DataLoader) -> Result<EpochMetrics> {
        let mut metrics = EpochMetrics::new();

        for batch in loader.epoch() {
            let batch = batch?;
            let logits = self
                .model
                .forward(&batch.input_ids, &batch.attention_mask, false)?
                .detach();
            let combined = self.context.loss.combine(&logits, &batch)?;
            self.accumulate(&mut metrics, &combined);
        }

        emit(&mut *self.context.sink, &metrics.record(Phase::Test, self.global_step));
        info!(
            "Validation - total loss {:.4}, d1 accuracy {:.2}%, d2 accuracy {:.2}%",
            metrics.total_loss(),
            metrics.task(Task::Disaster).accuracy(),
            metrics.task(Task::Sentiment).accuracy()
        );
        Ok(metrics)
    }

    /// One epoch training only `task`'s head (plus the shared encoder) on
    /// its unweighted loss
    #[instrument(skip(self, loader))]
    pub fn train_single_task(
        &mut self,
        loader: &mut DataLoader,
        task: Task,
        epoch: usize,
    ) -> Result<TaskAccumulator> {
        let mut totals = TaskAccumulator::default();

        for (step, batch) in loader.epoch().enumerate() {
            let batch = batch?;
            let logits = self
                .model
                .forward(&batch.input_ids, &batch.attention_mask, true)?;
            let loss = WeightedLoss::single(&logits, &batch, task)?;

            if loss.examples() > 0 {
                self.context.optimizer.backward_step(&loss.loss)?;
            }
            self.global_step += 1;
            totals.update(loss.value, loss.correct, loss.examples());

            if step % self.context.log_every == 0 {
                let (mean_loss, accuracy) = totals.snapshot();
                info!(
                    "Training loss per {} steps: {:.4}, accuracy: {:.2}%",
                    self.context.log_every, mean_loss, accuracy
                );
            }
        }

        let (mean_loss, accuracy) = totals.snapshot();
        info!(
            "Epoch {} ({}) - training loss {:.4}, accuracy {:.2}%",
            epoch, task, mean_loss, accuracy
        );
        Ok(totals)
    }
}

/// Record both heads' predictions over a validation loader. Read-only.
pub fn predict<M: MultiTaskModel>(model: &M, loader: &mut DataLoader) -> Result<TaskPredictions> {
    let mut predictions = TaskPredictions::default();

    for batch in loader.epoch() {
        let batch = batch?;
        let logits = model
            .forward(&batch.input_ids, &batch.attention_mask, false)?
            .detach();
        for task in Task::ALL {
            let loss = WeightedLoss::single(&logits, &batch, task)?;
            predictions.get_mut(task).extend(
                loss.predictions
                    .iter()
                    .zip(&loss.targets)
                    .map(|(&predict, &target)| Prediction { predict, target }),
            );
        }
    }
    Ok(predictions)
}

/// Validate a single task and score it. Read-only; repeated calls on the
/// same model and sequential loader give identical predictions.
#[instrument(skip(model, loader))]
pub fn validate_task<M: MultiTaskModel>(
    model: &M,
    loader: &mut DataLoader,
    task: Task,
) -> Result<ValidationReport> {
    let mut predictions = Vec::new();

    for batch in loader.epoch() {
        let batch = batch?;
        let logits = model
            .forward(&batch.input_ids, &batch.attention_mask, false)?
            .detach();
        let sub = batch.split(task);
        if sub.is_empty() {
            continue;
        }
        let predicted = sub
            .select_rows(logits.get(task))?
            .argmax(candle_core::D::Minus1)?
            .to_vec1::<u32>()?;
        predictions.extend(
            predicted
                .into_iter()
                .zip(sub.targets)
                .map(|(predict, target)| Prediction { predict, target }),
        );
    }

    let report = ClassificationReport::from_predictions(&predictions, task.num_classes());
    info!(
        "{} validation - f1 score {:.4}, accuracy {:.4}",
        task, report.weighted_f1, report.accuracy
    );
    Ok(ValidationReport {
        task,
        predictions,
        report,
    })
}

/// Disaster-only validation; its weighted F1 is the search fitness
pub fn validate_disaster<M: MultiTaskModel>(model: &M, loader: &mut DataLoader) -> Result<ValidationReport> {
    validate_task(model, loader, Task::Disaster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::tiny_config;
    use crate::model::HydraNet;
    use crate::training::data::{DataLoaderConfig, Example, LabelPair, MultiTaskDataset};
    use crate::training::metrics::MemorySink;
    use candle_core::Device;
    use std::sync::Arc;

    fn mixed_dataset() -> Arc<MultiTaskDataset> {
        let mut examples = Vec::new();
        for i in 0..6u32 {
            examples.push(Example::new(vec![0, 10 + i, 20, 1], vec![1, 1, 1, 1], LabelPair::disaster(i % 2)));
        }
        for i in 0..4u32 {
            examples.push(Example::new(vec![0, 40 + i, 1, 1], vec![1, 1, 1, 0], LabelPair::sentiment(i % 3)));
        }
        Arc::new(MultiTaskDataset::new(examples).unwrap())
    }

    fn net() -> HydraNet {
        HydraNet::new(&tiny_config().unwrap(), 0.3, &Device::Cpu).unwrap()
    }

    fn optimizer() -> OptimizerConfig {
        OptimizerConfig {
            learning_rate: 1e-3,
            ..Default::default()
        }
    }

    #[test]
    fn test_train_epoch_emits_per_step_metrics() {
        let model = net();
        let mut sink = MemorySink::default();
        let context = TrainingContext::new(
            &model,
            &optimizer(),
            Coefficients::new(0.5, 0.5).unwrap(),
            &mut sink,
            1,
        )
        .unwrap();
        let mut trainer = Trainer::new(&model, context);
        let mut train =
            DataLoader::new(mixed_dataset(), DataLoaderConfig::train(4, 1), Device::Cpu).unwrap();
        let mut valid =
            DataLoader::new(mixed_dataset(), DataLoaderConfig::validation(4), Device::Cpu).unwrap();

        let reports = trainer.fit(&mut train, Some(&mut valid), 1).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(trainer.global_step(), 3);

        let train_metrics = &reports[0].train;
        assert_eq!(train_metrics.task(Task::Disaster).examples, 6);
        assert_eq!(train_metrics.task(Task::Sentiment).examples, 4);
        assert!(reports[0].validation.is_some());

        drop(trainer);
        // three training steps plus one validation record
        assert_eq!(sink.records.len(), 4);
        assert!(sink.records[0].get("d1_train_loss").is_some());
        assert!(sink.records[3].get("total_test_loss").is_some());
    }

    #[test]
    fn test_training_with_absent_task_stays_finite() {
        let model = net();
        let disaster_only = Arc::new(mixed_dataset().only(Task::Disaster));
        let mut sink = MemorySink::default();
        let context = TrainingContext::new(
            &model,
            &optimizer(),
            Coefficients::new(0.4, 1.0).unwrap(),
            &mut sink,
            10,
        )
        .unwrap();
        let mut trainer = Trainer::new(&model, context);
        let mut train = DataLoader::new(disaster_only, DataLoaderConfig::train(3, 9), Device::Cpu).unwrap();

        let metrics = trainer.train_epoch(&mut train, 0).unwrap();
        assert_eq!(metrics.snapshot(Task::Sentiment), (0.0, 0.0));
        assert!(metrics.task(Task::Disaster).mean_loss().is_finite());
    }

    fn parameter_values(model: &HydraNet) -> Vec<(String, Vec<f32>)> {
        model
            .named_parameters()
            .unwrap()
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap()))
            .collect()
    }

    #[test]
    fn test_step_without_sentiment_labels_moves_encoder_and_disaster_head() {
        let model = HydraNet::new(&tiny_config().unwrap(), 0.0, &Device::Cpu).unwrap();
        let before = parameter_values(&model);

        let mut sink = MemorySink::default();
        let context = TrainingContext::new(
            &model,
            &OptimizerConfig {
                learning_rate: 1e-2,
                ..Default::default()
            },
            Coefficients::new(1.0, 1.0).unwrap(),
            &mut sink,
            1,
        )
        .unwrap();
        let mut trainer = Trainer::new(&model, context);
        let disaster_only = Arc::new(mixed_dataset().only(Task::Disaster));
        let mut train = DataLoader::new(disaster_only, DataLoaderConfig::train(6, 2), Device::Cpu).unwrap();
        trainer.train_epoch(&mut train, 0).unwrap();
        assert_eq!(trainer.global_step(), 1);
        drop(trainer);

        let after = parameter_values(&model);
        let mut encoder_moved = 0;
        for ((name, old), (_, new)) in before.iter().zip(&after) {
            let moved = old != new;
            if name.starts_with("sentiment_head.") {
                assert!(!moved, "{name} changed without sentiment labels");
            } else if name.starts_with("disaster_head.") {
                assert!(moved, "{name} did not change");
            } else if !name.ends_with("attention.self.key.bias") {
                assert!(moved, "encoder parameter {name} did not change");
                encoder_moved += 1;
            }
        }
        assert!(encoder_moved > 0);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let model = net();
        let mut valid =
            DataLoader::new(mixed_dataset(), DataLoaderConfig::validation(3), Device::Cpu).unwrap();
        let first = validate_disaster(&model, &mut valid).unwrap();
        let second = validate_task(&model, &mut valid, Task::Disaster).unwrap();
        assert_eq!(first.predictions.len(), 6);
        assert_eq!(first.predictions, second.predictions);
        assert_eq!(first.weighted_f1(), second.weighted_f1());
    }

    #[test]
    fn test_predict_splits_by_task() {
        let model = net();
        let mut valid =
            DataLoader::new(mixed_dataset(), DataLoaderConfig::validation(4), Device::Cpu).unwrap();
        let predictions = predict(&model, &mut valid).unwrap();
        assert_eq!(predictions.disaster.len(), 6);
        assert_eq!(predictions.sentiment.len(), 4);
        assert!(predictions.sentiment.iter().all(|p| p.predict < 3));
        assert_eq!(predictions.report(Task::Sentiment).support, 4);
    }

    #[test]
    fn test_single_task_training() {
        let model = net();
        let mut sink = MemorySink::default();
        let context = TrainingContext::new(
            &model,
            &optimizer(),
            Coefficients::new(1.0, 1.0).unwrap(),
            &mut sink,
            1,
        )
        .unwrap();
        let mut trainer = Trainer::new(&model, context);
        let mut train = DataLoader::new(
            Arc::new(mixed_dataset().only(Task::Sentiment)),
            DataLoaderConfig::train(2, 3),
            Device::Cpu,
        )
        .unwrap();
        let totals = trainer.train_single_task(&mut train, Task::Sentiment, 0).unwrap();
        assert_eq!(totals.examples, 4);
        assert_eq!(totals.steps, 2);
    }
}
