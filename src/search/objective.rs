//! Objective functions evaluated by the search loop

use std::marker::PhantomData;
use std::sync::Arc;

use candle_core::Device;
use serde_json::json;
use tracing::{info, instrument};

use crate::error::Result;
use crate::model::MultiTaskModel;
use crate::training::config::{OptimizerConfig, TrainingParams};
use crate::training::data::{DataLoader, DataLoaderConfig, MultiTaskDataset};
use crate::training::loss::Coefficients;
use crate::training::metrics::exporters::{begin_run, finish_run};
use crate::training::metrics::{MetricsSink, RunInfo};
use crate::training::trainer::{validate_disaster, EpochReport, Trainer, TrainingContext, ValidationReport};

/// A black-box fitness function over loss coefficients
pub trait Objective {
    /// Name of the returned value
    fn name(&self) -> &str;

    /// Fitness of one coefficient pair
    fn evaluate(&mut self, coefficients: &Coefficients) -> Result<f64>;
}

/// Objective backed by a closure
pub struct FnObjective<F> {
    name: String,
    f: F,
}

impl<F> FnObjective<F>
where
    F: FnMut(&Coefficients) -> Result<f64>,
{
    /// Wrap `f` under `name`
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Objective for FnObjective<F>
where
    F: FnMut(&Coefficients) -> Result<f64>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, coefficients: &Coefficients) -> Result<f64> {
        (self.f)(coefficients)
    }
}

/// Datasets used by one search
#[derive(Debug, Clone)]
pub struct ObjectiveData {
    /// Combined training set
    pub train: Arc<MultiTaskDataset>,
    /// Combined validation set, used for per-epoch `_test_` metrics
    pub valid: Arc<MultiTaskDataset>,
    /// Disaster-only validation set, used for the fitness
    pub disaster_valid: Arc<MultiTaskDataset>,
}

/// Where run lifecycle events are reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLabels {
    /// Project name
    pub project: String,
    /// Group shared by all trials of a search
    pub group: String,
}

/// Everything one joint training run produced
pub struct TrialRun<M> {
    /// The trained model, handed to the caller for persistence
    pub model: M,
    /// Per-epoch training and validation metrics
    pub epochs: Vec<EpochReport>,
    /// Disaster-only validation of the final model
    pub disaster: ValidationReport,
}

/// Trains a fresh model per call and scores its disaster weighted F1
pub struct MultiTaskObjective<'a, M, B> {
    name: String,
    build_model: B,
    device: Device,
    training: TrainingParams,
    optimizer: OptimizerConfig,
    labels: RunLabels,
    train_loader: DataLoader,
    valid_loader: DataLoader,
    disaster_loader: DataLoader,
    sink: &'a mut dyn MetricsSink,
    trials_run: usize,
    _model: PhantomData<M>,
}

impl<'a, M, B> MultiTaskObjective<'a, M, B>
where
    M: MultiTaskModel,
    B: FnMut(&Device) -> Result<M>,
{
    /// Create an objective. `build_model` is called once per evaluation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        build_model: B,
        device: Device,
        training: TrainingParams,
        optimizer: OptimizerConfig,
        data: ObjectiveData,
        labels: RunLabels,
        sink: &'a mut dyn MetricsSink,
    ) -> Result<Self> {
        training.validate()?;
        optimizer.validate()?;

        let train_loader = DataLoader::new(
            data.train,
            DataLoaderConfig::train(training.train_batch_size, training.seed),
            device.clone(),
        )?;
        let valid_loader = DataLoader::new(
            data.valid,
            DataLoaderConfig::validation(training.valid_batch_size),
            device.clone(),
        )?;
        let disaster_loader = DataLoader::new(
            data.disaster_valid,
            DataLoaderConfig::validation(training.valid_batch_size),
            device.clone(),
        )?;

        Ok(Self {
            name: name.into(),
            build_model,
            device,
            training,
            optimizer,
            labels,
            train_loader,
            valid_loader,
            disaster_loader,
            sink,
            trials_run: 0,
            _model: PhantomData,
        })
    }

    /// Completed or attempted runs
    pub fn trials_run(&self) -> usize {
        self.trials_run
    }

    fn run_info(&self, trial: usize, coefficients: &Coefficients) -> RunInfo {
        RunInfo {
            project: self.labels.project.clone(),
            group: self.labels.group.clone(),
            name: format!("{}-trial-{}", self.labels.group, trial),
            config: json!({
                "epochs": self.training.num_epochs,
                "batch_size": self.training.train_batch_size,
                "lr": self.optimizer.learning_rate,
                "optimizer": self.optimizer.optimizer_name(),
                "loss": "CrossEntropyLoss",
                "max_length": self.training.max_seq_length,
                "lambda1": coefficients.lambda1,
                "lambda2": coefficients.lambda2,
            }),
        }
    }

    /// Build a fresh model, train it jointly with `coefficients` and validate
    /// it on the disaster task
    #[instrument(skip(self), fields(trial = self.trials_run))]
    pub fn run(&mut self, coefficients: &Coefficients) -> Result<TrialRun<M>> {
        coefficients.validate()?;
        let trial = self.trials_run;
        self.trials_run += 1;

        let model = (self.build_model)(&self.device)?;
        let run = self.run_info(trial, coefficients);
        begin_run(&mut *self.sink, &run);
        let result = self.train_and_validate(&model, *coefficients);
        finish_run(&mut *self.sink);

        let (epochs, disaster) = result?;
        Ok(TrialRun {
            model,
            epochs,
            disaster,
        })
    }

    fn train_and_validate(
        &mut self,
        model: &M,
        coefficients: Coefficients,
    ) -> Result<(Vec<EpochReport>, ValidationReport)> {
        let context = TrainingContext::new(
            model,
            &self.optimizer,
            coefficients,
            &mut *self.sink,
            self.training.log_every,
        )?;
        let mut trainer = Trainer::new(model, context);
        let valid = if self.training.validate_each_epoch {
            Some(&mut self.valid_loader)
        } else {
            None
        };
        let epochs = trainer.fit(&mut self.train_loader, valid, self.training.num_epochs)?;
        drop(trainer);

        let disaster = validate_disaster(model, &mut self.disaster_loader)?;
        Ok((epochs, disaster))
    }
}

impl<M, B> Objective for MultiTaskObjective<'_, M, B>
where
    M: MultiTaskModel,
    B: FnMut(&Device) -> Result<M>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, coefficients: &Coefficients) -> Result<f64> {
        let run = self.run(coefficients)?;
        let fitness = run.disaster.weighted_f1();
        info!(
            lambda1 = coefficients.lambda1,
            lambda2 = coefficients.lambda2,
            fitness,
            "{} = {:.4}",
            self.name,
            fitness
        );
        Ok(fitness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_objective() {
        let mut objective = FnObjective::new("sum", |c: &Coefficients| Ok(c.lambda1 + c.lambda2));
        assert_eq!(objective.name(), "sum");
        let value = objective.evaluate(&Coefficients::new(0.25, 0.5).unwrap()).unwrap();
        assert_eq!(value, 0.75);
    }
}
