//! Black-box search over the loss coefficients
//!
//! The loop proposes a candidate, evaluates it, records the trial and repeats
//! until the trial budget is spent. There is no early stopping. The best
//! trial is chosen among all records once the budget is exhausted.

pub mod bayesian;
pub mod objective;
pub mod space;
pub mod strategies;

pub use bayesian::{BayesianConfig, BayesianSearch, GaussianProcess};
pub use objective::{FnObjective, MultiTaskObjective, Objective, ObjectiveData, RunLabels, TrialRun};
pub use space::{RangeParameter, SearchSpace};
pub use strategies::{create_strategy, GridSearch, ProposalStrategy, RandomSearch, StrategyKind};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::training::loss::Coefficients;

/// Optimisation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Higher fitness is better
    #[default]
    Maximize,
    /// Lower fitness is better
    Minimize,
}

impl Direction {
    /// From the `minimize` flag
    pub fn from_minimize(minimize: bool) -> Self {
        if minimize {
            Self::Minimize
        } else {
            Self::Maximize
        }
    }

    /// `fitness` oriented so that larger is always better
    pub fn score(self, fitness: f64) -> f64 {
        match self {
            Self::Maximize => fitness,
            Self::Minimize => -fitness,
        }
    }
}

/// One evaluated candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Zero-based trial index
    pub trial: usize,
    /// Evaluated coefficients
    pub coefficients: Coefficients,
    /// Objective value
    pub fitness: f64,
}

/// Result of a completed search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Objective name
    pub objective_name: String,
    /// Direction the search optimised in
    pub direction: Direction,
    /// Best trial
    pub best: TrialRecord,
    /// Every trial in evaluation order
    pub trials: Vec<TrialRecord>,
}

impl SearchOutcome {
    /// Best coefficients by name
    pub fn best_parameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("lambda1".to_string(), self.best.coefficients.lambda1),
            ("lambda2".to_string(), self.best.coefficients.lambda2),
        ])
    }

    /// Best objective value by objective name
    pub fn best_values(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([(self.objective_name.clone(), self.best.fitness)])
    }
}

impl fmt::Display for SearchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>6} {:>9} {:>9} {:>12}", "trial", "lambda1", "lambda2", self.objective_name)?;
        for t in &self.trials {
            let marker = if t.trial == self.best.trial { " *" } else { "" };
            writeln!(
                f,
                "{:>6} {:>9.4} {:>9.4} {:>12.4}{}",
                t.trial, t.coefficients.lambda1, t.coefficients.lambda2, t.fitness, marker
            )?;
        }
        write!(
            f,
            "best: lambda1={:.4} lambda2={:.4} {}={:.4}",
            self.best.coefficients.lambda1,
            self.best.coefficients.lambda2,
            self.objective_name,
            self.best.fitness
        )
    }
}

/// Fixed-budget search loop
#[derive(Debug, Clone)]
pub struct SearchLoop {
    space: SearchSpace,
    direction: Direction,
    total_trials: usize,
}

impl SearchLoop {
    /// Create a loop running exactly `total_trials` trials
    pub fn new(space: SearchSpace, direction: Direction, total_trials: usize) -> Result<Self> {
        space.validate()?;
        if total_trials == 0 {
            return Err(Error::config("total_trials must be > 0"));
        }
        Ok(Self {
            space,
            direction,
            total_trials,
        })
    }

    /// Search space
    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Trial budget
    pub fn total_trials(&self) -> usize {
        self.total_trials
    }

    /// Run the full budget. A failing or non-finite evaluation aborts the
    /// search with the trial index attached.
    #[instrument(skip_all, fields(objective = objective.name(), strategy = strategy.name()))]
    pub fn run(
        &self,
        objective: &mut dyn Objective,
        strategy: &mut dyn ProposalStrategy,
    ) -> Result<SearchOutcome> {
        let mut trials: Vec<TrialRecord> = Vec::with_capacity(self.total_trials);

        for trial in 0..self.total_trials {
            let coefficients = strategy.propose(&self.space, &trials, self.direction)?;
            if !self.space.contains(&coefficients) {
                return Err(Error::search(format!(
                    "strategy {} proposed ({}, {}) outside the search space",
                    strategy.name(),
                    coefficients.lambda1,
                    coefficients.lambda2
                )));
            }

            info!(
                "Trial {}/{}: lambda1={:.4}, lambda2={:.4}",
                trial + 1,
                self.total_trials,
                coefficients.lambda1,
                coefficients.lambda2
            );
            let fitness = objective
                .evaluate(&coefficients)
                .map_err(|e| Error::search_evaluation(trial, e))?;
            if !fitness.is_finite() {
                return Err(Error::search_evaluation(trial, Error::InvalidFitness(fitness)));
            }

            trials.push(TrialRecord {
                trial,
                coefficients,
                fitness,
            });
        }

        let direction = self.direction;
        let best = trials
            .iter()
            .copied()
            .reduce(|best, t| {
                if direction.score(t.fitness) > direction.score(best.fitness) {
                    t
                } else {
                    best
                }
            })
            .ok_or_else(|| Error::search("no trials were run"))?;

        info!(
            "Best parameters: lambda1={:.4}, lambda2={:.4}; {}={:.4}",
            best.coefficients.lambda1,
            best.coefficients.lambda2,
            objective.name(),
            best.fitness
        );

        Ok(SearchOutcome {
            objective_name: objective.name().to_string(),
            direction,
            best,
            trials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_score() {
        assert_eq!(Direction::Maximize.score(0.3), 0.3);
        assert_eq!(Direction::Minimize.score(0.3), -0.3);
        assert_eq!(Direction::from_minimize(false), Direction::Maximize);
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(SearchLoop::new(SearchSpace::default(), Direction::Maximize, 0).is_err());
    }

    #[test]
    fn test_minimize_picks_lowest() {
        let search = SearchLoop::new(SearchSpace::default(), Direction::Minimize, 4).unwrap();
        let mut objective = FnObjective::new("loss", |c: &Coefficients| Ok((c.lambda1 - 1.0).abs() + c.lambda2));
        let mut grid = GridSearch::new(2);
        let outcome = search.run(&mut objective, &mut grid).unwrap();
        assert_eq!(outcome.best.coefficients, Coefficients::new(1.0, 0.0).unwrap());
        assert_eq!(outcome.best.fitness, 0.0);
    }

    #[test]
    fn test_ties_keep_first_trial() {
        let search = SearchLoop::new(SearchSpace::default(), Direction::Maximize, 3).unwrap();
        let mut objective = FnObjective::new("flat", |_: &Coefficients| Ok(0.5));
        let mut random = RandomSearch::new(1);
        let outcome = search.run(&mut objective, &mut random).unwrap();
        assert_eq!(outcome.best.trial, 0);
        assert_eq!(outcome.best_values()["flat"], 0.5);
        assert!(outcome.to_string().contains("best:"));
    }
}
