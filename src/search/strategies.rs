//! Candidate proposal strategies
//!
//! A strategy sees the bounded space and every completed trial and returns the
//! next coefficients to evaluate. The search loop never looks inside it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::bayesian::{BayesianConfig, BayesianSearch};
use super::space::SearchSpace;
use super::{Direction, TrialRecord};
use crate::error::{Error, Result};
use crate::training::loss::Coefficients;

/// Pluggable `propose(history) -> candidate` capability
pub trait ProposalStrategy {
    /// Strategy name
    fn name(&self) -> &str;

    /// Next candidate given all completed trials
    fn propose(
        &mut self,
        space: &SearchSpace,
        history: &[TrialRecord],
        direction: Direction,
    ) -> Result<Coefficients>;
}

/// Available strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Regular grid, visited row by row
    Grid,
    /// Independent uniform draws
    Random,
    /// Quasi-random start, then Gaussian-process expected improvement
    #[default]
    Bayesian,
}

impl std::str::FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(Self::Grid),
            "random" => Ok(Self::Random),
            "bayesian" | "bayes" => Ok(Self::Bayesian),
            other => Err(Error::config(format!("unknown search strategy '{other}'"))),
        }
    }
}

/// Build a strategy for a budget of `total_trials`
pub fn create_strategy(
    kind: StrategyKind,
    total_trials: usize,
    bayesian: BayesianConfig,
) -> Result<Box<dyn ProposalStrategy>> {
    Ok(match kind {
        StrategyKind::Grid => Box::new(GridSearch::for_budget(total_trials)),
        StrategyKind::Random => Box::new(RandomSearch::new(bayesian.seed)),
        StrategyKind::Bayesian => Box::new(BayesianSearch::new(bayesian)?),
    })
}

/// Points of a regular `n x n` grid over the space, cycling when the budget
/// exceeds the grid
#[derive(Debug, Clone)]
pub struct GridSearch {
    points_per_axis: usize,
}

impl GridSearch {
    /// Grid with `points_per_axis` points per coefficient (at least 1)
    pub fn new(points_per_axis: usize) -> Self {
        Self {
            points_per_axis: points_per_axis.max(1),
        }
    }

    /// Smallest grid covering `total_trials` points
    pub fn for_budget(total_trials: usize) -> Self {
        let mut n = 1;
        while n * n < total_trials {
            n += 1;
        }
        Self::new(n)
    }

    fn coordinate(&self, index: usize) -> f64 {
        if self.points_per_axis == 1 {
            0.5
        } else {
            index as f64 / (self.points_per_axis - 1) as f64
        }
    }
}

impl ProposalStrategy for GridSearch {
    fn name(&self) -> &str {
        "grid"
    }

    fn propose(
        &mut self,
        space: &SearchSpace,
        history: &[TrialRecord],
        _direction: Direction,
    ) -> Result<Coefficients> {
        let n = self.points_per_axis;
        let index = history.len() % (n * n);
        space.from_unit([self.coordinate(index / n), self.coordinate(index % n)])
    }
}

/// Uniform random proposals
#[derive(Debug, Clone)]
pub struct RandomSearch {
    rng: StdRng,
}

impl RandomSearch {
    /// Seeded random search
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ProposalStrategy for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn propose(
        &mut self,
        space: &SearchSpace,
        _history: &[TrialRecord],
        _direction: Direction,
    ) -> Result<Coefficients> {
        let u = [self.rng.random_range(0.0..=1.0), self.rng.random_range(0.0..=1.0)];
        space.from_unit(u)
    }
}
