//! Bayesian optimisation over the coefficient space
//!
//! The first trials follow a randomly shifted Halton sequence. After that a
//! Gaussian process with a squared-exponential kernel is fitted to the
//! standardised scores of all trials, and the candidate with the highest
//! expected improvement is proposed. Candidates are uniform draws over the
//! unit square plus Gaussian perturbations of the incumbent.
//!
//! Scores are always maximised; [`Direction`] flips the sign for minimisation.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal as Gaussian};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use tracing::{debug, warn};

use super::space::SearchSpace;
use super::strategies::ProposalStrategy;
use super::{Direction, TrialRecord};
use crate::error::{Error, Result};
use crate::training::loss::Coefficients;

/// Lengthscales tried when fitting the surrogate, in unit-square coordinates
const LENGTHSCALES: [f64; 7] = [0.05, 0.1, 0.2, 0.35, 0.5, 0.75, 1.0];

/// Bayesian search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesianConfig {
    /// Quasi-random trials before the surrogate takes over
    pub initialization_trials: usize,
    /// Uniform candidates scored per proposal
    pub num_candidates: usize,
    /// Candidates drawn around the incumbent per proposal
    pub local_candidates: usize,
    /// Standard deviation of the incumbent perturbations
    pub local_scale: f64,
    /// Observation noise variance on standardised scores
    pub noise_variance: f64,
    /// Improvement margin in expected improvement
    pub exploration: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            initialization_trials: 5,
            num_candidates: 1024,
            local_candidates: 256,
            local_scale: 0.1,
            noise_variance: 1e-3,
            exploration: 0.01,
            seed: 2023,
        }
    }
}

impl BayesianConfig {
    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.num_candidates + self.local_candidates == 0 {
            return Err(Error::config("bayesian search needs at least one candidate"));
        }
        if !(self.local_scale > 0.0) {
            return Err(Error::config("local_scale must be > 0"));
        }
        if !(self.noise_variance > 0.0) {
            return Err(Error::config("noise_variance must be > 0"));
        }
        if self.exploration < 0.0 {
            return Err(Error::config("exploration must be >= 0"));
        }
        Ok(())
    }
}

/// Van der Corput radical inverse of `index` in `base`
fn radical_inverse(mut index: usize, base: usize) -> f64 {
    let mut result = 0.0;
    let mut f = 1.0 / base as f64;
    while index > 0 {
        result += f * (index % base) as f64;
        index /= base;
        f /= base as f64;
    }
    result
}

/// Point `index` of the 2-D Halton sequence (bases 2 and 3)
pub fn halton(index: usize) -> [f64; 2] {
    [radical_inverse(index, 2), radical_inverse(index, 3)]
}

fn squared_distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

fn rbf(a: &[f64; 2], b: &[f64; 2], lengthscale: f64) -> f64 {
    (-squared_distance(a, b) / (2.0 * lengthscale * lengthscale)).exp()
}

/// Lower Cholesky factor of a symmetric positive-definite matrix
fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve `L z = b` for lower-triangular `L`
fn forward_substitution(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (b[i] - sum) / l[[i, i]];
    }
    z
}

/// Solve `L^T x = z` for lower-triangular `L`
fn backward_substitution(l: &Array2<f64>, z: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    x
}

/// Zero-mean Gaussian process with unit signal variance
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    points: Vec<[f64; 2]>,
    chol: Array2<f64>,
    alpha: Array1<f64>,
    lengthscale: f64,
    log_marginal_likelihood: f64,
}

impl GaussianProcess {
    /// Condition on `targets` observed at `points`
    pub fn fit(points: &[[f64; 2]], targets: &Array1<f64>, lengthscale: f64, noise: f64) -> Result<Self> {
        let n = points.len();
        if n == 0 || targets.len() != n {
            return Err(Error::search("gaussian process needs one target per point"));
        }

        let mut kernel = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                kernel[[i, j]] = rbf(&points[i], &points[j], lengthscale);
            }
            kernel[[i, i]] += noise;
        }

        let chol = cholesky(&kernel)
            .ok_or_else(|| Error::search("kernel matrix is not positive definite"))?;
        let alpha = backward_substitution(&chol, &forward_substitution(&chol, targets));

        let data_fit = targets.dot(&alpha);
        let log_det: f64 = (0..n).map(|i| chol[[i, i]].ln()).sum();
        let log_marginal_likelihood =
            -0.5 * data_fit - log_det - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();

        Ok(Self {
            points: points.to_vec(),
            chol,
            alpha,
            lengthscale,
            log_marginal_likelihood,
        })
    }

    /// Fit every lengthscale in `lengthscales` and keep the most likely model
    pub fn fit_best(
        points: &[[f64; 2]],
        targets: &Array1<f64>,
        lengthscales: &[f64],
        noise: f64,
    ) -> Result<Self> {
        lengthscales
            .iter()
            .filter_map(|&ls| Self::fit(points, targets, ls, noise).ok())
            .max_by(|a, b| a.log_marginal_likelihood.total_cmp(&b.log_marginal_likelihood))
            .ok_or_else(|| Error::search("no lengthscale produced a valid surrogate"))
    }

    /// Kernel lengthscale
    pub fn lengthscale(&self) -> f64 {
        self.lengthscale
    }

    /// Log marginal likelihood of the training targets
    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }

    /// Posterior `(mean, variance)` at `x`
    pub fn predict(&self, x: &[f64; 2]) -> (f64, f64) {
        let k_star = Array1::from_iter(self.points.iter().map(|p| rbf(p, x, self.lengthscale)));
        let mean = k_star.dot(&self.alpha);
        let v = forward_substitution(&self.chol, &k_star);
        let variance = (1.0 - v.dot(&v)).max(1e-12);
        (mean, variance)
    }
}

/// Expected improvement of `N(mean, variance)` over `best` by at least `xi`
pub fn expected_improvement(standard: &Normal, mean: f64, variance: f64, best: f64, xi: f64) -> f64 {
    let sigma = variance.sqrt();
    let improvement = mean - best - xi;
    if sigma <= 0.0 {
        return improvement.max(0.0);
    }
    let z = improvement / sigma;
    improvement * standard.cdf(z) + sigma * standard.pdf(z)
}

/// Gaussian-process expected-improvement search
pub struct BayesianSearch {
    config: BayesianConfig,
    rng: StdRng,
    shift: [f64; 2],
    standard: Normal,
}

impl BayesianSearch {
    /// Create a seeded search
    pub fn new(config: BayesianConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let shift = [rng.random_range(0.0..1.0), rng.random_range(0.0..1.0)];
        let standard = Normal::new(0.0, 1.0).map_err(|e| Error::search(e.to_string()))?;
        Ok(Self {
            config,
            rng,
            shift,
            standard,
        })
    }

    fn initial_point(&self, index: usize) -> [f64; 2] {
        let h = halton(index + 1);
        [(h[0] + self.shift[0]).fract(), (h[1] + self.shift[1]).fract()]
    }

    fn random_point(&mut self) -> [f64; 2] {
        [self.rng.random_range(0.0..=1.0), self.rng.random_range(0.0..=1.0)]
    }

    fn candidates(&mut self, incumbent: [f64; 2]) -> Result<Vec<[f64; 2]>> {
        let perturbation =
            Gaussian::new(0.0, self.config.local_scale).map_err(|e| Error::search(e.to_string()))?;
        let mut candidates = Vec::with_capacity(self.config.num_candidates + self.config.local_candidates);
        for _ in 0..self.config.num_candidates {
            candidates.push(self.random_point());
        }
        for _ in 0..self.config.local_candidates {
            let dx: f64 = perturbation.sample(&mut self.rng);
            let dy: f64 = perturbation.sample(&mut self.rng);
            candidates.push([
                (incumbent[0] + dx).clamp(0.0, 1.0),
                (incumbent[1] + dy).clamp(0.0, 1.0),
            ]);
        }
        Ok(candidates)
    }
}

impl ProposalStrategy for BayesianSearch {
    fn name(&self) -> &str {
        "bayesian"
    }

    fn propose(
        &mut self,
        space: &SearchSpace,
        history: &[TrialRecord],
        direction: Direction,
    ) -> Result<Coefficients> {
        if history.len() < self.config.initialization_trials.max(1) {
            let u = self.initial_point(history.len());
            debug!(trial = history.len(), u0 = u[0], u1 = u[1], "quasi-random proposal");
            return space.from_unit(u);
        }

        let points: Vec<[f64; 2]> = history.iter().map(|r| space.to_unit(&r.coefficients)).collect();
        let scores: Vec<f64> = history.iter().map(|r| direction.score(r.fitness)).collect();
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
        let std = if std > 1e-12 { std } else { 1.0 };
        let targets = Array1::from_iter(scores.iter().map(|s| (s - mean) / std));

        let (best_index, best) = targets
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| Error::search("empty trial history"))?;

        let gp = match GaussianProcess::fit_best(&points, &targets, &LENGTHSCALES, self.config.noise_variance) {
            Ok(gp) => gp,
            Err(e) => {
                warn!(error = %e, "surrogate fit failed, proposing a random point");
                let u = self.random_point();
                return space.from_unit(u);
            }
        };

        let mut chosen = points[best_index];
        let mut chosen_ei = f64::NEG_INFINITY;
        for candidate in self.candidates(points[best_index])? {
            let (mu, var) = gp.predict(&candidate);
            let ei = expected_improvement(&self.standard, mu, var, best, self.config.exploration);
            if ei.is_finite() && ei > chosen_ei {
                chosen_ei = ei;
                chosen = candidate;
            }
        }

        debug!(
            lengthscale = gp.lengthscale(),
            log_likelihood = gp.log_marginal_likelihood(),
            expected_improvement = chosen_ei,
            "surrogate proposal"
        );
        space.from_unit(chosen)
    }
}
