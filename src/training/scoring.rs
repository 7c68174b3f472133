//! Classification scores over recorded predictions
//!
//! Per-class precision, recall and F1 follow the usual conventions: a ratio
//! with a zero denominator is 0. Averages only cover labels that occur in the
//! targets or the predictions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One predicted class and its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class
    pub predict: u32,
    /// True class
    pub target: u32,
}

/// Scores of a single class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    /// Class index
    pub class: u32,
    /// Precision
    pub precision: f64,
    /// Recall
    pub recall: f64,
    /// F1
    pub f1: f64,
    /// Number of targets of this class
    pub support: usize,
}

/// Summary of a set of predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Per-class scores for every label that occurs
    pub classes: Vec<ClassScores>,
    /// Fraction of correct predictions
    pub accuracy: f64,
    /// Unweighted mean F1
    pub macro_f1: f64,
    /// Support-weighted mean F1
    pub weighted_f1: f64,
    /// Number of predictions
    pub support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ClassificationReport {
    /// Score `predictions` of a `num_classes`-way classifier
    pub fn from_predictions(predictions: &[Prediction], num_classes: usize) -> Self {
        let width = predictions
            .iter()
            .map(|p| p.predict.max(p.target) as usize + 1)
            .max()
            .unwrap_or(0)
            .max(num_classes);

        let mut true_pos = vec![0usize; width];
        let mut predicted = vec![0usize; width];
        let mut actual = vec![0usize; width];
        for p in predictions {
            predicted[p.predict as usize] += 1;
            actual[p.target as usize] += 1;
            if p.predict == p.target {
                true_pos[p.target as usize] += 1;
            }
        }

        let classes: Vec<ClassScores> = (0..width)
            .filter(|&c| predicted[c] > 0 || actual[c] > 0)
            .map(|c| {
                let precision = ratio(true_pos[c], predicted[c]);
                let recall = ratio(true_pos[c], actual[c]);
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                ClassScores {
                    class: c as u32,
                    precision,
                    recall,
                    f1,
                    support: actual[c],
                }
            })
            .collect();

        let support = predictions.len();
        let correct: usize = true_pos.iter().sum();
        let macro_f1 = if classes.is_empty() {
            0.0
        } else {
            classes.iter().map(|c| c.f1).sum::<f64>() / classes.len() as f64
        };
        let weighted_f1 = if support == 0 {
            0.0
        } else {
            classes.iter().map(|c| c.f1 * c.support as f64).sum::<f64>() / support as f64
        };

        Self {
            classes,
            accuracy: ratio(correct, support),
            macro_f1,
            weighted_f1,
            support,
        }
    }

    /// Scores of `class`, if it occurs
    pub fn class(&self, class: u32) -> Option<&ClassScores> {
        self.classes.iter().find(|c| c.class == class)
    }

    /// F1 of the positive class (1) of a binary task
    pub fn binary_f1(&self) -> f64 {
        self.class(1).map(|c| c.f1).unwrap_or(0.0)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>12} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.class, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{:>12} {:>9} {:>9} {:>9.2} {:>9}", "accuracy", "", "", self.accuracy, self.support)?;
        writeln!(f, "{:>12} {:>9} {:>9} {:>9.2} {:>9}", "macro f1", "", "", self.macro_f1, self.support)?;
        write!(f, "{:>12} {:>9} {:>9} {:>9.2} {:>9}", "weighted f1", "", "", self.weighted_f1, self.support)
    }
}
