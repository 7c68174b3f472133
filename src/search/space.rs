//! Bounded parameter space over the loss coefficients

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::training::loss::Coefficients;

/// A closed float range `[lower, upper]` inside `[0, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeParameter {
    /// Parameter name
    pub name: String,
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
}

impl RangeParameter {
    /// Create a validated range
    pub fn new(name: impl Into<String>, lower: f64, upper: f64) -> Result<Self> {
        let parameter = Self {
            name: name.into(),
            lower,
            upper,
        };
        parameter.validate()?;
        Ok(parameter)
    }

    /// Both bounds inside `[0, 1]` and ordered
    pub fn validate(&self) -> Result<()> {
        for value in [self.lower, self.upper] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidCoefficients {
                    name: self.name.clone(),
                    value,
                });
            }
        }
        if self.lower > self.upper {
            return Err(Error::config(format!(
                "{}: lower bound {} exceeds upper bound {}",
                self.name, self.lower, self.upper
            )));
        }
        Ok(())
    }

    /// Whether `value` lies in the range
    pub fn contains(&self, value: f64) -> bool {
        (self.lower..=self.upper).contains(&value)
    }

    /// Map `u` in `[0, 1]` onto the range
    pub fn from_unit(&self, u: f64) -> f64 {
        (self.lower + u.clamp(0.0, 1.0) * (self.upper - self.lower)).clamp(self.lower, self.upper)
    }

    /// Map `value` onto `[0, 1]`; a degenerate range maps to its midpoint
    pub fn to_unit(&self, value: f64) -> f64 {
        let width = self.upper - self.lower;
        if width <= 0.0 {
            0.5
        } else {
            ((value - self.lower) / width).clamp(0.0, 1.0)
        }
    }
}

/// The two-dimensional search space `lambda1 x lambda2`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    /// Disaster loss weight range
    pub lambda1: RangeParameter,
    /// Sentiment loss weight range
    pub lambda2: RangeParameter,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            lambda1: RangeParameter {
                name: "lambda1".to_string(),
                lower: 0.0,
                upper: 1.0,
            },
            lambda2: RangeParameter {
                name: "lambda2".to_string(),
                lower: 0.0,
                upper: 1.0,
            },
        }
    }
}

impl SearchSpace {
    /// Space with the given `(lower, upper)` bounds per coefficient
    pub fn new(lambda1: (f64, f64), lambda2: (f64, f64)) -> Result<Self> {
        Ok(Self {
            lambda1: RangeParameter::new("lambda1", lambda1.0, lambda1.1)?,
            lambda2: RangeParameter::new("lambda2", lambda2.0, lambda2.1)?,
        })
    }

    /// Validate both ranges
    pub fn validate(&self) -> Result<()> {
        self.lambda1.validate()?;
        self.lambda2.validate()
    }

    /// Whether `coefficients` lie inside the space
    pub fn contains(&self, coefficients: &Coefficients) -> bool {
        self.lambda1.contains(coefficients.lambda1) && self.lambda2.contains(coefficients.lambda2)
    }

    /// Coefficients at unit-cube point `u`
    pub fn from_unit(&self, u: [f64; 2]) -> Result<Coefficients> {
        Coefficients::new(self.lambda1.from_unit(u[0]), self.lambda2.from_unit(u[1]))
    }

    /// Unit-cube point of `coefficients`
    pub fn to_unit(&self, coefficients: &Coefficients) -> [f64; 2] {
        [
            self.lambda1.to_unit(coefficients.lambda1),
            self.lambda2.to_unit(coefficients.lambda2),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_bounds_outside_unit_interval_rejected() {
        assert!(matches!(
            SearchSpace::new((0.0, 1.5), (0.0, 1.0)),
            Err(Error::InvalidCoefficients { .. })
        ));
        assert!(SearchSpace::new((0.8, 0.2), (0.0, 1.0)).is_err());
    }

    #[test]
    fn test_unit_mapping() {
        let space = SearchSpace::new((0.2, 0.6), (0.5, 0.5)).unwrap();
        let c = space.from_unit([0.5, 0.9]).unwrap();
        assert_relative_eq!(c.lambda1, 0.4, epsilon = 1e-12);
        assert_relative_eq!(c.lambda2, 0.5);
        let u = space.to_unit(&c);
        assert_relative_eq!(u[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(u[1], 0.5);
    }

    proptest! {
        #[test]
        fn prop_from_unit_stays_inside(u0 in 0.0f64..=1.0, u1 in 0.0f64..=1.0, lo in 0.0f64..0.5, hi in 0.5f64..=1.0) {
            let space = SearchSpace::new((lo, hi), (0.0, 1.0)).unwrap();
            let c = space.from_unit([u0, u1]).unwrap();
            prop_assert!(space.contains(&c));
        }
    }
}
