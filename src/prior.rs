//! Independent priors over the part-worths used by the Metropolis sampler.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

use crate::error::{MnlError, Result};

/// Prior for a single coefficient.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterPrior {
    /// Gaussian prior `N(mean, variance)`.
    Normal {
        /// Prior mean.
        mean: f64,
        /// Prior variance; must be finite and positive.
        variance: f64,
    },
    /// Improper uniform prior; contributes nothing to the log density.
    Flat,
}

impl ParameterPrior {
    /// Zero-mean Gaussian prior with the given variance.
    pub fn normal(variance: f64) -> Self {
        Self::Normal {
            mean: 0.0,
            variance,
        }
    }

    fn log_density(&self, value: f64) -> f64 {
        match *self {
            Self::Normal { mean, variance } => match Normal::new(mean, variance.sqrt()) {
                Ok(normal) => normal.ln_pdf(value),
                // A non-positive variance has no density.
                Err(_) => f64::NEG_INFINITY,
            },
            Self::Flat => 0.0,
        }
    }
}

/// Independent per-parameter priors; a pure function of `beta`.
///
/// Deserialized values pass through [`PriorSpecification::new`], so a stored
/// prior with an invalid variance is rejected on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PriorTable")]
pub struct PriorSpecification {
    priors: Vec<ParameterPrior>,
}

#[derive(Deserialize)]
struct PriorTable {
    priors: Vec<ParameterPrior>,
}

impl TryFrom<PriorTable> for PriorSpecification {
    type Error = MnlError;

    fn try_from(table: PriorTable) -> Result<Self> {
        Self::new(table.priors)
    }
}

impl PriorSpecification {
    /// Validates and wraps one prior per parameter.
    pub fn new(priors: Vec<ParameterPrior>) -> Result<Self> {
        if priors.is_empty() {
            return Err(MnlError::dimension_mismatch("prior specification", 1, 0));
        }
        for (index, prior) in priors.iter().enumerate() {
            validate(index, prior)?;
        }
        Ok(Self { priors })
    }

    /// The same zero-mean Gaussian prior for every one of `dimension` parameters.
    pub fn normal(dimension: usize, variance: f64) -> Result<Self> {
        Self::new(vec![ParameterPrior::normal(variance); dimension])
    }

    /// Flat priors everywhere, so the posterior is proportional to the likelihood.
    pub fn flat(dimension: usize) -> Result<Self> {
        Self::new(vec![ParameterPrior::Flat; dimension])
    }

    /// Replaces the prior of one parameter, e.g. a tighter variance on price.
    pub fn with_prior(mut self, index: usize, prior: ParameterPrior) -> Result<Self> {
        if index >= self.priors.len() {
            return Err(MnlError::dimension_mismatch(
                "prior index",
                self.priors.len(),
                index + 1,
            ));
        }
        validate(index, &prior)?;
        self.priors[index] = prior;
        Ok(self)
    }

    /// Number of parameters covered.
    pub fn dimension(&self) -> usize {
        self.priors.len()
    }

    /// Per-parameter priors.
    pub fn priors(&self) -> &[ParameterPrior] {
        &self.priors
    }

    /// Sum of per-parameter log densities; `-inf` on a dimension mismatch.
    pub fn log_density(&self, beta: &DVector<f64>) -> f64 {
        if beta.len() != self.priors.len() {
            return f64::NEG_INFINITY;
        }
        self.priors
            .iter()
            .zip(beta.iter())
            .map(|(prior, value)| prior.log_density(*value))
            .sum()
    }
}

fn validate(index: usize, prior: &ParameterPrior) -> Result<()> {
    match *prior {
        ParameterPrior::Normal { mean, variance } => {
            if !(variance.is_finite() && variance > 0.0) {
                return Err(MnlError::InvalidPrior { index, variance });
            }
            if !mean.is_finite() {
                return Err(MnlError::invalid_configuration(
                    "prior mean",
                    format!("parameter {index} has non-finite mean {mean}"),
                ));
            }
            Ok(())
        }
        ParameterPrior::Flat => Ok(()),
    }
}
