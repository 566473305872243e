//! Maximum likelihood estimation of multinomial logit part-worths.

use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::ChoiceDataset;
use crate::error::{MnlError, Result};
use crate::likelihood::{gradient, hessian, log_likelihood};
use crate::optimize::{minimize, OptimizationSummary, OptimizerOptions};

/// Configuration knobs for maximum likelihood estimation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MleOptions {
    /// Options for the quasi-Newton optimizer.
    pub optimizer: OptimizerOptions,
    /// Normal quantile used for confidence intervals (1.96 gives 95%).
    pub confidence_z: f64,
}

impl Default for MleOptions {
    fn default() -> Self {
        Self {
            optimizer: OptimizerOptions::default(),
            confidence_z: 1.96,
        }
    }
}

impl MleOptions {
    /// Overrides the optimizer options.
    pub fn with_optimizer(mut self, optimizer: OptimizerOptions) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Overrides the normal quantile used for confidence intervals.
    pub fn with_confidence_z(mut self, z: f64) -> Self {
        self.confidence_z = z;
        self
    }
}

/// Symmetric interval around a point estimate or between two quantiles.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
}

impl Interval {
    /// Whether `value` lies inside the closed interval.
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// One row of a coefficient table for external rendering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    /// Attribute name, or `beta_{index}` when the dataset is unnamed.
    pub name: String,
    /// Point estimate (MLE) or posterior mean.
    pub estimate: f64,
    /// Standard error (MLE) or posterior standard deviation.
    pub std_error: Option<f64>,
    /// Confidence or credible interval.
    pub interval: Option<Interval>,
}

/// Outcome of a successful maximum likelihood fit.
///
/// When the observed information is not positive definite the point estimate
/// is still reported; the uncertainty fields are `None` and
/// `covariance_error` holds [`MnlError::CovarianceDegenerate`].
#[derive(Clone, Debug, Serialize)]
pub struct EstimationResult {
    /// Maximum likelihood part-worths.
    pub beta: DVector<f64>,
    /// Log-likelihood at `beta`.
    pub log_likelihood: f64,
    /// Log-likelihood of the equal-probability model (`beta = 0`).
    pub null_log_likelihood: f64,
    /// Number of choice sets used.
    pub set_count: usize,
    /// Optimizer diagnostics.
    pub optimization: OptimizationSummary,
    /// Inverse observed information at `beta`.
    pub covariance: Option<DMatrix<f64>>,
    /// Square roots of the covariance diagonal.
    pub standard_errors: Option<DVector<f64>>,
    /// `beta_i ± z * se_i`.
    pub confidence_intervals: Option<Vec<Interval>>,
    /// Warning-level error raised while forming the covariance.
    pub covariance_error: Option<MnlError>,
    /// Attribute names copied from the dataset.
    pub attribute_names: Option<Vec<String>>,
}

impl EstimationResult {
    /// McFadden's pseudo R²: `1 - LL(beta) / LL(0)`.
    pub fn pseudo_r_squared(&self) -> f64 {
        1.0 - self.log_likelihood / self.null_log_likelihood
    }

    /// Wald statistics `beta_i / se_i`, when standard errors exist.
    pub fn z_scores(&self) -> Option<DVector<f64>> {
        self.standard_errors
            .as_ref()
            .map(|se| self.beta.component_div(se))
    }

    /// Coefficient table with one row per attribute.
    pub fn table(&self) -> Vec<ParameterSummary> {
        (0..self.beta.len())
            .map(|index| ParameterSummary {
                name: parameter_name(self.attribute_names.as_deref(), index),
                estimate: self.beta[index],
                std_error: self.standard_errors.as_ref().map(|se| se[index]),
                interval: self
                    .confidence_intervals
                    .as_ref()
                    .map(|intervals| intervals[index]),
            })
            .collect()
    }
}

/// Maximum likelihood estimator for the fixed-effects multinomial logit.
#[derive(Clone, Debug, Default)]
pub struct MleEstimator {
    options: MleOptions,
}

impl MleEstimator {
    /// Creates an estimator with the given options.
    pub fn new(options: MleOptions) -> Self {
        Self { options }
    }

    /// Accessor for the configured options.
    pub fn options(&self) -> &MleOptions {
        &self.options
    }

    /// Fits the model starting from `beta = 0`.
    pub fn fit(&self, dataset: &ChoiceDataset) -> Result<EstimationResult> {
        self.fit_from(dataset, &DVector::zeros(dataset.dimension()))
    }

    /// Fits the model from an explicit starting point.
    ///
    /// The optimizer minimizes the mean negative log-likelihood, so its
    /// tolerances do not depend on the number of choice sets.
    pub fn fit_from(
        &self,
        dataset: &ChoiceDataset,
        initial: &DVector<f64>,
    ) -> Result<EstimationResult> {
        let k = dataset.dimension();
        if initial.len() != k {
            return Err(MnlError::dimension_mismatch("initial beta", k, initial.len()));
        }
        if !(self.options.confidence_z > 0.0) {
            return Err(MnlError::invalid_configuration(
                "confidence_z",
                format!("must be positive, found {}", self.options.confidence_z),
            ));
        }

        info!(
            "fitting multinomial logit: {} choice sets, {} alternatives, {} parameters",
            dataset.set_count(),
            dataset.alternative_count(),
            k
        );

        let scale = 1.0 / dataset.set_count() as f64;
        let objective = |beta: &DVector<f64>| {
            let value = -log_likelihood(beta, dataset) * scale;
            let grad = match gradient(beta, dataset) {
                Ok(grad) => -grad * scale,
                Err(_) => DVector::from_element(beta.len(), f64::NAN),
            };
            (value, grad)
        };

        let (beta, optimization) =
            minimize(objective, initial.clone(), &self.options.optimizer)?;

        let log_likelihood_value = log_likelihood(&beta, dataset);
        let null_log_likelihood = log_likelihood(&DVector::zeros(k), dataset);

        let (covariance, covariance_error) = match observed_covariance(&beta, dataset) {
            Ok(covariance) => (Some(covariance), None),
            Err(err) => {
                warn!("point estimate available but uncertainty is not: {err}");
                (None, Some(err))
            }
        };

        let standard_errors = covariance
            .as_ref()
            .map(|cov| cov.diagonal().map(f64::sqrt));
        let confidence_intervals = standard_errors.as_ref().map(|se| {
            beta.iter()
                .zip(se.iter())
                .map(|(b, s)| Interval {
                    lower: b - self.options.confidence_z * s,
                    upper: b + self.options.confidence_z * s,
                })
                .collect()
        });

        info!(
            "converged after {} evaluations ({:?}); log-likelihood {:.4}",
            optimization.evaluations, optimization.criterion, log_likelihood_value
        );

        Ok(EstimationResult {
            beta,
            log_likelihood: log_likelihood_value,
            null_log_likelihood,
            set_count: dataset.set_count(),
            optimization,
            covariance,
            standard_errors,
            confidence_intervals,
            covariance_error,
            attribute_names: dataset.attribute_names().map(<[String]>::to_vec),
        })
    }

    /// Runs independent fits from every start in parallel and keeps the best.
    ///
    /// Returns the fit with the highest log-likelihood; if every start fails,
    /// the error of the first start is returned.
    pub fn fit_multistart(
        &self,
        dataset: &ChoiceDataset,
        starts: &[DVector<f64>],
    ) -> Result<EstimationResult> {
        if starts.is_empty() {
            return Err(MnlError::invalid_configuration(
                "multistart",
                "at least one starting point is required",
            ));
        }

        let fits: Vec<Result<EstimationResult>> = starts
            .par_iter()
            .map(|start| self.fit_from(dataset, start))
            .collect();

        let mut best: Option<EstimationResult> = None;
        let mut first_error = None;
        for fit in fits {
            match fit {
                Ok(result) => {
                    let better = best
                        .as_ref()
                        .map_or(true, |current| result.log_likelihood > current.log_likelihood);
                    if better {
                        best = Some(result);
                    }
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match (best, first_error) {
            (Some(result), _) => Ok(result),
            (None, Some(err)) => Err(err),
            (None, None) => Err(MnlError::NumericalError {
                context: "multistart estimation",
            }),
        }
    }

    /// Draws `count` starting points `N(0, scale²)` from `rng` and runs [`fit_multistart`](Self::fit_multistart).
    pub fn fit_random_starts<R: Rng + ?Sized>(
        &self,
        dataset: &ChoiceDataset,
        count: usize,
        scale: f64,
        rng: &mut R,
    ) -> Result<EstimationResult> {
        let k = dataset.dimension();
        let starts: Vec<DVector<f64>> = (0..count)
            .map(|_| {
                DVector::from_iterator(
                    k,
                    (0..k).map(|_| {
                        let z: f64 = StandardNormal.sample(rng);
                        scale * z
                    }),
                )
            })
            .collect();
        self.fit_multistart(dataset, &starts)
    }
}

/// Inverts the observed information `-H(beta)` via Cholesky.
fn observed_covariance(beta: &DVector<f64>, dataset: &ChoiceDataset) -> Result<DMatrix<f64>> {
    let information = -hessian(beta, dataset)?;
    let cholesky = nalgebra::linalg::Cholesky::new(information)
        .ok_or_else(|| MnlError::degenerate("observed information"))?;

    // Reject numerically singular factors that slip through with a tiny pivot.
    let pivots = cholesky.l_dirty().diagonal();
    let (smallest, largest) = (pivots.min(), pivots.max());
    if !(smallest > 0.0) || smallest * smallest < largest * largest * 1e-12 {
        return Err(MnlError::degenerate("observed information"));
    }

    let covariance = cholesky.inverse();
    if covariance.diagonal().iter().any(|v| !(v.is_finite() && *v > 0.0)) {
        return Err(MnlError::degenerate("observed information"));
    }
    Ok(covariance)
}

pub(crate) fn parameter_name(names: Option<&[String]>, index: usize) -> String {
    names
        .and_then(|names| names.get(index).cloned())
        .unwrap_or_else(|| format!("beta_{index}"))
}
