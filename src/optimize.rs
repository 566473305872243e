//! BFGS minimizer configuration, diagnostics, and the bridge to `wolfe_bfgs`.
//!
//! Parameters live in `nalgebra` vectors everywhere else in the crate; the
//! solver works on `ndarray` arrays, so points and gradients are converted at
//! the boundary and nowhere else.

use std::cell::RefCell;

use log::{debug, warn};
use nalgebra::DVector;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::error::{MnlError, Result};

/// Cost reported to the line search for points where the objective is undefined.
const INFEASIBLE_COST: f64 = 1e10;

/// Configuration for the BFGS minimizer used by maximum likelihood estimation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizerOptions {
    /// Maximum number of quasi-Newton iterations before giving up.
    pub max_iterations: usize,
    /// Euclidean norm of the gradient below which the run has converged.
    pub gradient_tolerance: f64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            gradient_tolerance: 1e-7,
        }
    }
}

impl OptimizerOptions {
    /// Overrides the iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Overrides the gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tolerance: f64) -> Self {
        self.gradient_tolerance = tolerance;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(MnlError::invalid_configuration(
                "optimizer",
                "max_iterations must be at least 1",
            ));
        }
        if !(self.gradient_tolerance.is_finite() && self.gradient_tolerance > 0.0) {
            return Err(MnlError::invalid_configuration(
                "optimizer",
                format!(
                    "gradient tolerance must be finite and positive, found {}",
                    self.gradient_tolerance
                ),
            ));
        }
        Ok(())
    }
}

/// How the optimizer came to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceCriterion {
    /// The solver met `gradient_tolerance`.
    GradientNorm,
    /// The line search could not improve a point whose gradient norm is within
    /// `sqrt(gradient_tolerance)`: the objective is stationary up to rounding.
    Stalled,
}

/// Diagnostics returned alongside the minimizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizationSummary {
    /// Quasi-Newton iterations reported by the solver; `None` when it stalled.
    pub iterations: Option<usize>,
    /// Number of objective/gradient evaluations, line search included.
    pub evaluations: usize,
    /// Objective value at the returned point.
    pub objective: f64,
    /// Euclidean norm of the gradient at the returned point.
    pub gradient_norm: f64,
    /// What ended the run.
    pub criterion: ConvergenceCriterion,
}

/// Lowest objective value visited, with its gradient norm and location.
struct Incumbent {
    evaluations: usize,
    value: f64,
    gradient_norm: f64,
    point: DVector<f64>,
}

impl Incumbent {
    fn offer(&mut self, value: f64, gradient_norm: f64, point: &DVector<f64>) {
        if value < self.value {
            self.value = value;
            self.gradient_norm = gradient_norm;
            self.point.copy_from(point);
        }
    }
}

/// Minimizes a smooth objective with BFGS under a Wolfe line search.
///
/// `objective` returns the value and gradient at a point. Non-finite values
/// mark the point as infeasible; the line search sees a large cost there and
/// backs off. When the solver exhausts `max_iterations` or its line search
/// fails away from a stationary point, the lowest point visited is returned
/// inside [`MnlError::OptimizationDiverged`].
pub fn minimize<F>(
    objective: F,
    initial: DVector<f64>,
    options: &OptimizerOptions,
) -> Result<(DVector<f64>, OptimizationSummary)>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    options.validate()?;

    let (value, grad) = objective(&initial);
    if !value.is_finite() || grad.iter().any(|g| !g.is_finite()) {
        return Err(MnlError::NumericalError {
            context: "objective at the starting point",
        });
    }

    let incumbent = RefCell::new(Incumbent {
        evaluations: 1,
        value,
        gradient_norm: grad.norm(),
        point: initial.clone(),
    });

    let cost_and_grad = |point: &Array1<f64>| -> (f64, Array1<f64>) {
        let x = DVector::from_iterator(point.len(), point.iter().copied());
        let (value, grad) = objective(&x);
        let mut incumbent = incumbent.borrow_mut();
        incumbent.evaluations += 1;
        if !value.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            return (INFEASIBLE_COST, Array1::zeros(point.len()));
        }
        incumbent.offer(value, grad.norm(), &x);
        (value, grad.iter().copied().collect())
    };

    let outcome = Bfgs::new(initial.iter().copied().collect(), cost_and_grad)
        .with_tolerance(options.gradient_tolerance)
        .with_max_iterations(options.max_iterations)
        .run();
    let incumbent = incumbent.into_inner();

    match outcome {
        Ok(BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        }) => {
            let x = DVector::from_iterator(final_point.len(), final_point.iter().copied());
            let gradient_norm = objective(&x).1.norm();
            debug!(
                "bfgs converged after {iterations} iterations: objective {final_value:.12}, gradient norm {gradient_norm:.3e}"
            );
            Ok((
                x,
                OptimizationSummary {
                    iterations: Some(iterations),
                    evaluations: incumbent.evaluations + 1,
                    objective: final_value,
                    gradient_norm,
                    criterion: ConvergenceCriterion::GradientNorm,
                },
            ))
        }
        Err(err) if incumbent.gradient_norm < options.gradient_tolerance.sqrt() => {
            warn!(
                "bfgs stopped early ({err:?}) at gradient norm {:.3e}; accepting the stationary point",
                incumbent.gradient_norm
            );
            Ok((
                incumbent.point,
                OptimizationSummary {
                    iterations: None,
                    evaluations: incumbent.evaluations,
                    objective: incumbent.value,
                    gradient_norm: incumbent.gradient_norm,
                    criterion: ConvergenceCriterion::Stalled,
                },
            ))
        }
        Err(err) => {
            debug!("bfgs failed: {err:?}");
            Err(MnlError::OptimizationDiverged {
                evaluations: incumbent.evaluations,
                gradient_norm: incumbent.gradient_norm,
                last_iterate: incumbent.point.iter().copied().collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn rosenbrock(x: &DVector<f64>) -> (f64, DVector<f64>) {
        let (a, b) = (x[0], x[1]);
        let value = (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2);
        let grad = DVector::from_vec(vec![
            -2.0 * (1.0 - a) - 400.0 * a * (b - a * a),
            200.0 * (b - a * a),
        ]);
        (value, grad)
    }

    #[test]
    fn minimizes_quadratic() {
        let target = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let weights = DVector::from_vec(vec![1.0, 10.0, 100.0]);
        let objective = |x: &DVector<f64>| {
            let diff = x - &target;
            let value = 0.5 * diff.component_mul(&weights).dot(&diff);
            (value, diff.component_mul(&weights))
        };
        let (x, summary) =
            minimize(objective, DVector::zeros(3), &OptimizerOptions::default()).unwrap();
        assert_relative_eq!(x, target, epsilon = 1e-5);
        assert!(summary.evaluations > 1);
        assert!(summary.gradient_norm < 1e-3);
    }

    #[test]
    fn solves_rosenbrock() {
        let options = OptimizerOptions::default().with_max_iterations(500);
        let (x, summary) =
            minimize(rosenbrock, DVector::from_vec(vec![-1.2, 1.0]), &options).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-2);
        assert_relative_eq!(x[1], 1.0, epsilon = 2e-2);
        assert!(summary.objective < 1e-4);
    }

    #[test]
    fn reports_divergence_with_best_point() {
        let options = OptimizerOptions::default().with_max_iterations(1);
        let start = DVector::from_vec(vec![-1.2, 1.0]);
        let start_value = rosenbrock(&start).0;
        match minimize(rosenbrock, start, &options) {
            Err(MnlError::OptimizationDiverged {
                evaluations,
                last_iterate,
                ..
            }) => {
                assert!(evaluations >= 1);
                assert_eq!(last_iterate.len(), 2);
                let best = rosenbrock(&DVector::from_vec(last_iterate)).0;
                assert!(best <= start_value);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn unbounded_objective_never_converges() {
        let linear = |x: &DVector<f64>| (-x[0], DVector::from_vec(vec![-1.0]));
        let options = OptimizerOptions::default().with_max_iterations(20);
        assert!(matches!(
            minimize(linear, DVector::zeros(1), &options),
            Err(MnlError::OptimizationDiverged { .. })
        ));
    }

    #[test]
    fn rejects_unusable_options() {
        let quadratic = |x: &DVector<f64>| (x.dot(x), x * 2.0);
        for options in [
            OptimizerOptions::default().with_max_iterations(0),
            OptimizerOptions::default().with_gradient_tolerance(0.0),
            OptimizerOptions::default().with_gradient_tolerance(f64::NAN),
        ] {
            assert!(matches!(
                minimize(quadratic, DVector::zeros(2), &options),
                Err(MnlError::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn undefined_start_is_a_numerical_error() {
        let undefined = |x: &DVector<f64>| (f64::NAN, x.clone());
        assert!(matches!(
            minimize(undefined, DVector::zeros(2), &OptimizerOptions::default()),
            Err(MnlError::NumericalError { .. })
        ));
    }
}
