//! Multinomial logit log-likelihood, its derivatives, and predicted choice probabilities.

use nalgebra::{DMatrix, DVector};

use crate::data::ChoiceDataset;
use crate::error::{MnlError, Result};

/// Numerically stable `ln(sum(exp(values)))`.
///
/// Returns `-inf` for an empty slice or when every value is `-inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    // The maximal term contributes exp(0) = 1, so the sum is never below one.
    let sum: f64 = values.iter().map(|value| (value - max).exp()).sum();
    max + sum.ln()
}

/// Log-likelihood of the observed choices at `beta`.
///
/// Returns `f64::NEG_INFINITY` when `beta` has the wrong length or contains
/// non-finite entries; never panics for any input.
pub fn log_likelihood(beta: &DVector<f64>, dataset: &ChoiceDataset) -> f64 {
    let Some(utilities) = utilities(beta, dataset) else {
        return f64::NEG_INFINITY;
    };

    let mut total = 0.0_f64;
    for set in dataset.sets() {
        let block = &utilities.as_slice()[set.range()];
        total += utilities[set.chosen_row()] - log_sum_exp(block);
    }

    if total.is_nan() {
        f64::NEG_INFINITY
    } else {
        total
    }
}

/// Gradient of [`log_likelihood`]: `sum_i (x_chosen - sum_j P_ij x_ij)`.
pub fn gradient(beta: &DVector<f64>, dataset: &ChoiceDataset) -> Result<DVector<f64>> {
    let utilities = checked_utilities(beta, dataset)?;
    let design = dataset.design();
    let mut gradient = DVector::zeros(dataset.dimension());
    let mut probabilities = Vec::new();

    for set in dataset.sets() {
        set_probabilities(&utilities.as_slice()[set.range()], &mut probabilities);
        let chosen = set.chosen_row();
        for (offset, row) in set.range().enumerate() {
            let weight = f64::from(u8::from(row == chosen)) - probabilities[offset];
            for column in 0..gradient.len() {
                gradient[column] += weight * design[(row, column)];
            }
        }
    }

    Ok(gradient)
}

/// Hessian of [`log_likelihood`]: `-sum_i sum_j P_ij (x_ij - xbar_i)(x_ij - xbar_i)'`.
///
/// The negative of this matrix is the observed information used for standard errors.
pub fn hessian(beta: &DVector<f64>, dataset: &ChoiceDataset) -> Result<DMatrix<f64>> {
    let utilities = checked_utilities(beta, dataset)?;
    let design = dataset.design();
    let k = dataset.dimension();
    let mut hessian = DMatrix::zeros(k, k);
    let mut mean = DVector::zeros(k);
    let mut centered = DVector::zeros(k);
    let mut probabilities = Vec::new();

    for set in dataset.sets() {
        set_probabilities(&utilities.as_slice()[set.range()], &mut probabilities);

        mean.fill(0.0);
        for (offset, row) in set.range().enumerate() {
            for column in 0..k {
                mean[column] += probabilities[offset] * design[(row, column)];
            }
        }
        for (offset, row) in set.range().enumerate() {
            for column in 0..k {
                centered[column] = design[(row, column)] - mean[column];
            }
            hessian.ger(-probabilities[offset], &centered, &centered, 1.0);
        }
    }

    Ok(hessian)
}

/// Model-implied probability of every alternative, aligned with the design rows.
pub fn choice_probabilities(beta: &DVector<f64>, dataset: &ChoiceDataset) -> Result<DVector<f64>> {
    let utilities = checked_utilities(beta, dataset)?;
    let mut predicted = DVector::zeros(dataset.alternative_count());
    let mut probabilities = Vec::new();

    for set in dataset.sets() {
        set_probabilities(&utilities.as_slice()[set.range()], &mut probabilities);
        for (offset, row) in set.range().enumerate() {
            predicted[row] = probabilities[offset];
        }
    }

    Ok(predicted)
}

/// Share of choice sets where the highest-utility alternative was the one chosen.
///
/// Ties go to the first alternative in the set.
pub fn hit_rate(beta: &DVector<f64>, dataset: &ChoiceDataset) -> Result<f64> {
    let utilities = checked_utilities(beta, dataset)?;
    let mut hits = 0usize;

    for set in dataset.sets() {
        let mut best = set.start;
        for row in set.range() {
            if utilities[row] > utilities[best] {
                best = row;
            }
        }
        if best == set.chosen_row() {
            hits += 1;
        }
    }

    Ok(hits as f64 / dataset.set_count() as f64)
}

fn utilities(beta: &DVector<f64>, dataset: &ChoiceDataset) -> Option<DVector<f64>> {
    if beta.len() != dataset.dimension() || beta.iter().any(|value| !value.is_finite()) {
        return None;
    }
    Some(dataset.design() * beta)
}

fn checked_utilities(beta: &DVector<f64>, dataset: &ChoiceDataset) -> Result<DVector<f64>> {
    if beta.len() != dataset.dimension() {
        return Err(MnlError::dimension_mismatch(
            "parameter vector",
            dataset.dimension(),
            beta.len(),
        ));
    }
    utilities(beta, dataset).ok_or(MnlError::NumericalError {
        context: "utility evaluation",
    })
}

/// Softmax of one set's utilities into `out`, shifted by the maximum.
fn set_probabilities(utilities: &[f64], out: &mut Vec<f64>) {
    let max = utilities
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    out.clear();
    out.extend(utilities.iter().map(|u| (u - max).exp()));
    let denominator: f64 = out.iter().sum();
    for value in out.iter_mut() {
        *value /= denominator;
    }
}
