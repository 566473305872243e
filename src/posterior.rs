//! Posterior summaries and convergence diagnostics for Metropolis chains.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::{MnlError, Result};
use crate::estimation::{parameter_name, Interval, ParameterSummary};
use crate::sampler::Chain;

/// Lower and upper quantiles of the reported credible interval.
pub const CREDIBLE_LEVELS: (f64, f64) = (0.025, 0.975);

/// Per-parameter summary of the post-burn-in draws of a chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PosteriorResult {
    /// Posterior means.
    pub means: DVector<f64>,
    /// Posterior standard deviations (sample, `n - 1` denominator).
    pub std_devs: DVector<f64>,
    /// 2.5% and 97.5% percentile intervals.
    pub credible_intervals: Vec<Interval>,
    /// Effective sample size of each parameter's trace.
    pub effective_sample_sizes: DVector<f64>,
    /// Accepted proposals over total iterations of the whole chain.
    pub acceptance_rate: f64,
    /// Number of leading draws that were discarded.
    pub burn_in: usize,
    /// Number of draws summarized.
    pub kept_draws: usize,
}

impl PosteriorResult {
    /// Coefficient table, named when `names` has one entry per parameter.
    pub fn table(&self, names: Option<&[String]>) -> Vec<ParameterSummary> {
        (0..self.means.len())
            .map(|index| ParameterSummary {
                name: parameter_name(names, index),
                estimate: self.means[index],
                std_error: Some(self.std_devs[index]),
                interval: Some(self.credible_intervals[index]),
            })
            .collect()
    }
}

/// Summarizes `chain[burn_in..]`.
///
/// Fails with [`MnlError::InsufficientSamples`] when `burn_in` is not smaller
/// than the chain length.
pub fn summarize(chain: &Chain, burn_in: usize) -> Result<PosteriorResult> {
    if burn_in >= chain.len() {
        return Err(MnlError::InsufficientSamples {
            burn_in,
            chain_length: chain.len(),
        });
    }

    let k = chain.dimension();
    let mut means = DVector::zeros(k);
    let mut std_devs = DVector::zeros(k);
    let mut effective_sample_sizes = DVector::zeros(k);
    let mut credible_intervals = Vec::with_capacity(k);

    for parameter in 0..k {
        let mut trace = chain.parameter(parameter, burn_in);
        let (mean, variance) = mean_and_variance(&trace);
        means[parameter] = mean;
        std_devs[parameter] = variance.sqrt();
        effective_sample_sizes[parameter] = effective_sample_size(&trace);

        trace.sort_by(f64::total_cmp);
        credible_intervals.push(Interval {
            lower: quantile(&trace, CREDIBLE_LEVELS.0),
            upper: quantile(&trace, CREDIBLE_LEVELS.1),
        });
    }

    Ok(PosteriorResult {
        means,
        std_devs,
        credible_intervals,
        effective_sample_sizes,
        acceptance_rate: chain.acceptance_rate(),
        burn_in,
        kept_draws: chain.len() - burn_in,
    })
}

/// Gelman–Rubin potential scale reduction factor for each parameter.
///
/// Every chain contributes its post-burn-in draws, truncated to the shortest
/// such segment. Values close to 1 indicate that the chains agree.
pub fn potential_scale_reduction(chains: &[Chain], burn_in: usize) -> Result<DVector<f64>> {
    if chains.len() < 2 {
        return Err(MnlError::invalid_configuration(
            "potential scale reduction",
            "at least two chains are required",
        ));
    }
    let k = chains[0].dimension();
    for chain in chains {
        if chain.dimension() != k {
            return Err(MnlError::dimension_mismatch(
                "chain dimension",
                k,
                chain.dimension(),
            ));
        }
    }

    let shortest = chains.iter().map(Chain::len).min().unwrap_or(0);
    if burn_in + 2 > shortest {
        return Err(MnlError::InsufficientSamples {
            burn_in,
            chain_length: shortest,
        });
    }
    let n = (shortest - burn_in) as f64;
    let m = chains.len() as f64;

    let mut r_hat = DVector::zeros(k);
    for parameter in 0..k {
        let mut chain_means = Vec::with_capacity(chains.len());
        let mut within = 0.0;
        for chain in chains {
            let mut trace = chain.parameter(parameter, burn_in);
            trace.truncate(shortest - burn_in);
            let (mean, variance) = mean_and_variance(&trace);
            chain_means.push(mean);
            within += variance / m;
        }
        let (_, between_over_n) = mean_and_variance(&chain_means);
        if !(within > 0.0) {
            return Err(MnlError::NumericalError {
                context: "within-chain variance",
            });
        }
        let pooled = (n - 1.0) / n * within + between_over_n;
        r_hat[parameter] = (pooled / within).sqrt();
    }

    Ok(r_hat)
}

/// Mean and sample variance; a single value has zero spread.
fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    match values {
        [] => (f64::NAN, f64::NAN),
        [only] => (*only, 0.0),
        _ => (values.iter().mean(), values.iter().variance()),
    }
}

/// Linear interpolation between order statistics of a sorted slice.
fn quantile(sorted: &[f64], probability: f64) -> f64 {
    let position = (sorted.len() - 1) as f64 * probability;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Effective sample size via Geyer's initial positive sequence.
///
/// A trace that never moves carries the information of a single draw.
fn effective_sample_size(trace: &[f64]) -> f64 {
    let n = trace.len();
    let (mean, variance) = mean_and_variance(trace);
    if n < 4 || !(variance > 0.0) {
        return n.min(1) as f64;
    }

    let biased_variance = variance * (n - 1) as f64 / n as f64;
    let autocorrelation = |lag: usize| -> f64 {
        let mut sum = 0.0;
        for t in 0..n - lag {
            sum += (trace[t] - mean) * (trace[t + lag] - mean);
        }
        sum / (n as f64 * biased_variance)
    };

    let mut tau = -1.0;
    let mut lag = 0usize;
    while lag + 1 < n {
        let pair = autocorrelation(lag) + autocorrelation(lag + 1);
        if pair <= 0.0 {
            break;
        }
        tau += 2.0 * pair;
        lag += 2;
    }

    (n as f64 / tau.max(1e-12)).min(n as f64)
}
