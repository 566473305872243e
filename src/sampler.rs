//! Random-walk Metropolis-Hastings over the multinomial logit posterior.
//!
//! A [`MetropolisSampler`] moves through three states: it is `Initialized`
//! at a fixed starting point, `Sampling` while draws are appended, and `Done`
//! once the configured number of draws exists. Each iteration proposes
//! `beta' = beta + eps` with independent `eps_i ~ N(0, step_i^2)`, accepts when
//! `ln U < log_post(beta') - log_post(beta)`, and appends the current state to
//! the chain whether or not the proposal was accepted.
//!
//! Randomness comes only from the generator handed to [`MetropolisSampler::run`]
//! or the seeds handed to [`sample_chains`], so chains are reproducible and
//! independent chains never share state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::ChoiceDataset;
use crate::error::{MnlError, Result};
use crate::likelihood::log_likelihood;
use crate::prior::PriorSpecification;

/// Configuration of a Metropolis run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplerOptions {
    /// Total number of draws kept in the chain, burn-in included.
    pub draws: usize,
    /// Standard deviation of the Gaussian proposal for each coordinate.
    pub step_sizes: DVector<f64>,
    /// Starting point; all zeros when `None`.
    pub initial: Option<DVector<f64>>,
}

impl SamplerOptions {
    /// 11,000 draws from the origin with the given per-coordinate step sizes.
    pub fn new(step_sizes: DVector<f64>) -> Self {
        Self {
            draws: 11_000,
            step_sizes,
            initial: None,
        }
    }

    /// Step sizes `2.38 / sqrt(K) * se_i`, the usual random-walk scaling for a
    /// roughly Gaussian posterior with the given marginal standard deviations.
    pub fn from_standard_errors(standard_errors: &DVector<f64>) -> Self {
        let factor = 2.38 / (standard_errors.len().max(1) as f64).sqrt();
        Self::new(standard_errors * factor)
    }

    /// Overrides the number of draws.
    pub fn with_draws(mut self, draws: usize) -> Self {
        self.draws = draws;
        self
    }

    /// Overrides the starting point.
    pub fn with_initial(mut self, initial: DVector<f64>) -> Self {
        self.initial = Some(initial);
        self
    }
}

/// Lifecycle of a sampler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerState {
    /// Positioned at the starting point, no draws yet.
    Initialized,
    /// At least one draw appended, more to come.
    Sampling,
    /// The chain has reached its configured length.
    Done,
}

/// Shared counter of completed iterations, readable from other threads.
#[derive(Clone, Debug, Default)]
pub struct SamplerProgress(Arc<AtomicUsize>);

impl SamplerProgress {
    /// Iterations completed so far.
    pub fn completed(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn advance(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Raw output of a Metropolis run: every draw plus acceptance metadata.
///
/// A deserialized chain is checked for internal consistency before use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ChainRecord")]
pub struct Chain {
    dimension: usize,
    draws: Vec<f64>,
    accepted: usize,
    iterations: usize,
    step_sizes: DVector<f64>,
}

#[derive(Deserialize)]
struct ChainRecord {
    dimension: usize,
    draws: Vec<f64>,
    accepted: usize,
    iterations: usize,
    step_sizes: DVector<f64>,
}

impl TryFrom<ChainRecord> for Chain {
    type Error = MnlError;

    fn try_from(record: ChainRecord) -> Result<Self> {
        if record.dimension == 0 || record.draws.len() % record.dimension != 0 {
            return Err(MnlError::invalid_configuration(
                "chain",
                format!(
                    "{} stored values do not form draws of dimension {}",
                    record.draws.len(),
                    record.dimension
                ),
            ));
        }
        if record.step_sizes.len() != record.dimension {
            return Err(MnlError::dimension_mismatch(
                "chain step sizes",
                record.dimension,
                record.step_sizes.len(),
            ));
        }
        let draws = record.draws.len() / record.dimension;
        if record.iterations != draws || record.accepted > record.iterations {
            return Err(MnlError::invalid_configuration(
                "chain",
                format!(
                    "{} accepted of {} iterations is inconsistent with {draws} draws",
                    record.accepted, record.iterations
                ),
            ));
        }
        Ok(Self {
            dimension: record.dimension,
            draws: record.draws,
            accepted: record.accepted,
            iterations: record.iterations,
            step_sizes: record.step_sizes,
        })
    }
}

impl Chain {
    /// Number of draws.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.draws.len() / self.dimension
        }
    }

    /// Whether the chain holds no draws.
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    /// Number of parameters per draw.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The `index`-th draw.
    pub fn draw(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.dimension)?;
        self.draws.get(start..start + self.dimension)
    }

    /// Iterates over draws in order.
    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.draws.chunks_exact(self.dimension.max(1))
    }

    /// Trace of parameter `k` starting at draw `skip`.
    pub fn parameter(&self, k: usize, skip: usize) -> Vec<f64> {
        self.iter().skip(skip).map(|draw| draw[k]).collect()
    }

    /// Number of accepted proposals.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Number of proposals made.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Proposal standard deviations used.
    pub fn step_sizes(&self) -> &DVector<f64> {
        &self.step_sizes
    }

    /// `accepted / iterations`, zero for an empty chain.
    pub fn acceptance_rate(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.accepted as f64 / self.iterations as f64
        }
    }
}

/// Random-walk Metropolis-Hastings sampler over `likelihood × prior`.
#[derive(Debug)]
pub struct MetropolisSampler<'a> {
    dataset: &'a ChoiceDataset,
    prior: &'a PriorSpecification,
    step_sizes: DVector<f64>,
    total_draws: usize,
    current: DVector<f64>,
    current_log_posterior: f64,
    proposal: DVector<f64>,
    draws: Vec<f64>,
    accepted: usize,
    iterations: usize,
    state: SamplerState,
    progress: SamplerProgress,
}

impl<'a> MetropolisSampler<'a> {
    /// Validates the configuration and positions the sampler at its start.
    pub fn new(
        dataset: &'a ChoiceDataset,
        prior: &'a PriorSpecification,
        options: &SamplerOptions,
    ) -> Result<Self> {
        let k = dataset.dimension();
        if prior.dimension() != k {
            return Err(MnlError::dimension_mismatch("prior", k, prior.dimension()));
        }
        if options.step_sizes.len() != k {
            return Err(MnlError::dimension_mismatch(
                "step sizes",
                k,
                options.step_sizes.len(),
            ));
        }
        if let Some(index) = options
            .step_sizes
            .iter()
            .position(|s| !(s.is_finite() && *s > 0.0))
        {
            return Err(MnlError::invalid_configuration(
                "step sizes",
                format!("step {index} must be finite and positive"),
            ));
        }
        if options.draws == 0 {
            return Err(MnlError::invalid_configuration(
                "draws",
                "at least one draw is required",
            ));
        }

        let current = match &options.initial {
            Some(initial) if initial.len() != k => {
                return Err(MnlError::dimension_mismatch("initial beta", k, initial.len()))
            }
            Some(initial) => initial.clone(),
            None => DVector::zeros(k),
        };

        let mut sampler = Self {
            dataset,
            prior,
            step_sizes: options.step_sizes.clone(),
            total_draws: options.draws,
            proposal: current.clone(),
            current,
            current_log_posterior: f64::NEG_INFINITY,
            draws: Vec::with_capacity(options.draws * k),
            accepted: 0,
            iterations: 0,
            state: SamplerState::Initialized,
            progress: SamplerProgress::default(),
        };

        sampler.current_log_posterior = sampler.log_posterior(&sampler.current);
        if !sampler.current_log_posterior.is_finite() {
            return Err(MnlError::NumericalError {
                context: "log posterior at the starting point",
            });
        }
        Ok(sampler)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Current position of the chain.
    pub fn current(&self) -> &DVector<f64> {
        &self.current
    }

    /// Cached log posterior at [`current`](Self::current).
    pub fn current_log_posterior(&self) -> f64 {
        self.current_log_posterior
    }

    /// Handle for watching progress from another thread.
    pub fn progress(&self) -> SamplerProgress {
        self.progress.clone()
    }

    /// Unnormalized log posterior; `-inf` wherever the likelihood is undefined.
    pub fn log_posterior(&self, beta: &DVector<f64>) -> f64 {
        let likelihood = log_likelihood(beta, self.dataset);
        if !likelihood.is_finite() {
            return f64::NEG_INFINITY;
        }
        likelihood + self.prior.log_density(beta)
    }

    /// Performs one Metropolis iteration and returns whether the proposal was accepted.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<bool> {
        if self.state == SamplerState::Done {
            return Err(MnlError::invalid_configuration(
                "sampler",
                "the chain has already reached its configured length",
            ));
        }
        self.state = SamplerState::Sampling;

        for (k, slot) in self.proposal.iter_mut().enumerate() {
            let z: f64 = StandardNormal.sample(rng);
            *slot = self.current[k] + self.step_sizes[k] * z;
        }

        let proposed_log_posterior = self.log_posterior(&self.proposal);
        // 1 - U lies in (0, 1], so its logarithm is always defined.
        let log_u = (1.0 - rng.gen::<f64>()).ln();
        let accept = proposed_log_posterior.is_finite()
            && log_u < proposed_log_posterior - self.current_log_posterior;

        if accept {
            std::mem::swap(&mut self.current, &mut self.proposal);
            self.current_log_posterior = proposed_log_posterior;
            self.accepted += 1;
        }

        self.draws.extend(self.current.iter());
        self.iterations += 1;
        self.progress.advance();

        if self.iterations % (self.total_draws / 10).max(1) == 0 {
            debug!(
                "metropolis iteration {}/{}: acceptance {:.3}, log posterior {:.4}",
                self.iterations,
                self.total_draws,
                self.accepted as f64 / self.iterations as f64,
                self.current_log_posterior
            );
        }

        if self.iterations == self.total_draws {
            self.state = SamplerState::Done;
        }
        Ok(accept)
    }

    /// Runs the remaining iterations and returns the complete chain.
    pub fn run<R: Rng + ?Sized>(mut self, rng: &mut R) -> Result<Chain> {
        info!(
            "metropolis sampling: {} draws over {} parameters",
            self.total_draws,
            self.current.len()
        );
        while self.state != SamplerState::Done {
            self.step(rng)?;
        }

        let chain = Chain {
            dimension: self.current.len(),
            draws: self.draws,
            accepted: self.accepted,
            iterations: self.iterations,
            step_sizes: self.step_sizes,
        };

        let rate = chain.acceptance_rate();
        if !(0.15..=0.5).contains(&rate) {
            warn!("acceptance rate {rate:.3} is outside [0.15, 0.5]; consider retuning step sizes");
        } else {
            info!("metropolis sampling finished with acceptance rate {rate:.3}");
        }
        Ok(chain)
    }

    /// Runs the sampler with a fresh `SmallRng` seeded from `seed`.
    pub fn run_seeded(self, seed: u64) -> Result<Chain> {
        let mut rng = SmallRng::seed_from_u64(seed);
        self.run(&mut rng)
    }
}

/// Runs one independent chain per seed in parallel.
///
/// Chains share only the read-only dataset and prior; results come back in
/// seed order.
pub fn sample_chains(
    dataset: &ChoiceDataset,
    prior: &PriorSpecification,
    options: &SamplerOptions,
    seeds: &[u64],
) -> Vec<Result<Chain>> {
    seeds
        .par_iter()
        .map(|&seed| MetropolisSampler::new(dataset, prior, options)?.run_seeded(seed))
        .collect()
}
