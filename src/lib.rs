//! Multinomial logit estimation for repeated-choice (conjoint) survey data.
//!
//! Given respondents who each face several choice tasks and pick one
//! alternative per task, this crate estimates the linear utility weights
//! ("part-worths") that best explain the observed choices. It offers tools to
//!
//! - group and validate flat survey records into choice sets (`data` module),
//! - evaluate the logit log-likelihood and its derivatives (`likelihood` module),
//! - compute maximum likelihood estimates with standard errors (`estimation` module),
//! - sample the posterior with random-walk Metropolis-Hastings (`prior`,
//!   `sampler` and `posterior` modules), and
//! - simulate conjoint surveys with known part-worths (`simulation` module).
//!
//! Every stochastic routine takes an explicit random number generator or
//! seed, so estimates and chains are reproducible and independent chains can
//! run on separate threads without sharing state.
//!
//! # Quick start
//!
//! ```no_run
//! use mnlrs::data::ChoiceDatasetBuilder;
//! use mnlrs::estimation::MleEstimator;
//! use mnlrs::posterior::summarize;
//! use mnlrs::prior::{ParameterPrior, PriorSpecification};
//! use mnlrs::sampler::{MetropolisSampler, SamplerOptions};
//! use mnlrs::simulation::{simulate_seeded, SimulationDesign, STREAMING_ATTRIBUTES};
//! use nalgebra::DVector;
//!
//! let records = simulate_seeded(&SimulationDesign::streaming_conjoint(), 42)
//!     .expect("valid design");
//! let data = ChoiceDatasetBuilder::new(records)
//!     .attribute_names(STREAMING_ATTRIBUTES)
//!     .build()
//!     .expect("validated choice data");
//!
//! let mle = MleEstimator::default().fit(&data).expect("converged");
//! println!("MLE part-worths: {}", mle.beta);
//!
//! let prior = PriorSpecification::normal(4, 5.0)
//!     .and_then(|prior| prior.with_prior(3, ParameterPrior::normal(1.0)))
//!     .expect("valid prior");
//! let options = SamplerOptions::new(DVector::from_vec(vec![0.05, 0.05, 0.05, 0.005]));
//! let chain = MetropolisSampler::new(&data, &prior, &options)
//!     .expect("well-formed sampler")
//!     .run_seeded(7)
//!     .expect("chain");
//! let posterior = summarize(&chain, 1_000).expect("enough draws");
//! println!("posterior means: {}", posterior.means);
//! ```

pub mod data;
pub mod error;
pub mod estimation;
pub mod likelihood;
pub mod optimize;
pub mod posterior;
pub mod prior;
pub mod sampler;
pub mod simulation;

pub use data::{ChoiceDataset, ChoiceDatasetBuilder, ChoiceRecord, ChoiceSet};
pub use error::{MnlError, Result};
pub use estimation::{EstimationResult, MleEstimator, MleOptions};
pub use optimize::{OptimizationSummary, OptimizerOptions};
pub use posterior::{summarize, PosteriorResult};
pub use prior::{ParameterPrior, PriorSpecification};
pub use sampler::{sample_chains, Chain, MetropolisSampler, SamplerOptions};
