use serde::Serialize;
use thiserror::Error;

/// Unified error type for `mnlrs` operations.
#[derive(Clone, Debug, Error, PartialEq, Serialize)]
pub enum MnlError {
    /// Raised when no records are supplied to the dataset builder.
    #[error("choice data must contain at least one record")]
    EmptyDataset,

    /// Raised when a choice task offers fewer than two alternatives.
    #[error("task {task} of respondent {respondent} has {count} alternative(s); at least 2 are required")]
    TooFewAlternatives {
        respondent: u64,
        task: u64,
        count: usize,
    },

    /// Raised when no alternative in a task is marked as chosen.
    #[error("task {task} of respondent {respondent} has no chosen alternative")]
    NoChosenAlternative { respondent: u64, task: u64 },

    /// Raised when more than one alternative in a task is marked as chosen.
    #[error("task {task} of respondent {respondent} has {count} chosen alternatives")]
    MultipleChosenAlternatives {
        respondent: u64,
        task: u64,
        count: usize,
    },

    /// Raised when an alternative's attribute vector disagrees with the dataset dimension.
    #[error(
        "task {task} of respondent {respondent}: expected {expected} attributes but found {found}"
    )]
    InconsistentDimension {
        respondent: u64,
        task: u64,
        expected: usize,
        found: usize,
    },

    /// Raised when an attribute value is NaN or infinite.
    #[error("task {task} of respondent {respondent}: attribute {index} is not finite")]
    NonFiniteAttribute {
        respondent: u64,
        task: u64,
        index: usize,
    },

    /// Raised when provided vectors or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, usually the number of attributes.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a prior variance is not a finite positive number.
    #[error("prior for parameter {index} must have a finite positive variance, found {variance}")]
    InvalidPrior { index: usize, variance: f64 },

    /// Raised when an options struct holds a value the algorithms cannot use.
    #[error("invalid configuration for {context}: {message}")]
    InvalidConfiguration {
        context: &'static str,
        message: String,
    },

    /// Raised when the optimizer stops without meeting its tolerance.
    #[error(
        "optimizer did not converge after {evaluations} evaluations; gradient norm {gradient_norm}"
    )]
    OptimizationDiverged {
        /// Objective evaluations performed before the solver gave up.
        evaluations: usize,
        /// Euclidean norm of the objective gradient at `last_iterate`.
        gradient_norm: f64,
        /// The lowest-objective parameter vector visited, kept for diagnostics.
        last_iterate: Vec<f64>,
    },

    /// Raised when the observed information is not positive definite.
    #[error("covariance in {context} is degenerate; the information matrix is not positive definite")]
    CovarianceDegenerate { context: &'static str },

    /// Raised when a burn-in leaves no draws to summarize.
    #[error("burn-in of {burn_in} leaves no draws in a chain of length {chain_length}")]
    InsufficientSamples { burn_in: usize, chain_length: usize },

    /// Raised when numerical routines produce a non-finite value where one is required.
    #[error("encountered a non-finite value during {context}")]
    NumericalError { context: &'static str },
}

impl MnlError {
    /// Helper to format a [`DimensionMismatch`](MnlError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper for rejecting unusable option values.
    pub fn invalid_configuration(context: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            context,
            message: message.into(),
        }
    }

    /// Helper to flag a covariance matrix that cannot be formed.
    pub fn degenerate(context: &'static str) -> Self {
        Self::CovarianceDegenerate { context }
    }

    /// Whether the error belongs to the input validation family.
    ///
    /// Validation errors are fatal and mean no dataset, prior or sampler was
    /// constructed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyDataset
                | Self::TooFewAlternatives { .. }
                | Self::NoChosenAlternative { .. }
                | Self::MultipleChosenAlternatives { .. }
                | Self::InconsistentDimension { .. }
                | Self::NonFiniteAttribute { .. }
                | Self::DimensionMismatch { .. }
                | Self::InvalidPrior { .. }
                | Self::InvalidConfiguration { .. }
        )
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, MnlError>;
