use flowtape::NlpError;
use thiserror::Error;

/// Errors from validating a solver configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_iter must be at least 1")]
    MaxIter,

    #[error("residual_tol must be finite and positive")]
    ResidualTol,

    #[error("step_tol must be finite and non-negative")]
    StepTol,

    #[error("min_step must lie in (0, 1]")]
    MinStep,

    #[error("backtrack must lie in (0, 1)")]
    Backtrack,
}

/// Failure of the inner equation solve.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("no convergence after {iterations} iterations (residual norm {residual_norm:.3e})")]
    Diverged {
        iterations: usize,
        residual_norm: f64,
    },

    #[error("singular Jacobian at iteration {iteration}")]
    SingularJacobian { iteration: usize },

    #[error("line search failed at iteration {iteration}")]
    LineSearchFailed { iteration: usize },

    #[error("non-finite residual")]
    NonFinite,

    /// The system is not square (`constraints.len() != variables.len()`).
    #[error("{constraints} equations in {variables} unknowns")]
    NotSquare { constraints: usize, variables: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Nlp(#[from] NlpError),
}

/// Errors surfaced by a grey-box model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GreyBoxError {
    /// The external-equation Jacobian with respect to the external variables
    /// could not be factorized.
    #[error("external-equation Jacobian is singular")]
    Singular,

    #[error("inner solve failed: {0}")]
    InnerSolve(#[from] SolveError),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// A value or derivative was requested before a successful
    /// `set_input_values`, or after a failed one.
    #[error("state not resolved; call set_input_values first")]
    StateNotResolved,

    #[error("expected {expected} values, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid variable partition: {0}")]
    InvalidPartition(String),

    #[error(transparent)]
    Nlp(#[from] NlpError),
}
