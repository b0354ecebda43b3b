use thiserror::Error;

use crate::model::{ConId, VarId};

/// Errors raised while building a block or extracting derivative blocks.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NlpError {
    #[error("variable {0} does not belong to the model")]
    UnknownVariable(VarId),

    #[error("constraint {0} does not belong to the model")]
    UnknownConstraint(ConId),

    /// The variable exists but is not a primal variable of this NLP: it is
    /// fixed, or it appears in none of the block's equations.
    #[error("variable {0} is not a primal variable of this NLP")]
    NotAPrimal(VarId),

    #[error("constraint {0} is not part of this NLP")]
    NotAConstraint(ConId),

    #[error("expected a vector of length {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
}
