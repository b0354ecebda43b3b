//! Symbolic equation models with exact first and second derivatives.
//!
//! Equations are built as [`Expr`] trees over the variables of a [`Model`],
//! grouped into a [`Block`], and compiled into an [`Nlp`] whose bytecode
//! [`Tape`] evaluates residuals, Jacobian blocks and Lagrangian Hessian
//! blocks (forward-over-reverse with [`Dual`] numbers).

pub mod block;
pub mod dual;
pub mod error;
pub mod expr;
pub mod float;
pub mod model;
pub mod nlp;
pub mod opcode;
pub mod scalar;
pub mod sparse;
pub mod tape;

pub use block::Block;
pub use dual::Dual;
pub use error::NlpError;
pub use expr::Expr;
pub use float::Float;
pub use model::{ConId, Model, VarId};
pub use nlp::Nlp;
pub use scalar::Scalar;
pub use sparse::CooMatrix;
pub use tape::Tape;
