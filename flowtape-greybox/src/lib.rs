//! Reduced-space grey-box models.
//!
//! An [`ExternalModel`] takes a square subsystem `g(x, y) = 0` of a
//! [`flowtape::Model`], keeps `y` consistent with the inputs `x` by solving it,
//! and exposes the remaining equations `F(x) = f(x, y(x))` together with their
//! exact first and second derivatives in `x`.

pub mod error;
pub mod greybox;
pub mod hessian;
pub mod implicit;
pub mod linalg;
pub mod resolver;
pub mod solver;

pub use error::{ConfigError, GreyBoxError, SolveError};
pub use greybox::{ExternalModel, GreyBoxModel};
pub use hessian::{constraint_hessian, CurvatureBlocks};
pub use implicit::ImplicitSensitivity;
pub use linalg::SparseLu;
pub use resolver::{Partition, Resolved, StateResolver};
pub use solver::{EquationSolver, NewtonConfig, NewtonSolver, SolveReport};
