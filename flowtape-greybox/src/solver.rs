//! Inner equation solvers.
//!
//! The state resolver does not care how a square system is solved, only that
//! on success the unknowns hold a root and on failure the model is left as it
//! was. [`EquationSolver`] is that contract; [`NewtonSolver`] is the default
//! implementation.

use flowtape::{Block, ConId, Model, Nlp, VarId};
use tracing::debug;

use crate::error::{ConfigError, SolveError};
use crate::linalg::SparseLu;

/// Sufficient-decrease constant of the backtracking line search.
const ARMIJO_C: f64 = 1e-4;

/// Outcome of a successful inner solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    /// Newton iterations taken.
    pub iterations: usize,
    /// Euclidean norm of the residual at the returned point.
    pub residual_norm: f64,
}

/// Solves a square system of model equations for a set of unknowns.
///
/// Implementations must leave `model` untouched when they return an error
/// and must only write the values of `variables` when they succeed. Every
/// variable that is neither fixed nor in `variables` is held at its current
/// value.
pub trait EquationSolver: Send {
    fn solve(
        &self,
        model: &mut Model,
        constraints: &[ConId],
        variables: &[VarId],
    ) -> Result<SolveReport, SolveError>;
}

/// Configuration for [`NewtonSolver`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NewtonConfig {
    /// Maximum number of Newton iterations (default: 100).
    pub max_iter: usize,
    /// Converged when `||g|| <= residual_tol` (default: 1e-10).
    pub residual_tol: f64,
    /// Give up when an accepted step is shorter than this while the residual
    /// is still above tolerance (default: 1e-14).
    pub step_tol: f64,
    /// Smallest line-search step fraction before declaring failure
    /// (default: 1e-8).
    pub min_step: f64,
    /// Step fraction shrink factor of the line search (default: 0.5).
    pub backtrack: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        NewtonConfig {
            max_iter: 100,
            residual_tol: 1e-10,
            step_tol: 1e-14,
            min_step: 1e-8,
            backtrack: 0.5,
        }
    }
}

impl NewtonConfig {
    /// Check that every parameter is in range.
    ///
    /// # Errors
    ///
    /// Returns the first offending parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iter == 0 {
            return Err(ConfigError::MaxIter);
        }
        if !self.residual_tol.is_finite() || self.residual_tol <= 0.0 {
            return Err(ConfigError::ResidualTol);
        }
        if !self.step_tol.is_finite() || self.step_tol < 0.0 {
            return Err(ConfigError::StepTol);
        }
        if !(self.min_step > 0.0 && self.min_step <= 1.0) {
            return Err(ConfigError::MinStep);
        }
        if !(self.backtrack > 0.0 && self.backtrack < 1.0) {
            return Err(ConfigError::Backtrack);
        }
        Ok(())
    }
}

/// Damped Newton's method with a sparse LU of the Jacobian and a
/// backtracking line search on `½||g||²`.
#[derive(Debug, Clone, Default)]
pub struct NewtonSolver {
    config: NewtonConfig,
}

impl NewtonSolver {
    pub fn new(config: NewtonConfig) -> Self {
        NewtonSolver { config }
    }

    pub fn config(&self) -> &NewtonConfig {
        &self.config
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

impl EquationSolver for NewtonSolver {
    fn solve(
        &self,
        model: &mut Model,
        constraints: &[ConId],
        variables: &[VarId],
    ) -> Result<SolveReport, SolveError> {
        let cfg = &self.config;
        cfg.validate()?;
        if constraints.len() != variables.len() {
            return Err(SolveError::NotSquare {
                constraints: constraints.len(),
                variables: variables.len(),
            });
        }

        let mut nlp = Nlp::new(&Block::new(model, constraints)?);
        // An unknown that appears in no equation makes the Jacobian
        // structurally singular.
        let idx: Vec<usize> = match variables
            .iter()
            .map(|&v| nlp.primal_index(v))
            .collect::<Option<Vec<_>>>()
        {
            Some(idx) => idx,
            None => return Err(SolveError::SingularJacobian { iteration: 0 }),
        };

        let mut p = nlp.primals().to_vec();
        let mut r = nlp.evaluate_constraints();
        let mut r_norm = norm(&r);
        debug!(
            equations = constraints.len(),
            residual_norm = r_norm,
            "newton solve start"
        );

        let mut iterations = 0;
        for iter in 0..=cfg.max_iter {
            if !r_norm.is_finite() {
                return Err(SolveError::NonFinite);
            }
            if r_norm <= cfg.residual_tol {
                let values: Vec<f64> = idx.iter().map(|&i| p[i]).collect();
                model.set_values(variables, &values);
                debug!(iterations = iter, residual_norm = r_norm, "newton converged");
                return Ok(SolveReport {
                    iterations: iter,
                    residual_norm: r_norm,
                });
            }
            if iter == cfg.max_iter {
                break;
            }

            let jac = nlp.extract_submatrix_jacobian(variables, constraints)?;
            let lu = SparseLu::factor(&jac).ok_or(SolveError::SingularJacobian { iteration: iter })?;
            let neg_r: Vec<f64> = r.iter().map(|v| -v).collect();
            let delta = lu.solve(&neg_r);

            // Backtrack until ½||g||² decreases sufficiently.
            let mut alpha = 1.0;
            let mut trial = p.clone();
            loop {
                if alpha < cfg.min_step {
                    return Err(SolveError::LineSearchFailed { iteration: iter });
                }
                for (k, &i) in idx.iter().enumerate() {
                    trial[i] = p[i] + alpha * delta[k];
                }
                nlp.set_primals(&trial)?;
                let r_trial = nlp.evaluate_constraints();
                let n_trial = norm(&r_trial);
                if n_trial.is_finite()
                    && n_trial * n_trial <= (1.0 - 2.0 * ARMIJO_C * alpha) * r_norm * r_norm
                {
                    r = r_trial;
                    r_norm = n_trial;
                    break;
                }
                alpha *= cfg.backtrack;
            }

            let step_norm = alpha * norm(&delta);
            std::mem::swap(&mut p, &mut trial);
            iterations = iter + 1;
            if step_norm < cfg.step_tol && r_norm > cfg.residual_tol {
                break;
            }
        }

        debug!(iterations, residual_norm = r_norm, "newton did not converge");
        Err(SolveError::Diverged {
            iterations,
            residual_norm: r_norm,
        })
    }
}
