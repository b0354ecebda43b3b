//! Keeps the external variables consistent with the inputs.

use std::ops::{Deref, DerefMut};

use flowtape::{Block, ConId, Expr, Model, Nlp, VarId};
use tracing::{debug, warn};

use crate::error::GreyBoxError;
use crate::solver::{EquationSolver, NewtonSolver, SolveReport};

/// The four index sets of a grey-box model: inputs `x`, externals `y`,
/// residual equations `f` and external equations `g`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Partition {
    pub inputs: Vec<VarId>,
    pub externals: Vec<VarId>,
    pub residual_eqs: Vec<ConId>,
    pub external_eqs: Vec<ConId>,
}

impl Partition {
    /// Check the partition against `model`.
    ///
    /// Requires `|g| == |y|`, ids that exist in the model, no repeated or
    /// shared variables, no repeated or shared equations, and inputs and
    /// externals that are not fixed. Every variable an equation references
    /// must be an input, an external, or fixed in the model.
    pub fn validate(&self, model: &Model) -> Result<(), GreyBoxError> {
        let invalid = |msg: String| Err(GreyBoxError::InvalidPartition(msg));

        if self.externals.len() != self.external_eqs.len() {
            return invalid(format!(
                "{} external variables but {} external equations",
                self.externals.len(),
                self.external_eqs.len()
            ));
        }

        let vars: Vec<VarId> = self.inputs.iter().chain(&self.externals).copied().collect();
        for (i, &v) in vars.iter().enumerate() {
            if !model.contains_var(v) {
                return invalid(format!("variable {v} does not belong to the model"));
            }
            if vars[..i].contains(&v) {
                return invalid(format!(
                    "variable '{}' is listed more than once",
                    model.var_name(v)
                ));
            }
            if model.is_fixed(v) {
                return invalid(format!("variable '{}' is fixed", model.var_name(v)));
            }
        }

        let cons: Vec<ConId> = self
            .residual_eqs
            .iter()
            .chain(&self.external_eqs)
            .copied()
            .collect();
        for (i, &c) in cons.iter().enumerate() {
            if !model.contains_constraint(c) {
                return invalid(format!("constraint {c} does not belong to the model"));
            }
            if cons[..i].contains(&c) {
                return invalid(format!(
                    "constraint '{}' is listed more than once",
                    model.constraint_name(c)
                ));
            }
            if let Some(v) = model
                .constraint_variables(c)
                .into_iter()
                .find(|v| !vars.contains(v) && !model.is_fixed(*v))
            {
                return invalid(format!(
                    "constraint '{}' references '{}', which is neither an input nor an external variable",
                    model.constraint_name(c),
                    model.var_name(v)
                ));
            }
        }
        Ok(())
    }

    /// `f` followed by `g`.
    pub fn all_equations(&self) -> Vec<ConId> {
        self.residual_eqs
            .iter()
            .chain(&self.external_eqs)
            .copied()
            .collect()
    }
}

/// Fixes a set of variables for as long as it lives and restores their
/// previous fixed flags when dropped, on every exit path.
pub(crate) struct FixGuard<'a> {
    model: &'a mut Model,
    saved: Vec<(VarId, bool)>,
}

impl<'a> FixGuard<'a> {
    pub(crate) fn new(model: &'a mut Model, vars: &[VarId]) -> Self {
        let saved = vars.iter().map(|&v| (v, model.is_fixed(v))).collect();
        for &v in vars {
            model.fix(v);
        }
        FixGuard { model, saved }
    }
}

impl Deref for FixGuard<'_> {
    type Target = Model;
    fn deref(&self) -> &Model {
        self.model
    }
}

impl DerefMut for FixGuard<'_> {
    fn deref_mut(&mut self) -> &mut Model {
        self.model
    }
}

impl Drop for FixGuard<'_> {
    fn drop(&mut self) {
        for &(v, was_fixed) in self.saved.iter().rev() {
            if was_fixed {
                self.model.fix(v);
            } else {
                self.model.unfix(v);
            }
        }
    }
}

/// Result of a successful resolve: the full-block evaluator at the new state.
#[derive(Debug)]
pub struct Resolved {
    /// Evaluator over `f ∪ g` and `x ∪ y` at the resolved point.
    pub nlp: Nlp,
    pub report: SolveReport,
}

/// Re-solves `g(x, y) = 0` for `y` whenever the inputs move.
pub struct StateResolver {
    solver: Box<dyn EquationSolver>,
}

impl Default for StateResolver {
    fn default() -> Self {
        StateResolver::new(Box::new(NewtonSolver::default()))
    }
}

impl std::fmt::Debug for StateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateResolver").finish_non_exhaustive()
    }
}

impl StateResolver {
    pub fn new(solver: Box<dyn EquationSolver>) -> Self {
        StateResolver { solver }
    }

    /// Assign `x_values` to the inputs, solve the external equations for the
    /// externals with the inputs held fixed, and compile the full block.
    ///
    /// On failure the externals keep their pre-solve values and no evaluator
    /// is returned. The inputs keep the new values.
    ///
    /// # Panics
    ///
    /// Panics if `x_values.len()` differs from the number of inputs.
    pub fn resolve(
        &self,
        model: &mut Model,
        partition: &Partition,
        x_values: &[f64],
    ) -> Result<Resolved, GreyBoxError> {
        model.set_values(&partition.inputs, x_values);
        let y_before = model.values(&partition.externals);

        let outcome = {
            let mut guard = FixGuard::new(model, &partition.inputs);
            self.solver
                .solve(&mut guard, &partition.external_eqs, &partition.externals)
        };

        let report = match outcome {
            Ok(report) => report,
            Err(err) => {
                model.set_values(&partition.externals, &y_before);
                warn!(error = %err, "external equations not solved; state left unresolved");
                return Err(err.into());
            }
        };
        debug!(
            iterations = report.iterations,
            residual_norm = report.residual_norm,
            "external state resolved"
        );

        let mut block = Block::new(model, &partition.all_equations())?;
        // Inputs no equation references still need a primal slot, so that
        // their Jacobian columns come out as zeros.
        let present = block.variables();
        let unused: Vec<VarId> = partition
            .inputs
            .iter()
            .copied()
            .filter(|v| !present.contains(v))
            .collect();
        if !unused.is_empty() {
            let d = block.add_aux_var("_unused_inputs", 0.0);
            block.add_aux_equation("_unused_inputs_con", Expr::from(d) - Expr::sum(unused))?;
        }

        Ok(Resolved {
            nlp: Nlp::new(&block),
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolveError;
    use approx::assert_relative_eq;

    fn scenario() -> (Model, Partition) {
        // f: x·y - 1 = 0, g: y - x = 0
        let mut m = Model::new();
        let x = m.add_var("x", 1.0);
        let y = m.add_var("y", 1.0);
        let f = m.add_equality("f", x * y, 1.0);
        let g = m.add_equality("g", y, x);
        let p = Partition {
            inputs: vec![x],
            externals: vec![y],
            residual_eqs: vec![f],
            external_eqs: vec![g],
        };
        (m, p)
    }

    #[test]
    fn resolve_tracks_inputs_and_unfixes() {
        let (mut m, p) = scenario();
        let resolved = StateResolver::default().resolve(&mut m, &p, &[2.0]).unwrap();
        assert_relative_eq!(m.value(p.externals[0]), 2.0, epsilon = 1e-12);
        assert!(!m.is_fixed(p.inputs[0]));
        assert_eq!(resolved.nlp.n_constraints(), 2);
        assert_eq!(resolved.nlp.n_primals(), 2);
    }

    #[test]
    fn unused_input_gets_a_primal_slot() {
        let (mut m, mut p) = scenario();
        let z = m.add_var("z", 5.0);
        p.inputs.push(z);
        let resolved = StateResolver::default()
            .resolve(&mut m, &p, &[2.0, 5.0])
            .unwrap();
        assert!(resolved.nlp.primal_index(z).is_some());
        let jac = resolved
            .nlp
            .extract_submatrix_jacobian(&p.inputs, &p.all_equations())
            .unwrap()
            .to_dense();
        assert_eq!(jac[0][1], 0.0);
        assert_eq!(jac[1][1], 0.0);
        assert_eq!(m.num_vars(), 3);
    }

    struct AlwaysFails;

    impl EquationSolver for AlwaysFails {
        fn solve(
            &self,
            model: &mut Model,
            _constraints: &[ConId],
            variables: &[VarId],
        ) -> Result<SolveReport, SolveError> {
            // Misbehave: scribble on the unknowns before failing.
            for &v in variables {
                model.set_value(v, f64::NAN);
            }
            Err(SolveError::Diverged {
                iterations: 3,
                residual_norm: 1.0,
            })
        }
    }

    #[test]
    fn failure_restores_externals_and_flags() {
        let (mut m, p) = scenario();
        let err = StateResolver::new(Box::new(AlwaysFails))
            .resolve(&mut m, &p, &[5.0])
            .unwrap_err();
        assert!(matches!(err, GreyBoxError::InnerSolve(SolveError::Diverged { .. })));
        assert_eq!(m.value(p.externals[0]), 1.0);
        assert_eq!(m.value(p.inputs[0]), 5.0);
        assert!(!m.is_fixed(p.inputs[0]));
    }

    #[test]
    fn guard_restores_prior_fixed_flags() {
        let mut m = Model::new();
        let a = m.add_var("a", 0.0);
        let b = m.add_var("b", 0.0);
        m.fix(b);
        {
            let guard = FixGuard::new(&mut m, &[a, b]);
            assert!(guard.is_fixed(a) && guard.is_fixed(b));
        }
        assert!(!m.is_fixed(a));
        assert!(m.is_fixed(b));
    }

    #[test]
    fn partition_rejects_foreign_variable_in_equations() {
        let (mut m, mut p) = scenario();
        let z = m.add_var("z", 0.0);
        let h = m.add_equality("h", z, p.externals[0]);
        p.external_eqs = vec![h];
        assert!(matches!(
            p.validate(&m),
            Err(GreyBoxError::InvalidPartition(_))
        ));
        m.fix(z);
        assert_eq!(p.validate(&m), Ok(()));
    }

    #[test]
    fn partition_rejects_shared_variable() {
        let (m, mut p) = scenario();
        p.externals = p.inputs.clone();
        assert!(matches!(
            p.validate(&m),
            Err(GreyBoxError::InvalidPartition(_))
        ));
    }
}
