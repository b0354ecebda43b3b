//! Submatrix extraction over a compiled equation block.
//!
//! An [`Nlp`] is the derivative evaluator of a [`Block`]. Its primal
//! variables are the block's structural primals, its constraints are the
//! block's equations, and it carries one dual (multiplier) per constraint.
//! The objective is the constant zero, so the Hessian of the Lagrangian is
//!
//! ```text
//! ∇²L(v) = Σ_i duals[i] · ∇²c_i(v)
//! ```
//!
//! Only primal variables may be named in an extraction request. Asking for a
//! variable that is fixed, or that does not appear in any equation of the
//! block, is an error rather than a zero row.

use std::collections::HashMap;

use crate::block::Block;
use crate::error::NlpError;
use crate::model::{ConId, VarId};
use crate::sparse::CooMatrix;
use crate::tape::Tape;

/// A compiled block with settable primal values and duals.
#[derive(Clone, Debug)]
pub struct Nlp {
    primals: Vec<VarId>,
    constraints: Vec<ConId>,
    primal_index: HashMap<VarId, usize>,
    constraint_index: HashMap<ConId, usize>,
    /// For each constraint, the primal indices it structurally depends on.
    structure: Vec<Vec<usize>>,
    tape: Tape,
    duals: Vec<f64>,
}

impl Nlp {
    /// Compile `block` at the current values of its variables.
    ///
    /// Duals start at zero.
    pub fn new(block: &Block<'_>) -> Self {
        let primals = block.primal_variables();
        let constraints = block.constraints();
        let primal_index: HashMap<VarId, usize> =
            primals.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let constraint_index: HashMap<ConId, usize> =
            constraints.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        let structure = block
            .bodies()
            .map(|body| {
                body.variables()
                    .iter()
                    .filter_map(|v| primal_index.get(v).copied())
                    .collect()
            })
            .collect();

        let tape = Tape::compile(block.bodies(), &primals, |v| block.value(v));
        let duals = vec![0.0; constraints.len()];

        Nlp {
            primals,
            constraints,
            primal_index,
            constraint_index,
            structure,
            tape,
            duals,
        }
    }

    pub fn n_primals(&self) -> usize {
        self.primals.len()
    }

    pub fn n_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn primal_variables(&self) -> &[VarId] {
        &self.primals
    }

    pub fn constraints(&self) -> &[ConId] {
        &self.constraints
    }

    /// Position of `v` in the primal vector, if it is a primal.
    pub fn primal_index(&self, v: VarId) -> Option<usize> {
        self.primal_index.get(&v).copied()
    }

    pub fn constraint_index(&self, c: ConId) -> Option<usize> {
        self.constraint_index.get(&c).copied()
    }

    fn primal_indices(&self, vars: &[VarId]) -> Result<Vec<usize>, NlpError> {
        vars.iter()
            .map(|&v| self.primal_index(v).ok_or(NlpError::NotAPrimal(v)))
            .collect()
    }

    fn constraint_indices(&self, cons: &[ConId]) -> Result<Vec<usize>, NlpError> {
        cons.iter()
            .map(|&c| self.constraint_index(c).ok_or(NlpError::NotAConstraint(c)))
            .collect()
    }

    pub fn primals(&self) -> &[f64] {
        self.tape.inputs()
    }

    /// Move the evaluation point. `values` is index-aligned with
    /// [`primal_variables`](Self::primal_variables).
    pub fn set_primals(&mut self, values: &[f64]) -> Result<(), NlpError> {
        if values.len() != self.n_primals() {
            return Err(NlpError::DimensionMismatch {
                expected: self.n_primals(),
                found: values.len(),
            });
        }
        self.tape.forward(values);
        Ok(())
    }

    pub fn duals(&self) -> &[f64] {
        &self.duals
    }

    /// Set the multipliers, index-aligned with [`constraints`](Self::constraints).
    pub fn set_duals(&mut self, values: &[f64]) -> Result<(), NlpError> {
        if values.len() != self.n_constraints() {
            return Err(NlpError::DimensionMismatch {
                expected: self.n_constraints(),
                found: values.len(),
            });
        }
        self.duals.copy_from_slice(values);
        Ok(())
    }

    /// Set the multiplier of a single constraint.
    pub fn set_dual(&mut self, c: ConId, value: f64) -> Result<(), NlpError> {
        let i = self.constraint_index(c).ok_or(NlpError::NotAConstraint(c))?;
        self.duals[i] = value;
        Ok(())
    }

    /// Residuals of every constraint at the current primals.
    pub fn evaluate_constraints(&self) -> Vec<f64> {
        self.tape.outputs()
    }

    /// Residuals of the requested constraints, in request order.
    pub fn extract_subvector_constraints(&self, cons: &[ConId]) -> Result<Vec<f64>, NlpError> {
        let rows = self.constraint_indices(cons)?;
        let all = self.tape.outputs();
        Ok(rows.into_iter().map(|r| all[r]).collect())
    }

    /// Jacobian block `∂cons/∂primals`, rows in `cons` order and columns in
    /// `primals` order.
    ///
    /// Every structural entry is stored, including ones whose current value
    /// is zero.
    pub fn extract_submatrix_jacobian(
        &self,
        primals: &[VarId],
        cons: &[ConId],
    ) -> Result<CooMatrix, NlpError> {
        let cols = self.primal_indices(primals)?;
        let rows = self.constraint_indices(cons)?;

        let mut out = CooMatrix::new(rows.len(), cols.len());
        let mut seeds = vec![0.0; self.n_constraints()];
        for (r_out, &r) in rows.iter().enumerate() {
            seeds[r] = 1.0;
            let grad = self.tape.reverse_seeded(&seeds);
            seeds[r] = 0.0;
            for (c_out, &c) in cols.iter().enumerate() {
                if self.structure[r].contains(&c) {
                    out.push(r_out, c_out, grad[c]);
                }
            }
        }
        Ok(out)
    }

    /// Full Jacobian of every constraint with respect to every primal.
    pub fn evaluate_jacobian(&self) -> CooMatrix {
        let mut out = CooMatrix::new(self.n_constraints(), self.n_primals());
        let jac = self.tape.jacobian_at_current();
        for (r, row) in jac.iter().enumerate() {
            for &c in &self.structure[r] {
                out.push(r, c, row[c]);
            }
        }
        out
    }

    /// Block of the Lagrangian Hessian with rows `rows` and columns `cols`.
    ///
    /// Uses the current duals. The block may be rectangular. Exact zeros are
    /// not stored.
    pub fn extract_submatrix_hessian_lag(
        &self,
        rows: &[VarId],
        cols: &[VarId],
    ) -> Result<CooMatrix, NlpError> {
        let row_idx = self.primal_indices(rows)?;
        let col_idx = self.primal_indices(cols)?;

        let columns = self
            .tape
            .hessian_columns(self.primals(), &self.duals, &col_idx);

        let mut out = CooMatrix::new(row_idx.len(), col_idx.len());
        for (c_out, column) in columns.iter().enumerate() {
            for (r_out, &r) in row_idx.iter().enumerate() {
                let v = column[r];
                if v != 0.0 {
                    out.push(r_out, c_out, v);
                }
            }
        }
        Ok(out)
    }

    /// Full Lagrangian Hessian over all primals.
    pub fn evaluate_hessian_lag(&self) -> CooMatrix {
        let all: Vec<usize> = (0..self.n_primals()).collect();
        let columns = self.tape.hessian_columns(self.primals(), &self.duals, &all);
        let mut out = CooMatrix::new(self.n_primals(), self.n_primals());
        for (c, column) in columns.iter().enumerate() {
            for (r, &v) in column.iter().enumerate() {
                if v != 0.0 {
                    out.push(r, c, v);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn submatrix_order_follows_the_request() {
        let mut m = Model::new();
        let x = m.add_var("x", 2.0);
        let y = m.add_var("y", 3.0);
        let c0 = m.add_equality("c0", x * y, 1.0);
        let c1 = m.add_equality("c1", y, x);
        let nlp = Nlp::new(&Block::new(&m, &[c0, c1]).unwrap());

        let jac = nlp.extract_submatrix_jacobian(&[y, x], &[c1, c0]).unwrap();
        assert_eq!(jac.to_dense(), vec![vec![1.0, -1.0], vec![2.0, 3.0]]);
    }

    #[test]
    fn zero_duals_give_zero_hessian() {
        let mut m = Model::new();
        let x = m.add_var("x", 2.0);
        let c = m.add_equality("c", x * x, 1.0);
        let nlp = Nlp::new(&Block::new(&m, &[c]).unwrap());
        let h = nlp.extract_submatrix_hessian_lag(&[x], &[x]).unwrap();
        assert_eq!(h.nnz(), 0);
        assert_eq!(h.to_dense(), vec![vec![0.0]]);
    }
}
