//! Hessian blocks of a single equation.
//!
//! The extractor only differentiates with respect to variables that appear
//! in its block, and its Hessian is always the Hessian of the whole
//! Lagrangian. To get `∇²c` of one equation `c` with respect to arbitrary
//! variables, the equation is placed in a private block together with an
//! auxiliary variable `d` and the auxiliary equation
//!
//! ```text
//! d - Σ wrt == 0
//! ```
//!
//! which makes every requested variable a primal of the block without adding
//! curvature (the padding equation is linear). The multiplier of `c` is set
//! to 1 and that of the padding equation to 0, so with the extractor's
//! convention `L = 0·objective + Σ λ_i c_i` the Lagrangian Hessian is exactly
//! `∇²c`. A requested variable that `c` does not contain gets zero rows and
//! columns instead of an error.

use flowtape::{Block, ConId, CooMatrix, Expr, Model, Nlp, NlpError, VarId};

use crate::linalg::dense;

/// `|wrt1| × |wrt2|` block of `∇²c`, where `c` is the equation `con`.
///
/// - neither list given: both default to the non-fixed variables of `con`;
/// - only one given: the other mirrors it.
///
/// The block is rectangular when the two lists differ. Requested variables
/// must not be fixed in `model`.
pub fn constraint_hessian(
    model: &Model,
    con: ConId,
    wrt1: Option<&[VarId]>,
    wrt2: Option<&[VarId]>,
) -> Result<CooMatrix, NlpError> {
    let (rows, cols) = resolve_wrt(model, con, wrt1, wrt2)?;
    let nlp = isolate(model, con, &union(&rows, &cols))?;
    nlp.extract_submatrix_hessian_lag(&rows, &cols)
}

/// The three curvature blocks of one equation with respect to a split of
/// its variables into inputs `x` and externals `y`.
#[derive(Clone, Debug, PartialEq)]
pub struct CurvatureBlocks {
    /// `∂²c/∂x∂x`, `n_x × n_x`.
    pub xx: Vec<Vec<f64>>,
    /// `∂²c/∂x∂y`, `n_x × n_y`.
    pub xy: Vec<Vec<f64>>,
    /// `∂²c/∂y∂y`, `n_y × n_y`.
    pub yy: Vec<Vec<f64>>,
}

impl CurvatureBlocks {
    /// Extract all three blocks from one isolated block of `con`.
    pub fn of(model: &Model, con: ConId, x: &[VarId], y: &[VarId]) -> Result<Self, NlpError> {
        let nlp = isolate(model, con, &union(x, y))?;
        let (nx, ny) = (x.len(), y.len());
        Ok(CurvatureBlocks {
            xx: dense(&nlp.extract_submatrix_hessian_lag(x, x)?, nx, nx),
            xy: dense(&nlp.extract_submatrix_hessian_lag(x, y)?, nx, ny),
            yy: dense(&nlp.extract_submatrix_hessian_lag(y, y)?, ny, ny),
        })
    }
}

fn resolve_wrt(
    model: &Model,
    con: ConId,
    wrt1: Option<&[VarId]>,
    wrt2: Option<&[VarId]>,
) -> Result<(Vec<VarId>, Vec<VarId>), NlpError> {
    if !model.contains_constraint(con) {
        return Err(NlpError::UnknownConstraint(con));
    }
    Ok(match (wrt1, wrt2) {
        (None, None) => {
            let own: Vec<VarId> = model
                .constraint_variables(con)
                .into_iter()
                .filter(|&v| !model.is_fixed(v))
                .collect();
            (own.clone(), own)
        }
        (Some(a), None) => (a.to_vec(), a.to_vec()),
        (None, Some(b)) => (b.to_vec(), b.to_vec()),
        (Some(a), Some(b)) => (a.to_vec(), b.to_vec()),
    })
}

fn union(a: &[VarId], b: &[VarId]) -> Vec<VarId> {
    let mut out = a.to_vec();
    for &v in b {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Private padded block around `con` whose primals include every variable
/// in `wrt`, with duals `(1, 0)`.
fn isolate(model: &Model, con: ConId, wrt: &[VarId]) -> Result<Nlp, NlpError> {
    if let Some(&v) = wrt.iter().find(|&&v| !model.contains_var(v)) {
        return Err(NlpError::UnknownVariable(v));
    }

    let mut block = Block::new(model, &[con])?;
    let d = block.add_aux_var("_dummy", 0.0);
    let pad = block.add_aux_equation("_dummy_con", Expr::from(d) - Expr::sum(wrt.iter().copied()))?;

    let mut nlp = Nlp::new(&block);
    nlp.set_dual(con, 1.0)?;
    nlp.set_dual(pad, 0.0)?;
    Ok(nlp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_wrt_is_own_variables() {
        let mut m = Model::new();
        let x = m.add_var("x", 2.0);
        let y = m.add_var("y", 3.0);
        let c = m.add_equality("c", x * x * y, 1.0);
        let h = constraint_hessian(&m, c, None, None).unwrap().to_dense();
        // [[2y, 2x], [2x, 0]]
        assert_relative_eq!(h[0][0], 6.0);
        assert_relative_eq!(h[0][1], 4.0);
        assert_relative_eq!(h[1][0], 4.0);
        assert_relative_eq!(h[1][1], 0.0);
    }

    #[test]
    fn absent_variable_gives_zero_rows() {
        let mut m = Model::new();
        let x = m.add_var("x", 2.0);
        let z = m.add_var("z", 7.0);
        let c = m.add_constraint("c", Expr::from(x).powi(3));
        let h = constraint_hessian(&m, c, Some(&[x, z]), None).unwrap();
        assert_eq!(h.shape(), (2, 2));
        let h = h.to_dense();
        assert_relative_eq!(h[0][0], 12.0);
        assert_eq!(h[0][1], 0.0);
        assert_eq!(h[1][0], 0.0);
        assert_eq!(h[1][1], 0.0);
    }

    #[test]
    fn one_sided_request_mirrors() {
        let mut m = Model::new();
        let x = m.add_var("x", 2.0);
        let y = m.add_var("y", 3.0);
        let c = m.add_constraint("c", x * y);
        let from_second = constraint_hessian(&m, c, None, Some(&[y, x])).unwrap();
        assert_eq!(from_second.shape(), (2, 2));
        let h = from_second.to_dense();
        assert_relative_eq!(h[0][1], 1.0);
        assert_relative_eq!(h[1][0], 1.0);
    }

    #[test]
    fn rectangular_block() {
        // c = x·y·z²
        let mut m = Model::new();
        let x = m.add_var("x", 2.0);
        let y = m.add_var("y", 3.0);
        let z = m.add_var("z", 5.0);
        let c = m.add_constraint("c", x * y * Expr::from(z).powi(2));
        let h = constraint_hessian(&m, c, Some(&[x]), Some(&[y, z])).unwrap();
        assert_eq!(h.shape(), (1, 2));
        let h = h.to_dense();
        assert_relative_eq!(h[0][0], 25.0);
        assert_relative_eq!(h[0][1], 30.0);
    }

    #[test]
    fn padding_never_leaks_into_the_model() {
        let mut m = Model::new();
        let x = m.add_var("x", 2.0);
        let c = m.add_constraint("c", x * x);
        let _ = constraint_hessian(&m, c, None, None).unwrap();
        assert_eq!(m.num_vars(), 1);
        assert_eq!(m.num_constraints(), 1);
    }
}
