//! Implicit differentiation of `F(x) = f(x, y(x))` with `g(x, y(x)) = 0`.
//!
//! With `Y = dy/dx = -g_y⁻¹ g_x` (one LU of `g_y`, reused everywhere):
//!
//! ```text
//! dF/dx       = f_x + f_y · Y
//! R_k         = g_k,xx + g_k,xy · Y + (g_k,xy · Y)ᵀ + Yᵀ · g_k,yy · Y
//! g_y · d²y/dx_i dx_j = -R[:, i, j]                 (for every i, j)
//! d²F_m/dx²   = f_m,xx + f_m,xy · Y + (f_m,xy · Y)ᵀ + Yᵀ · f_m,yy · Y
//!               + Σ_a f_m,y_a · d²y_a/dx²
//! ```

use flowtape::CooMatrix;

use crate::hessian::CurvatureBlocks;
use crate::linalg::{dense, matmul, transpose, SparseLu};

/// First-order sensitivities of the externals at one resolved state, plus
/// the factorization of `g_y` for every later solve at that state.
#[derive(Debug)]
pub struct ImplicitSensitivity {
    lu: SparseLu,
    /// `dy/dx`, `n_y × n_x`.
    dydx: Vec<Vec<f64>>,
    n_x: usize,
}

impl ImplicitSensitivity {
    /// Factorize `jgy` (`n_y × n_y`) once and compute `dy/dx = -jgy⁻¹ jgx`.
    ///
    /// Returns `None` if `jgy` is singular.
    ///
    /// # Panics
    ///
    /// Panics if the block shapes are inconsistent.
    pub fn new(jgy: &CooMatrix, jgx: &CooMatrix) -> Option<Self> {
        let n_y = jgy.nrows;
        let n_x = jgx.ncols;
        assert_eq!(
            jgx.nrows, n_y,
            "jgx has {} rows, jgy has {}",
            jgx.nrows, n_y
        );

        let lu = SparseLu::factor(jgy)?;
        let neg_jgx: Vec<Vec<f64>> = jgx
            .to_dense()
            .into_iter()
            .map(|row| row.into_iter().map(|v| -v).collect())
            .collect();
        let dydx = lu.solve_columns(&neg_jgx);
        Some(ImplicitSensitivity { lu, dydx, n_x })
    }

    pub fn n_inputs(&self) -> usize {
        self.n_x
    }

    pub fn n_externals(&self) -> usize {
        self.lu.dim()
    }

    /// `dy/dx`, row `a` is external `a`, column `i` is input `i`.
    pub fn dydx(&self) -> &[Vec<f64>] {
        &self.dydx
    }

    /// `dF/dx = jfx + jfy · dy/dx`, `n_f × n_x`.
    pub fn reduced_jacobian(&self, jfx: &CooMatrix, jfy: &CooMatrix) -> Vec<Vec<f64>> {
        let n_f = jfx.nrows;
        let mut out = dense(jfx, n_f, self.n_x);
        let fy_y = matmul(&dense(jfy, n_f, self.n_externals()), &self.dydx, self.n_x);
        for (row, add) in out.iter_mut().zip(fy_y) {
            for (o, a) in row.iter_mut().zip(add) {
                *o += a;
            }
        }
        out
    }

    /// `Hxx + Hxy·Y + (Hxy·Y)ᵀ + Yᵀ·Hyy·Y`: the curvature of one equation
    /// along the solution manifold, ignoring the `d²y` term.
    fn projected(&self, h: &CurvatureBlocks) -> Vec<Vec<f64>> {
        let n_x = self.n_x;
        let cross = matmul(&h.xy, &self.dydx, n_x);
        let yt = transpose(&self.dydx, n_x);
        let quad = matmul(&yt, &matmul(&h.yy, &self.dydx, n_x), n_x);
        (0..n_x)
            .map(|i| {
                (0..n_x)
                    .map(|j| h.xx[i][j] + cross[i][j] + cross[j][i] + quad[i][j])
                    .collect()
            })
            .collect()
    }

    /// `d²y/dx²` from the curvature blocks of the external equations (one
    /// per equation, in `g` order). Returns `n_y` matrices of `n_x × n_x`.
    ///
    /// # Panics
    ///
    /// Panics if `g_curvature.len()` differs from `n_y`.
    pub fn second_order(&self, g_curvature: &[CurvatureBlocks]) -> Vec<Vec<Vec<f64>>> {
        let n_x = self.n_x;
        let n_y = self.n_externals();
        assert_eq!(
            g_curvature.len(),
            n_y,
            "need one curvature block per external equation"
        );

        // One right-hand side per (i, j), flattened as i * n_x + j.
        let rhs: Vec<Vec<f64>> = g_curvature
            .iter()
            .map(|h| {
                self.projected(h)
                    .into_iter()
                    .flat_map(|row| row.into_iter().map(|v| -v))
                    .collect()
            })
            .collect();
        let sol = self.lu.solve_columns(&rhs);

        sol.iter()
            .map(|flat| flat.chunks(n_x.max(1)).take(n_x).map(<[f64]>::to_vec).collect())
            .collect()
    }

    /// `d²F_m/dx²` for every residual equation.
    ///
    /// `f_curvature` holds one block per residual equation (in `f` order),
    /// `jfy` is `∂f/∂y` and `d2y` comes from
    /// [`second_order`](Self::second_order).
    pub fn reduced_hessians(
        &self,
        jfy: &CooMatrix,
        f_curvature: &[CurvatureBlocks],
        d2y: &[Vec<Vec<f64>>],
    ) -> Vec<Vec<Vec<f64>>> {
        let n_y = self.n_externals();
        let jfy = dense(jfy, f_curvature.len(), n_y);
        f_curvature
            .iter()
            .zip(&jfy)
            .map(|(h, fy_row)| {
                let mut hm = self.projected(h);
                for (&w, d2y_a) in fy_row.iter().zip(d2y) {
                    if w == 0.0 {
                        continue;
                    }
                    for (row, d_row) in hm.iter_mut().zip(d2y_a) {
                        for (v, d) in row.iter_mut().zip(d_row) {
                            *v += w * d;
                        }
                    }
                }
                hm
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn coo(rows: &[&[f64]]) -> CooMatrix {
        let ncols = rows.first().map_or(0, |r| r.len());
        let mut a = CooMatrix::new(rows.len(), ncols);
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                a.push(i, j, v);
            }
        }
        a
    }

    #[test]
    fn dydx_of_linear_system() {
        // g = A y + B x, A = [[2, 1], [1, 3]], B = I  →  dy/dx = -A⁻¹
        let jgy = coo(&[&[2.0, 1.0], &[1.0, 3.0]]);
        let jgx = coo(&[&[1.0, 0.0], &[0.0, 1.0]]);
        let s = ImplicitSensitivity::new(&jgy, &jgx).unwrap();
        let y = s.dydx();
        assert_relative_eq!(y[0][0], -0.6, epsilon = 1e-12);
        assert_relative_eq!(y[0][1], 0.2, epsilon = 1e-12);
        assert_relative_eq!(y[1][0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(y[1][1], -0.4, epsilon = 1e-12);
    }

    #[test]
    fn singular_jgy_is_none() {
        let jgy = coo(&[&[1.0, 1.0], &[1.0, 1.0]]);
        let jgx = coo(&[&[1.0], &[0.0]]);
        assert!(ImplicitSensitivity::new(&jgy, &jgx).is_none());
    }

    #[test]
    fn scalar_second_order() {
        // g = y - x²  →  y = x², dy/dx = 2x, d²y/dx² = 2
        let x = 1.5;
        let jgy = coo(&[&[1.0]]);
        let jgx = coo(&[&[-2.0 * x]]);
        let s = ImplicitSensitivity::new(&jgy, &jgx).unwrap();
        assert_relative_eq!(s.dydx()[0][0], 3.0);

        let g = CurvatureBlocks {
            xx: vec![vec![-2.0]],
            xy: vec![vec![0.0]],
            yy: vec![vec![0.0]],
        };
        let d2y = s.second_order(&[g]);
        assert_relative_eq!(d2y[0][0][0], 2.0);

        // f = y²  →  F = x⁴, F'' = 12x²
        let f = CurvatureBlocks {
            xx: vec![vec![0.0]],
            xy: vec![vec![0.0]],
            yy: vec![vec![2.0]],
        };
        let jfy = coo(&[&[2.0 * x * x]]);
        let h = s.reduced_hessians(&jfy, &[f], &d2y);
        assert_relative_eq!(h[0][0][0], 12.0 * x * x, epsilon = 1e-12);
    }

    #[test]
    fn no_inputs_gives_empty_blocks() {
        let jgy = coo(&[&[2.0]]);
        let jgx = CooMatrix::new(1, 0);
        let s = ImplicitSensitivity::new(&jgy, &jgx).unwrap();
        assert_eq!(s.dydx(), &[Vec::<f64>::new()]);
        let g = CurvatureBlocks {
            xx: vec![],
            xy: vec![],
            yy: vec![vec![0.0]],
        };
        let d2y = s.second_order(&[g]);
        assert_eq!(d2y, vec![Vec::<Vec<f64>>::new()]);
    }
}
