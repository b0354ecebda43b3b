//! Sparse LU factorization (faer) and the small dense helpers the implicit
//! differentiation engine needs.

use faer::linalg::solvers::SpSolver;
use faer::sparse::linalg::solvers::Lu;
use faer::sparse::SparseColMat;
use faer::Col;
use flowtape::CooMatrix;

/// Largest accepted `|x_i - 1|` in the post-factorization probe solve.
const PROBE_TOL: f64 = 1e-6;

/// A sparse LU factorization of a square matrix, reusable across any number
/// of right-hand sides.
pub struct SparseLu {
    n: usize,
    // `None` only for the 0 x 0 matrix.
    lu: Option<Lu<usize, f64>>,
}

impl std::fmt::Debug for SparseLu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseLu").field("n", &self.n).finish_non_exhaustive()
    }
}

impl SparseLu {
    /// Factorize the square matrix `a`.
    ///
    /// Returns `None` if `a` is singular. faer's sparse LU can panic or
    /// silently produce non-finite factors on singular input, so the
    /// factorization is run under `catch_unwind` and then checked by solving
    /// `A·x = A·1` and comparing `x` against the ones vector.
    ///
    /// The probe tolerance is absolute (`1e-6` on every `x_i - 1`), so
    /// near-singular matrices are rejected too: once the condition number
    /// passes roughly `1e10` a well-posed but badly scaled matrix also
    /// returns `None`.
    ///
    /// # Panics
    ///
    /// Panics if `a` is not square.
    pub fn factor(a: &CooMatrix) -> Option<Self> {
        let n = a.nrows;
        assert_eq!(
            a.ncols, n,
            "LU needs a square matrix, got {}x{}",
            a.nrows, a.ncols
        );
        if n == 0 {
            return Some(SparseLu { n, lu: None });
        }
        if a.triplets.iter().any(|&(_, _, v)| !v.is_finite()) {
            return None;
        }

        let mat = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &a.triplets).ok()?;
        let lu = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| mat.sp_lu().ok()))
            .ok()
            .flatten()?;
        let factors = SparseLu { n, lu: Some(lu) };

        let mut row_sums = vec![0.0; n];
        let mut scale = 0.0_f64;
        for &(r, _, v) in &a.triplets {
            row_sums[r] += v;
            scale = scale.max(v.abs());
        }
        if scale == 0.0 {
            return None;
        }
        let probe = factors.solve(&row_sums);
        let ok = probe
            .iter()
            .all(|&p| p.is_finite() && (p - 1.0).abs() <= PROBE_TOL);
        ok.then_some(factors)
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Solve `A·x = b`.
    ///
    /// # Panics
    ///
    /// Panics if `b.len()` differs from the matrix dimension.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        assert_eq!(
            b.len(),
            self.n,
            "rhs length ({}) must equal matrix dimension ({})",
            b.len(),
            self.n
        );
        match &self.lu {
            None => Vec::new(),
            Some(lu) => {
                let rhs = Col::<f64>::from_fn(self.n, |i| b[i]);
                let sol = lu.solve(&rhs);
                col_to_vec(&sol, self.n)
            }
        }
    }

    /// Solve `A·X = B` for a row-major `n × k` right-hand side, reusing the
    /// factorization for every column.
    pub fn solve_columns(&self, b: &[Vec<f64>]) -> Vec<Vec<f64>> {
        assert_eq!(b.len(), self.n, "rhs must have {} rows", self.n);
        let k = b.first().map_or(0, Vec::len);
        let mut out = vec![vec![0.0; k]; self.n];
        let mut col = vec![0.0; self.n];
        for j in 0..k {
            for i in 0..self.n {
                col[i] = b[i][j];
            }
            let x = self.solve(&col);
            for i in 0..self.n {
                out[i][j] = x[i];
            }
        }
        out
    }
}

fn col_to_vec(col: &Col<f64>, len: usize) -> Vec<f64> {
    (0..len).map(|i| col[i]).collect()
}

// ══════════════════════════════════════════════
//  Dense helpers (row-major `Vec<Vec<f64>>`)
// ══════════════════════════════════════════════

/// `a · b` for an `m × p` and a `p × n` matrix. `n` is passed explicitly so
/// that an empty `b` keeps its shape.
pub(crate) fn matmul(a: &[Vec<f64>], b: &[Vec<f64>], n: usize) -> Vec<Vec<f64>> {
    a.iter()
        .map(|row| {
            let mut out = vec![0.0; n];
            for (k, &a_ik) in row.iter().enumerate() {
                if a_ik == 0.0 {
                    continue;
                }
                for (o, &b_kj) in out.iter_mut().zip(&b[k]) {
                    *o += a_ik * b_kj;
                }
            }
            out
        })
        .collect()
}

/// Transpose of an `m × n` matrix.
pub(crate) fn transpose(a: &[Vec<f64>], n: usize) -> Vec<Vec<f64>> {
    (0..n).map(|j| a.iter().map(|row| row[j]).collect()).collect()
}

/// Densify a COO block, panicking on shape mismatch.
pub(crate) fn dense(a: &CooMatrix, nrows: usize, ncols: usize) -> Vec<Vec<f64>> {
    assert_eq!(a.shape(), (nrows, ncols), "unexpected block shape");
    a.to_dense()
}
