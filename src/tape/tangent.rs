use crate::dual::Dual;

impl super::Tape {
    // ── Forward-over-reverse (second-order) ──

    /// Hessian-vector product of the seeded combination `Σ_k seeds[k]·output_k`.
    ///
    /// Returns `(gradient, H·v)`, both of length
    /// [`num_inputs`](Self::num_inputs). The tape is not mutated.
    pub fn hvp_seeded(&self, x: &[f64], seeds: &[f64], v: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = self.num_inputs();
        assert_eq!(x.len(), n, "wrong number of inputs");
        assert_eq!(v.len(), n, "wrong number of directions");

        let dual_inputs: Vec<Dual<f64>> = x
            .iter()
            .zip(v)
            .map(|(&xi, &vi)| Dual::new(xi, vi))
            .collect();
        let dual_seeds: Vec<Dual<f64>> = seeds.iter().map(|&s| Dual::constant(s)).collect();

        let mut dual_vals = Vec::new();
        let mut adjoint_buf = Vec::new();
        self.forward_sweep(&dual_inputs, &mut dual_vals);
        self.reverse_sweep(&dual_vals, &dual_seeds, &mut adjoint_buf);

        let gradient = adjoint_buf[..n].iter().map(|a| a.re).collect();
        let hvp = adjoint_buf[..n].iter().map(|a| a.eps).collect();
        (gradient, hvp)
    }

    /// Selected columns of the Hessian of `Σ_k seeds[k]·output_k`.
    ///
    /// Returns `cols.len()` columns, each of length
    /// [`num_inputs`](Self::num_inputs): `out[c][i] = ∂²L/∂x_i∂x_{cols[c]}`.
    /// One forward-over-reverse pass per requested column.
    pub fn hessian_columns(&self, x: &[f64], seeds: &[f64], cols: &[usize]) -> Vec<Vec<f64>> {
        let n = self.num_inputs();
        assert_eq!(x.len(), n, "wrong number of inputs");

        let dual_seeds: Vec<Dual<f64>> = seeds.iter().map(|&s| Dual::constant(s)).collect();
        let mut dual_input_buf: Vec<Dual<f64>> = Vec::with_capacity(n);
        let mut dual_vals_buf = Vec::new();
        let mut adjoint_buf = Vec::new();
        let mut out = Vec::with_capacity(cols.len());

        for &j in cols {
            assert!(j < n, "column {j} out of range for {n} inputs");
            dual_input_buf.clear();
            dual_input_buf
                .extend((0..n).map(|i| Dual::new(x[i], if i == j { 1.0 } else { 0.0 })));

            self.forward_sweep(&dual_input_buf, &mut dual_vals_buf);
            self.reverse_sweep(&dual_vals_buf, &dual_seeds, &mut adjoint_buf);
            out.push(adjoint_buf[..n].iter().map(|a| a.eps).collect());
        }
        out
    }

    /// Full Hessian of output `k` via `n` Hessian-vector products.
    ///
    /// Returns `hessian[i][j] = ∂²output_k/∂x_i∂x_j`.
    pub fn hessian(&self, x: &[f64], k: usize) -> Vec<Vec<f64>> {
        let n = self.num_inputs();
        let mut seeds = vec![0.0; self.num_outputs()];
        seeds[k] = 1.0;
        let cols: Vec<usize> = (0..n).collect();
        let columns = self.hessian_columns(x, &seeds, &cols);
        (0..n)
            .map(|i| (0..n).map(|j| columns[j][i]).collect())
            .collect()
    }
}
