//! Coordinate-format sparse matrices returned by the submatrix extractor.

/// Sparse matrix in COO (triplet) format.
///
/// Entries are `(row, col, value)`. Duplicate positions are allowed and sum
/// when densified.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CooMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub triplets: Vec<(usize, usize, f64)>,
}

impl CooMatrix {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        CooMatrix {
            nrows,
            ncols,
            triplets: Vec::new(),
        }
    }

    /// # Panics
    ///
    /// Panics if `(row, col)` is out of bounds.
    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        assert!(
            row < self.nrows && col < self.ncols,
            "entry ({row}, {col}) out of bounds for {}x{} matrix",
            self.nrows,
            self.ncols
        );
        self.triplets.push((row, col, value));
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.triplets.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    /// Row-major dense copy.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.ncols]; self.nrows];
        for &(r, c, v) in &self.triplets {
            dense[r][c] += v;
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_sum_when_densified() {
        let mut a = CooMatrix::new(2, 3);
        a.push(0, 2, 1.5);
        a.push(0, 2, 0.5);
        a.push(1, 0, -1.0);
        assert_eq!(a.to_dense(), vec![vec![0.0, 0.0, 2.0], vec![-1.0, 0.0, 0.0]]);
    }
}
