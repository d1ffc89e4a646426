use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::core::error::{GraphError, Result};

/// Accumulator for the Gauss-Newton normal equations `A dx = b`.
///
/// Assembly goes through a triplet matrix so blockwise insertion stays
/// cheap; duplicate entries are summed when the triplets are compressed
/// for factorization. The running diagonal is tracked densely so that
/// completely unconstrained state entries can be detected afterwards.
pub struct NormalEquations {
    dim: usize,
    a: CooMatrix<f64>,
    b: DVector<f64>,
    diag: Vec<f64>,
}

impl NormalEquations {
    pub fn new(dim: usize) -> Self {
        NormalEquations {
            dim,
            a: CooMatrix::new(dim, dim),
            b: DVector::zeros(dim),
            diag: vec![0.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Adds a dense block into `A` with its top-left corner at
    /// `(row, col)`. Structural zeros are not inserted.
    pub fn add_block(&mut self, row: usize, col: usize, block: &DMatrix<f64>) {
        for r in 0..block.nrows() {
            for c in 0..block.ncols() {
                let v = block[(r, c)];
                if v != 0.0 {
                    self.a.push(row + r, col + c, v);
                    if row + r == col + c {
                        self.diag[row + r] += v;
                    }
                }
            }
        }
    }

    /// Adds a segment into `b` starting at `row`.
    pub fn add_rhs(&mut self, row: usize, seg: &DVector<f64>) {
        for r in 0..seg.nrows() {
            self.b[row + r] += seg[r];
        }
    }

    pub fn add_diagonal(&mut self, index: usize, value: f64) {
        self.a.push(index, index, value);
        self.diag[index] += value;
    }

    /// Gives every state entry no edge contributed to a nominal weight
    /// `w0`, keeping the system factorizable. Returns how many entries
    /// were patched.
    pub fn condition(&mut self, w0: f64) -> usize {
        let mut patched = 0;
        for i in 0..self.dim {
            if self.diag[i] == 0.0 {
                self.a.push(i, i, w0);
                self.diag[i] = w0;
                patched += 1;
            }
        }
        patched
    }

    /// Levenberg-Marquardt style `lambda * I` term.
    pub fn add_damping(&mut self, lambda: f64) {
        if lambda > 0.0 {
            for i in 0..self.dim {
                self.add_diagonal(i, lambda);
            }
        }
    }

    /// Factorizes and solves. An indefinite system is a modeling fault
    /// (disconnected or under-constrained graph) and comes back as
    /// [`GraphError::NotPositiveDefinite`].
    pub fn solve(self) -> Result<DVector<f64>> {
        let a = CscMatrix::from(&self.a);
        let chol = CscCholesky::factor(&a).map_err(|_| GraphError::NotPositiveDefinite)?;
        let b = DMatrix::from_column_slice(self.dim, 1, self.b.as_slice());
        let x = chol.solve(&b);
        Ok(DVector::from_column_slice(x.as_slice()))
    }
}
