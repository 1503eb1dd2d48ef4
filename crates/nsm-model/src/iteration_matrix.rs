//! The per-body iteration matrix `W` and its factorization.

use std::collections::HashMap;

use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

use nsm_types::DsId;

/// Storage of iteration matrices keyed by body identity.
pub type WStore = HashMap<DsId, IterationMatrix>;

/// The iteration matrix of one body, with a lazily computed LU
/// factorization.
///
/// The matrix combines the mass operator with θ-scaled force Jacobians;
/// the integrator owns one per body and recomputes it each step (or once,
/// for linear time-invariant bodies). The factorization is computed on
/// first solve after each recomputation.
///
/// A singular factorization is reported by the solve methods returning
/// `None`; callers attach the owning body to turn that into a fatal
/// error.
#[derive(Debug, Clone)]
pub struct IterationMatrix {
    w: DMatrix<f64>,
    lu: Option<LU<f64, Dyn, Dyn>>,
}

impl IterationMatrix {
    /// Wrap a freshly computed matrix; the factorization is deferred.
    #[must_use]
    pub fn new(w: DMatrix<f64>) -> Self {
        Self { w, lu: None }
    }

    /// Dimension of the (square) matrix.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.w.nrows()
    }

    /// The raw matrix.
    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.w
    }

    /// Replace the matrix, invalidating the factorization.
    pub fn set_matrix(&mut self, w: DMatrix<f64>) {
        self.w = w;
        self.lu = None;
    }

    /// Whether the factorization has been computed since the last update.
    #[must_use]
    pub fn is_factorized(&self) -> bool {
        self.lu.is_some()
    }

    fn ensure_factorized(&mut self) -> Option<&LU<f64, Dyn, Dyn>> {
        if self.lu.is_none() {
            self.lu = Some(LU::new(self.w.clone()));
        }
        self.lu.as_ref()
    }

    /// Solve `W·x = rhs` for a vector right-hand side.
    ///
    /// Returns `None` when the matrix is singular.
    #[must_use]
    pub fn solve_vec(&mut self, rhs: &DVector<f64>) -> Option<DVector<f64>> {
        self.ensure_factorized()?.solve(rhs)
    }

    /// Solve `W·X = rhs` column-wise for a matrix right-hand side.
    ///
    /// Returns `None` when the matrix is singular.
    #[must_use]
    pub fn solve_mat(&mut self, rhs: &DMatrix<f64>) -> Option<DMatrix<f64>> {
        self.ensure_factorized()?.solve(rhs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_solve_roundtrip() {
        // Well-conditioned non-symmetric matrix.
        let w = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 2.0, 5.0]);
        let mut iteration = IterationMatrix::new(w.clone());

        let b = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let x = iteration.solve_vec(&b).unwrap();
        let back = &w * &x;

        for i in 0..3 {
            assert_relative_eq!(back[i], b[i], epsilon = 1e-12);
        }
        assert!(iteration.is_factorized());
    }

    #[test]
    fn test_singular_matrix_reports_none() {
        let mut iteration = IterationMatrix::new(DMatrix::zeros(2, 2));
        let b = DVector::from_vec(vec![1.0, 1.0]);
        assert!(iteration.solve_vec(&b).is_none());
    }

    #[test]
    fn test_set_matrix_invalidates_factorization() {
        let mut iteration = IterationMatrix::new(DMatrix::identity(2, 2));
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let _ = iteration.solve_vec(&b).unwrap();
        assert!(iteration.is_factorized());

        iteration.set_matrix(DMatrix::identity(2, 2) * 2.0);
        assert!(!iteration.is_factorized());
        let x = iteration.solve_vec(&b).unwrap();
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_solve() {
        let w = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        let mut iteration = IterationMatrix::new(w);
        let rhs = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let x = iteration.solve_mat(&rhs).unwrap();
        assert_relative_eq!(x[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(x[(1, 1)], 0.25, epsilon = 1e-12);
    }
}
