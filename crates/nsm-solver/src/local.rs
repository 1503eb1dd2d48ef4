//! Local single-contact solvers.
//!
//! Each interaction's sub-problem is a small complementarity problem
//! `u = rhs + B·λ` with λ constrained by the interaction's non-smooth
//! law. These solvers are substitutable at single-contact granularity;
//! the outer Gauss-Seidel loop never looks inside them.

use nalgebra::{DMatrix, DVector};

use nsm_model::NonSmoothLaw;
use nsm_types::LocalSolverKind;

/// Iteration budget of the fixed-point loops inside a local solve.
const MAX_INNER_ITERATIONS: usize = 50;

/// Convergence threshold on the multiplier change inside a local solve.
const INNER_TOLERANCE: f64 = 1e-12;

/// Diagonal magnitude below which a row is considered degenerate.
const DEGENERATE_DIAGONAL: f64 = 1e-14;

/// Outcome of one local solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    /// The local problem converged.
    Converged,
    /// The inner fixed-point loop hit its iteration budget.
    MaxIterations,
    /// A degenerate diagonal or singular block prevented a solve; the
    /// multiplier is left unchanged.
    NumericalFailure,
}

/// Solve one interaction's local problem, writing the multiplier in
/// place.
///
/// `block` is the interaction's Delassus diagonal block, `rhs` the free
/// output plus the frozen off-diagonal contributions of its neighbors.
#[must_use]
pub fn solve_local(
    law: &NonSmoothLaw,
    kind: LocalSolverKind,
    regularization: f64,
    block: &DMatrix<f64>,
    rhs: &DVector<f64>,
    lambda: &mut DVector<f64>,
) -> LocalStatus {
    let block = match kind {
        LocalSolverKind::Projection => block.clone(),
        LocalSolverKind::Proximal => {
            let mut regularized = block.clone();
            for i in 0..regularized.nrows() {
                regularized[(i, i)] += regularization;
            }
            regularized
        }
    };

    match law {
        NonSmoothLaw::NewtonImpact { .. } => solve_unilateral(&block, rhs, lambda),
        NonSmoothLaw::NewtonImpactFriction { friction, .. } => {
            solve_friction_cone(&block, rhs, *friction, lambda)
        }
        NonSmoothLaw::Equality => solve_equality(&block, rhs, lambda),
        NonSmoothLaw::MixedComplementarity { equality_dim } => {
            solve_mixed(&block, rhs, *equality_dim, lambda)
        }
    }
}

/// Projected Gauss-Seidel on `0 <= λ ⟂ rhs + B·λ >= 0`.
fn solve_unilateral(block: &DMatrix<f64>, rhs: &DVector<f64>, lambda: &mut DVector<f64>) -> LocalStatus {
    let m = rhs.len();
    for _ in 0..MAX_INNER_ITERATIONS {
        let mut delta = 0.0f64;
        for i in 0..m {
            let d = block[(i, i)];
            if d.abs() < DEGENERATE_DIAGONAL {
                return LocalStatus::NumericalFailure;
            }
            let mut u = rhs[i];
            for j in 0..m {
                u += block[(i, j)] * lambda[j];
            }
            let updated = (lambda[i] - u / d).max(0.0);
            delta = delta.max((updated - lambda[i]).abs());
            lambda[i] = updated;
        }
        if delta < INNER_TOLERANCE * (1.0 + lambda.amax()) {
            return LocalStatus::Converged;
        }
    }
    LocalStatus::MaxIterations
}

/// Alternating normal projection and tangential disk projection for the
/// Coulomb cone (constraint layout `[normal, tangent1, tangent2]`).
fn solve_friction_cone(
    block: &DMatrix<f64>,
    rhs: &DVector<f64>,
    friction: f64,
    lambda: &mut DVector<f64>,
) -> LocalStatus {
    let d_n = block[(0, 0)];
    if d_n.abs() < DEGENERATE_DIAGONAL {
        return LocalStatus::NumericalFailure;
    }

    for _ in 0..MAX_INNER_ITERATIONS {
        let previous = lambda.clone();

        // Normal projection with tangential impulses frozen.
        let u_n = rhs[0] + block[(0, 0)] * lambda[0] + block[(0, 1)] * lambda[1]
            + block[(0, 2)] * lambda[2];
        lambda[0] = (lambda[0] - u_n / d_n).max(0.0);

        // Unconstrained tangential solve with the normal impulse frozen,
        // then projection onto the disk of radius μ·λ_n.
        let b1 = -(rhs[1] + block[(1, 0)] * lambda[0]);
        let b2 = -(rhs[2] + block[(2, 0)] * lambda[0]);
        let a11 = block[(1, 1)];
        let a12 = block[(1, 2)];
        let a21 = block[(2, 1)];
        let a22 = block[(2, 2)];
        let det = a11 * a22 - a12 * a21;
        if det.abs() < DEGENERATE_DIAGONAL {
            return LocalStatus::NumericalFailure;
        }
        let mut t1 = (b1 * a22 - b2 * a12) / det;
        let mut t2 = (a11 * b2 - a21 * b1) / det;

        let bound = friction * lambda[0];
        let tangential = (t1 * t1 + t2 * t2).sqrt();
        if tangential > bound {
            let scale = if tangential > 0.0 { bound / tangential } else { 0.0 };
            t1 *= scale;
            t2 *= scale;
        }
        lambda[1] = t1;
        lambda[2] = t2;

        let delta = (lambda[0] - previous[0])
            .abs()
            .max((lambda[1] - previous[1]).abs())
            .max((lambda[2] - previous[2]).abs());
        if delta < INNER_TOLERANCE * (1.0 + lambda.amax()) {
            return LocalStatus::Converged;
        }
    }
    LocalStatus::MaxIterations
}

/// Direct solve of the bilateral system `B·λ = −rhs`.
fn solve_equality(block: &DMatrix<f64>, rhs: &DVector<f64>, lambda: &mut DVector<f64>) -> LocalStatus {
    let lu = block.clone().lu();
    match lu.solve(&(-rhs)) {
        Some(solution) => {
            *lambda = solution;
            LocalStatus::Converged
        }
        None => LocalStatus::NumericalFailure,
    }
}

/// Mixed complementarity: leading `equality_dim` rows are bilateral, the
/// remainder unilateral. Alternates a direct equality sub-solve with a
/// projection of the unilateral rows.
fn solve_mixed(
    block: &DMatrix<f64>,
    rhs: &DVector<f64>,
    equality_dim: usize,
    lambda: &mut DVector<f64>,
) -> LocalStatus {
    let m = rhs.len();
    let k = equality_dim.min(m);
    if k == 0 {
        return solve_unilateral(block, rhs, lambda);
    }
    if k == m {
        return solve_equality(block, rhs, lambda);
    }

    let eq_block = block.view((0, 0), (k, k)).into_owned();
    let eq_lu = eq_block.lu();

    for _ in 0..MAX_INNER_ITERATIONS {
        let previous = lambda.clone();

        // Equality rows with the unilateral impulses frozen.
        let mut eq_rhs = DVector::zeros(k);
        for i in 0..k {
            let mut coupling = rhs[i];
            for j in k..m {
                coupling += block[(i, j)] * lambda[j];
            }
            eq_rhs[i] = -coupling;
        }
        let Some(eq_lambda) = eq_lu.solve(&eq_rhs) else {
            return LocalStatus::NumericalFailure;
        };
        for i in 0..k {
            lambda[i] = eq_lambda[i];
        }

        // Unilateral rows with everything else frozen.
        for i in k..m {
            let d = block[(i, i)];
            if d.abs() < DEGENERATE_DIAGONAL {
                return LocalStatus::NumericalFailure;
            }
            let mut u = rhs[i];
            for j in 0..m {
                u += block[(i, j)] * lambda[j];
            }
            lambda[i] = (lambda[i] - u / d).max(0.0);
        }

        let delta = (&*lambda - &previous).amax();
        if delta < INNER_TOLERANCE * (1.0 + lambda.amax()) {
            return LocalStatus::Converged;
        }
    }
    LocalStatus::MaxIterations
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn projection() -> LocalSolverKind {
        LocalSolverKind::Projection
    }

    #[test]
    fn test_unilateral_closing_contact_gets_impulse() {
        // u = −4 + 2λ: complementarity forces λ = 2, u = 0.
        let block = DMatrix::from_element(1, 1, 2.0);
        let rhs = DVector::from_element(1, -4.0);
        let mut lambda = DVector::zeros(1);

        let status = solve_local(
            &NonSmoothLaw::NewtonImpact { restitution: 0.0 },
            projection(),
            0.0,
            &block,
            &rhs,
            &mut lambda,
        );
        assert_eq!(status, LocalStatus::Converged);
        assert_relative_eq!(lambda[0], 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_unilateral_separating_contact_stays_zero() {
        let block = DMatrix::from_element(1, 1, 2.0);
        let rhs = DVector::from_element(1, 3.0);
        let mut lambda = DVector::from_element(1, 1.0);

        let status = solve_local(
            &NonSmoothLaw::NewtonImpact { restitution: 0.0 },
            projection(),
            0.0,
            &block,
            &rhs,
            &mut lambda,
        );
        assert_eq!(status, LocalStatus::Converged);
        assert_relative_eq!(lambda[0], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_unilateral_degenerate_diagonal_fails() {
        let block = DMatrix::zeros(1, 1);
        let rhs = DVector::from_element(1, -1.0);
        let mut lambda = DVector::zeros(1);

        let status = solve_local(
            &NonSmoothLaw::NewtonImpact { restitution: 0.0 },
            projection(),
            0.0,
            &block,
            &rhs,
            &mut lambda,
        );
        assert_eq!(status, LocalStatus::NumericalFailure);
    }

    #[test]
    fn test_proximal_regularization_rescues_degenerate_block() {
        let block = DMatrix::zeros(1, 1);
        let rhs = DVector::from_element(1, -1.0);
        let mut lambda = DVector::zeros(1);

        let status = solve_local(
            &NonSmoothLaw::NewtonImpact { restitution: 0.0 },
            LocalSolverKind::Proximal,
            1e-6,
            &block,
            &rhs,
            &mut lambda,
        );
        assert_eq!(status, LocalStatus::Converged);
        assert!(lambda[0] > 0.0);
    }

    #[test]
    fn test_friction_sticking() {
        // Identity block, strong friction: the tangential impulse stays
        // inside the cone, contact sticks.
        let block = DMatrix::identity(3, 3);
        let rhs = DVector::from_vec(vec![-1.0, 0.3, 0.0]);
        let mut lambda = DVector::zeros(3);

        let status = solve_local(
            &NonSmoothLaw::NewtonImpactFriction {
                restitution: 0.0,
                friction: 1.0,
            },
            projection(),
            0.0,
            &block,
            &rhs,
            &mut lambda,
        );
        assert_eq!(status, LocalStatus::Converged);
        assert_relative_eq!(lambda[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(lambda[1], -0.3, epsilon = 1e-10);
        assert_relative_eq!(lambda[2], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_friction_sliding_saturates_cone() {
        let block = DMatrix::identity(3, 3);
        let rhs = DVector::from_vec(vec![-1.0, 0.3, 0.0]);
        let mut lambda = DVector::zeros(3);
        let mu = 0.1;

        let status = solve_local(
            &NonSmoothLaw::NewtonImpactFriction {
                restitution: 0.0,
                friction: mu,
            },
            projection(),
            0.0,
            &block,
            &rhs,
            &mut lambda,
        );
        assert_eq!(status, LocalStatus::Converged);

        let tangential = (lambda[1].powi(2) + lambda[2].powi(2)).sqrt();
        assert_relative_eq!(tangential, mu * lambda[0], epsilon = 1e-10);
    }

    #[test]
    fn test_equality_direct_solve() {
        let block = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        let rhs = DVector::from_vec(vec![2.0, -8.0]);
        let mut lambda = DVector::zeros(2);

        let status = solve_local(
            &NonSmoothLaw::Equality,
            projection(),
            0.0,
            &block,
            &rhs,
            &mut lambda,
        );
        assert_eq!(status, LocalStatus::Converged);
        assert_relative_eq!(lambda[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(lambda[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mixed_splits_rows() {
        let block = DMatrix::identity(2, 2);
        // Row 0 equality: λ0 = 1.5; row 1 unilateral with positive rhs: 0.
        let rhs = DVector::from_vec(vec![-1.5, 2.0]);
        let mut lambda = DVector::zeros(2);

        let status = solve_local(
            &NonSmoothLaw::MixedComplementarity { equality_dim: 1 },
            projection(),
            0.0,
            &block,
            &rhs,
            &mut lambda,
        );
        assert_eq!(status, LocalStatus::Converged);
        assert_relative_eq!(lambda[0], 1.5, epsilon = 1e-10);
        assert_relative_eq!(lambda[1], 0.0, epsilon = 1e-10);
    }
}
