//! Dynamical systems: per-body state and dynamics evaluation.
//!
//! A [`DynamicalSystem`] couples generalized coordinates `q`, generalized
//! velocity `v`, per-level impulse accumulators `p`, and a bounded state
//! history with a [`Dynamics`] payload that knows how to evaluate the
//! mass operator, the total force, and the force Jacobians.
//!
//! The payload is a closed tagged union; the only open extension point is
//! the [`ForceLaw`] trait used by the nonlinear Lagrangian variant.

use nalgebra::{DMatrix, DVector, Matrix3, UnitQuaternion, Vector3};

use nsm_types::{NsmError, Result, NUM_LEVELS};

use crate::StateMemory;

/// Number of velocity degrees of freedom of a rigid Newton-Euler body.
pub const NEWTON_EULER_NDOF_V: usize = 6;

/// Number of position coordinates of a Newton-Euler body (3 translation
/// plus a unit quaternion).
pub const NEWTON_EULER_NDOF_Q: usize = 7;

/// User-supplied nonlinear force model for Lagrangian systems.
///
/// Implementations evaluate the total generalized force `F(t, q, v)` and
/// its Jacobians with respect to position and velocity. Jacobians feed the
/// iteration matrix; returning zeros degrades the scheme toward explicit
/// treatment of that term but is not an error.
pub trait ForceLaw: Send + Sync {
    /// Total generalized force at the given time and state.
    fn force(&self, t: f64, q: &DVector<f64>, v: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of the force with respect to `q`.
    fn jacobian_q(&self, t: f64, q: &DVector<f64>, v: &DVector<f64>) -> DMatrix<f64>;

    /// Jacobian of the force with respect to `v`.
    fn jacobian_v(&self, t: f64, q: &DVector<f64>, v: &DVector<f64>) -> DMatrix<f64>;
}

/// Lagrangian system with constant mass and linear internal forces:
/// `M v̇ + C v + K q = f_ext`.
#[derive(Debug, Clone)]
pub struct LagrangianLinear {
    /// Constant mass matrix.
    pub mass: DMatrix<f64>,
    /// Linear stiffness `K` (None = zero).
    pub stiffness: Option<DMatrix<f64>>,
    /// Linear damping `C` (None = zero).
    pub damping: Option<DMatrix<f64>>,
    /// External force vector.
    pub f_ext: DVector<f64>,
}

impl LagrangianLinear {
    /// Create a linear Lagrangian payload with only a mass matrix.
    #[must_use]
    pub fn new(mass: DMatrix<f64>) -> Self {
        let n = mass.nrows();
        Self {
            mass,
            stiffness: None,
            damping: None,
            f_ext: DVector::zeros(n),
        }
    }

    /// Set the stiffness matrix.
    #[must_use]
    pub fn with_stiffness(mut self, stiffness: DMatrix<f64>) -> Self {
        self.stiffness = Some(stiffness);
        self
    }

    /// Set the damping matrix.
    #[must_use]
    pub fn with_damping(mut self, damping: DMatrix<f64>) -> Self {
        self.damping = Some(damping);
        self
    }
}

/// Lagrangian system with a user-supplied nonlinear force model.
pub struct LagrangianNonlinear {
    /// Constant mass matrix.
    pub mass: DMatrix<f64>,
    /// The force model.
    pub force: Box<dyn ForceLaw>,
}

impl std::fmt::Debug for LagrangianNonlinear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LagrangianNonlinear")
            .field("ndof", &self.mass.nrows())
            .finish_non_exhaustive()
    }
}

/// Rigid body with Newton-Euler dynamics.
///
/// Coordinates: `q = [x y z, qw qx qy qz]`, `v = [v; ω]` with both the
/// linear velocity and the angular velocity expressed in world frame.
#[derive(Debug, Clone)]
pub struct NewtonEulerBody {
    /// Scalar mass.
    pub mass: f64,
    /// Body-frame inertia tensor.
    pub inertia: Matrix3<f64>,
    /// External force (world frame).
    pub f_ext: Vector3<f64>,
    /// External torque (world frame).
    pub torque_ext: Vector3<f64>,
}

impl NewtonEulerBody {
    /// Create a rigid body payload from mass and body-frame inertia.
    #[must_use]
    pub fn new(mass: f64, inertia: Matrix3<f64>) -> Self {
        Self {
            mass,
            inertia,
            f_ext: Vector3::zeros(),
            torque_ext: Vector3::zeros(),
        }
    }

    /// Inertia tensor rotated into world frame.
    #[must_use]
    pub fn world_inertia(&self, orientation: &UnitQuaternion<f64>) -> Matrix3<f64> {
        let r = orientation.to_rotation_matrix();
        r.matrix() * self.inertia * r.matrix().transpose()
    }
}

/// Dynamics payload of a body.
#[derive(Debug)]
pub enum Dynamics {
    /// Linear time-invariant Lagrangian system.
    LagrangianLinear(LagrangianLinear),
    /// Nonlinear Lagrangian system with a [`ForceLaw`].
    Lagrangian(LagrangianNonlinear),
    /// Newton-Euler rigid body.
    NewtonEuler(NewtonEulerBody),
}

/// Discriminant of a [`Dynamics`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicsKind {
    /// Linear time-invariant Lagrangian.
    LagrangianLinear,
    /// Nonlinear Lagrangian.
    Lagrangian,
    /// Newton-Euler rigid body.
    NewtonEuler,
}

impl std::fmt::Display for DynamicsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LagrangianLinear => "lagrangian-linear",
            Self::Lagrangian => "lagrangian",
            Self::NewtonEuler => "newton-euler",
        };
        f.write_str(name)
    }
}

/// One simulated body: state, impulses, history, and dynamics.
#[derive(Debug)]
pub struct DynamicalSystem {
    dynamics: Dynamics,
    q: DVector<f64>,
    v: DVector<f64>,
    p: Vec<DVector<f64>>,
    memory: StateMemory,
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

impl DynamicalSystem {
    /// Create a body from a dynamics payload and an initial state.
    ///
    /// # Errors
    ///
    /// Returns a dimension-mismatch error when the initial state does not
    /// fit the payload (fatal configuration error).
    pub fn new(dynamics: Dynamics, q0: DVector<f64>, v0: DVector<f64>) -> Result<Self> {
        let (ndof_q, ndof_v) = match &dynamics {
            Dynamics::LagrangianLinear(payload) => {
                let n = payload.mass.nrows();
                if payload.mass.ncols() != n {
                    return Err(NsmError::DimensionMismatch {
                        context: "lagrangian mass matrix",
                        expected: n,
                        actual: payload.mass.ncols(),
                    });
                }
                if payload.f_ext.len() != n {
                    return Err(NsmError::DimensionMismatch {
                        context: "lagrangian external force",
                        expected: n,
                        actual: payload.f_ext.len(),
                    });
                }
                for op in [&payload.stiffness, &payload.damping].into_iter().flatten() {
                    if op.nrows() != n || op.ncols() != n {
                        return Err(NsmError::DimensionMismatch {
                            context: "lagrangian stiffness/damping",
                            expected: n,
                            actual: op.nrows(),
                        });
                    }
                }
                (n, n)
            }
            Dynamics::Lagrangian(payload) => {
                let n = payload.mass.nrows();
                if payload.mass.ncols() != n {
                    return Err(NsmError::DimensionMismatch {
                        context: "lagrangian mass matrix",
                        expected: n,
                        actual: payload.mass.ncols(),
                    });
                }
                (n, n)
            }
            Dynamics::NewtonEuler(_) => (NEWTON_EULER_NDOF_Q, NEWTON_EULER_NDOF_V),
        };

        if q0.len() != ndof_q {
            return Err(NsmError::DimensionMismatch {
                context: "initial position",
                expected: ndof_q,
                actual: q0.len(),
            });
        }
        if v0.len() != ndof_v {
            return Err(NsmError::DimensionMismatch {
                context: "initial velocity",
                expected: ndof_v,
                actual: v0.len(),
            });
        }

        let mut ds = Self {
            dynamics,
            q: q0,
            v: v0,
            p: (0..NUM_LEVELS).map(|_| DVector::zeros(ndof_v)).collect(),
            memory: StateMemory::new(1),
        };
        if ds.kind() == DynamicsKind::NewtonEuler {
            ds.normalize_orientation();
        }
        Ok(ds)
    }

    /// Convenience constructor for a linear Lagrangian body.
    pub fn lagrangian_linear(
        mass: DMatrix<f64>,
        q0: DVector<f64>,
        v0: DVector<f64>,
    ) -> Result<Self> {
        Self::new(Dynamics::LagrangianLinear(LagrangianLinear::new(mass)), q0, v0)
    }

    /// Convenience constructor for a Newton-Euler rigid body at a given
    /// position with identity orientation, at rest.
    pub fn newton_euler(mass: f64, inertia: Matrix3<f64>, position: Vector3<f64>) -> Result<Self> {
        let mut q0 = DVector::zeros(NEWTON_EULER_NDOF_Q);
        q0[0] = position.x;
        q0[1] = position.y;
        q0[2] = position.z;
        q0[3] = 1.0; // identity quaternion (w component)
        Self::new(
            Dynamics::NewtonEuler(NewtonEulerBody::new(mass, inertia)),
            q0,
            DVector::zeros(NEWTON_EULER_NDOF_V),
        )
    }

    /// Replace the state-history buffer with one of the given depth.
    #[must_use]
    pub fn with_memory_depth(mut self, depth: usize) -> Self {
        self.memory = StateMemory::new(depth);
        self
    }

    /// The dynamics payload.
    #[must_use]
    pub fn dynamics(&self) -> &Dynamics {
        &self.dynamics
    }

    /// Mutable access to the dynamics payload.
    pub fn dynamics_mut(&mut self) -> &mut Dynamics {
        &mut self.dynamics
    }

    /// The payload discriminant.
    #[must_use]
    pub fn kind(&self) -> DynamicsKind {
        match &self.dynamics {
            Dynamics::LagrangianLinear(_) => DynamicsKind::LagrangianLinear,
            Dynamics::Lagrangian(_) => DynamicsKind::Lagrangian,
            Dynamics::NewtonEuler(_) => DynamicsKind::NewtonEuler,
        }
    }

    /// Whether mass and force Jacobians are constant over time, so the
    /// iteration matrix can be computed once and reused.
    #[must_use]
    pub fn is_linear_time_invariant(&self) -> bool {
        matches!(self.dynamics, Dynamics::LagrangianLinear(_))
    }

    /// Number of position coordinates.
    #[must_use]
    pub fn ndof_q(&self) -> usize {
        self.q.len()
    }

    /// Number of velocity degrees of freedom.
    #[must_use]
    pub fn ndof_v(&self) -> usize {
        self.v.len()
    }

    /// Generalized position.
    #[must_use]
    pub fn q(&self) -> &DVector<f64> {
        &self.q
    }

    /// Generalized velocity.
    #[must_use]
    pub fn v(&self) -> &DVector<f64> {
        &self.v
    }

    /// Overwrite the generalized position.
    pub fn set_q(&mut self, q: DVector<f64>) {
        debug_assert_eq!(q.len(), self.q.len());
        self.q = q;
    }

    /// Overwrite the generalized velocity.
    pub fn set_v(&mut self, v: DVector<f64>) {
        debug_assert_eq!(v.len(), self.v.len());
        self.v = v;
    }

    /// Impulse accumulator at the given level.
    #[must_use]
    pub fn impulse(&self, level: usize) -> &DVector<f64> {
        &self.p[level]
    }

    /// Mutable impulse accumulator at the given level.
    pub fn impulse_mut(&mut self, level: usize) -> &mut DVector<f64> {
        &mut self.p[level]
    }

    /// Reset all impulse accumulators to zero.
    pub fn clear_impulses(&mut self) {
        for p in &mut self.p {
            p.fill(0.0);
        }
    }

    /// The state-history buffer.
    #[must_use]
    pub fn memory(&self) -> &StateMemory {
        &self.memory
    }

    /// Commit the current `(q, v)` into the history buffer.
    pub fn commit_state(&mut self) {
        self.memory.push(self.q.clone(), self.v.clone());
    }

    /// State committed `steps_back` commits ago (0 = most recent).
    #[must_use]
    pub fn previous_state(&self, steps_back: usize) -> Option<(&DVector<f64>, &DVector<f64>)> {
        self.memory.get(steps_back)
    }

    /// The mass operator at the current state.
    #[must_use]
    pub fn mass_matrix(&self) -> DMatrix<f64> {
        match &self.dynamics {
            Dynamics::LagrangianLinear(payload) => payload.mass.clone(),
            Dynamics::Lagrangian(payload) => payload.mass.clone(),
            Dynamics::NewtonEuler(payload) => {
                let mut m = DMatrix::zeros(NEWTON_EULER_NDOF_V, NEWTON_EULER_NDOF_V);
                for i in 0..3 {
                    m[(i, i)] = payload.mass;
                }
                let inertia = payload.world_inertia(&self.orientation());
                m.view_mut((3, 3), (3, 3)).copy_from(&inertia);
                m
            }
        }
    }

    /// Total force at time `t` and the current state.
    #[must_use]
    pub fn force(&self, t: f64) -> DVector<f64> {
        self.force_at(t, &self.q, &self.v)
    }

    /// Total force at time `t` and an arbitrary state.
    ///
    /// Used by the scheme to evaluate the force at the previous step's
    /// committed state.
    #[must_use]
    pub fn force_at(&self, t: f64, q: &DVector<f64>, v: &DVector<f64>) -> DVector<f64> {
        match &self.dynamics {
            Dynamics::LagrangianLinear(payload) => {
                let mut f = payload.f_ext.clone();
                if let Some(k) = &payload.stiffness {
                    f -= k * q;
                }
                if let Some(c) = &payload.damping {
                    f -= c * v;
                }
                f
            }
            Dynamics::Lagrangian(payload) => payload.force.force(t, q, v),
            Dynamics::NewtonEuler(payload) => {
                let orientation = orientation_from_q(q);
                let inertia = payload.world_inertia(&orientation);
                let omega = Vector3::new(v[3], v[4], v[5]);
                let gyroscopic = omega.cross(&(inertia * omega));
                let mut f = DVector::zeros(NEWTON_EULER_NDOF_V);
                f.rows_mut(0, 3).copy_from(&payload.f_ext);
                f.rows_mut(3, 3).copy_from(&(payload.torque_ext - gyroscopic));
                f
            }
        }
    }

    /// Jacobian of the total force with respect to `q` (velocity-space
    /// square matrix; zero where the payload has no position coupling).
    #[must_use]
    pub fn force_jacobian_q(&self, t: f64) -> DMatrix<f64> {
        let n = self.ndof_v();
        match &self.dynamics {
            Dynamics::LagrangianLinear(payload) => payload
                .stiffness
                .as_ref()
                .map_or_else(|| DMatrix::zeros(n, n), |k| -k),
            Dynamics::Lagrangian(payload) => payload.force.jacobian_q(t, &self.q, &self.v),
            // Orientation dependence of the inertia is neglected in the
            // iteration matrix.
            Dynamics::NewtonEuler(_) => DMatrix::zeros(n, n),
        }
    }

    /// Jacobian of the total force with respect to `v`.
    #[must_use]
    pub fn force_jacobian_v(&self, t: f64) -> DMatrix<f64> {
        let n = self.ndof_v();
        match &self.dynamics {
            Dynamics::LagrangianLinear(payload) => payload
                .damping
                .as_ref()
                .map_or_else(|| DMatrix::zeros(n, n), |c| -c),
            Dynamics::Lagrangian(payload) => payload.force.jacobian_v(t, &self.q, &self.v),
            Dynamics::NewtonEuler(payload) => {
                let inertia = payload.world_inertia(&self.orientation());
                let omega = Vector3::new(self.v[3], self.v[4], self.v[5]);
                // d/dω [−ω×(Iω)] = skew(Iω) − skew(ω)·I
                let block = skew(&(inertia * omega)) - skew(&omega) * inertia;
                let mut j = DMatrix::zeros(n, n);
                j.view_mut((3, 3), (3, 3)).copy_from(&block);
                j
            }
        }
    }

    /// Set the external force (length `ndof_v`; Newton-Euler bodies take
    /// `[force; torque]`).
    ///
    /// # Errors
    ///
    /// Dimension mismatch, or a nonlinear Lagrangian payload whose forces
    /// are fully defined by its [`ForceLaw`].
    pub fn set_external_force(&mut self, f: DVector<f64>) -> Result<()> {
        if f.len() != self.ndof_v() {
            return Err(NsmError::DimensionMismatch {
                context: "external force",
                expected: self.ndof_v(),
                actual: f.len(),
            });
        }
        match &mut self.dynamics {
            Dynamics::LagrangianLinear(payload) => {
                payload.f_ext = f;
                Ok(())
            }
            Dynamics::Lagrangian(_) => Err(NsmError::invalid_config(
                "external force of a nonlinear Lagrangian body is part of its force law",
            )),
            Dynamics::NewtonEuler(payload) => {
                payload.f_ext = Vector3::new(f[0], f[1], f[2]);
                payload.torque_ext = Vector3::new(f[3], f[4], f[5]);
                Ok(())
            }
        }
    }

    /// World position of a Newton-Euler body (translation part of `q`).
    #[must_use]
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.q[0], self.q[1], self.q[2])
    }

    /// Orientation of a Newton-Euler body.
    ///
    /// For Lagrangian bodies this returns identity.
    #[must_use]
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        if self.kind() == DynamicsKind::NewtonEuler {
            orientation_from_q(&self.q)
        } else {
            UnitQuaternion::identity()
        }
    }

    /// Renormalize the orientation quaternion in place (Newton-Euler only;
    /// a no-op for Lagrangian bodies).
    pub fn normalize_orientation(&mut self) {
        if self.kind() != DynamicsKind::NewtonEuler {
            return;
        }
        let n = orientation_from_q(&self.q);
        self.q[3] = n.w;
        self.q[4] = n.i;
        self.q[5] = n.j;
        self.q[6] = n.k;
    }

    /// Advance the position with the θ-rule
    /// `q = q_old + h·(θ·v_new + (1−θ)·v_old)`.
    ///
    /// Newton-Euler bodies integrate the translation with the rule above,
    /// rotate the orientation by the θ-averaged angular velocity, and
    /// renormalize the quaternion.
    pub fn integrate_position(&mut self, h: f64, theta: f64, v_new: &DVector<f64>, v_old: &DVector<f64>) {
        match self.kind() {
            DynamicsKind::LagrangianLinear | DynamicsKind::Lagrangian => {
                let avg = v_new * theta + v_old * (1.0 - theta);
                self.q += avg * h;
            }
            DynamicsKind::NewtonEuler => {
                for i in 0..3 {
                    self.q[i] += h * (theta * v_new[i] + (1.0 - theta) * v_old[i]);
                }
                let omega = Vector3::new(
                    theta * v_new[3] + (1.0 - theta) * v_old[3],
                    theta * v_new[4] + (1.0 - theta) * v_old[4],
                    theta * v_new[5] + (1.0 - theta) * v_old[5],
                );
                let rotation = UnitQuaternion::from_scaled_axis(omega * h);
                let updated = rotation * self.orientation();
                self.q[3] = updated.w;
                self.q[4] = updated.i;
                self.q[5] = updated.j;
                self.q[6] = updated.k;
                self.normalize_orientation();
            }
        }
    }

    /// Kinetic energy `½·vᵀ·M·v`.
    #[must_use]
    pub fn kinetic_energy(&self) -> f64 {
        let mv = self.mass_matrix() * &self.v;
        0.5 * self.v.dot(&mv)
    }

    /// Check that the state contains no `NaN` or `Inf`.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.q.iter().all(|x| x.is_finite()) && self.v.iter().all(|x| x.is_finite())
    }
}

fn orientation_from_q(q: &DVector<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q[3], q[4], q[5], q[6]))
}
