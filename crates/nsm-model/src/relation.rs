//! Constraint relations: the map from body state to the constraint gap.
//!
//! A relation knows three things about its constraint:
//!
//! - the gap `y` as a function of the connected bodies' positions,
//! - the Jacobian `C` mapping body velocity space to constraint space,
//! - how to scatter a multiplier back into body impulses (`p += Cᵀ·λ`).
//!
//! Two variants cover the supported body kinds: a linear map for
//! Lagrangian coordinates (`y = C·q + b`) and a contact frame for
//! Newton-Euler rigid bodies (normal plus optional tangent rows built
//! from the contact geometry).

use nalgebra::{DMatrix, DVector, Vector3};

use nsm_types::{NsmError, Result};

use crate::system::{DynamicalSystem, DynamicsKind, NEWTON_EULER_NDOF_V};

/// Linear constraint map over Lagrangian coordinates:
/// `y = C_first·q_first [+ C_second·q_second] + offset`.
#[derive(Debug, Clone)]
pub struct LinearMap {
    c_first: DMatrix<f64>,
    c_second: Option<DMatrix<f64>>,
    offset: DVector<f64>,
}

impl LinearMap {
    /// Create a single-body linear map.
    ///
    /// # Errors
    ///
    /// Row count of `c` must match the offset length.
    pub fn new(c: DMatrix<f64>, offset: DVector<f64>) -> Result<Self> {
        if c.nrows() != offset.len() {
            return Err(NsmError::DimensionMismatch {
                context: "linear map offset",
                expected: c.nrows(),
                actual: offset.len(),
            });
        }
        Ok(Self {
            c_first: c,
            c_second: None,
            offset,
        })
    }

    /// Attach the Jacobian block of a second body.
    ///
    /// # Errors
    ///
    /// The block must have the same row count as the first block.
    pub fn with_second(mut self, c: DMatrix<f64>) -> Result<Self> {
        if c.nrows() != self.c_first.nrows() {
            return Err(NsmError::DimensionMismatch {
                context: "linear map second block",
                expected: self.c_first.nrows(),
                actual: c.nrows(),
            });
        }
        self.c_second = Some(c);
        Ok(self)
    }
}

/// Anchor of the second side of a contact: either a point on a second
/// body (in its frame) or a fixed world point (environment contact).
#[derive(Debug, Clone, Copy)]
enum ContactAnchor {
    Body(Vector3<f64>),
    World(Vector3<f64>),
}

/// Contact geometry between Newton-Euler bodies.
///
/// The normal points from the second side toward the first body. The
/// tangent basis is built once at creation; constraint dimension is 1
/// (normal only) or 3 (normal plus two tangents).
#[derive(Debug, Clone)]
pub struct ContactFrame {
    normal: Vector3<f64>,
    tangent1: Vector3<f64>,
    tangent2: Vector3<f64>,
    arm_first: Vector3<f64>,
    anchor_second: ContactAnchor,
    dim: usize,
}

/// Two unit vectors completing `normal` into an orthonormal frame.
///
/// `normal` must already be normalized.
#[must_use]
pub fn tangent_basis(normal: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let reference = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let t1 = normal.cross(&reference).normalize();
    let t2 = normal.cross(&t1).normalize();
    (t1, t2)
}

impl ContactFrame {
    /// Build a contact frame from world-space geometry.
    ///
    /// `point_first`/`point_second` are the surface points in world
    /// coordinates; they are converted to body-local arms so the gap
    /// tracks the bodies as they move.
    ///
    /// # Errors
    ///
    /// `dim` must be 1 or 3, the normal must be nonzero, and the first
    /// side (and the second, when present) must be Newton-Euler bodies.
    pub fn new(
        normal: Vector3<f64>,
        point_first: Vector3<f64>,
        point_second: Vector3<f64>,
        first: &DynamicalSystem,
        second: Option<&DynamicalSystem>,
        dim: usize,
    ) -> Result<Self> {
        if dim != 1 && dim != 3 {
            return Err(NsmError::DimensionMismatch {
                context: "contact frame dimension",
                expected: 3,
                actual: dim,
            });
        }
        let norm = normal.norm();
        if norm <= f64::EPSILON {
            return Err(NsmError::invalid_config("contact normal must be nonzero"));
        }
        if first.kind() != DynamicsKind::NewtonEuler {
            return Err(NsmError::invalid_config(
                "contact frames require newton-euler bodies",
            ));
        }
        let normal = normal / norm;
        let (tangent1, tangent2) = tangent_basis(&normal);

        let arm_first = first
            .orientation()
            .inverse_transform_vector(&(point_first - first.position()));

        let anchor_second = match second {
            Some(body) => {
                if body.kind() != DynamicsKind::NewtonEuler {
                    return Err(NsmError::invalid_config(
                        "contact frames require newton-euler bodies",
                    ));
                }
                ContactAnchor::Body(
                    body.orientation()
                        .inverse_transform_vector(&(point_second - body.position())),
                )
            }
            None => ContactAnchor::World(point_second),
        };

        Ok(Self {
            normal,
            tangent1,
            tangent2,
            arm_first,
            anchor_second,
            dim,
        })
    }

    /// The unit contact normal.
    #[must_use]
    pub fn normal(&self) -> Vector3<f64> {
        self.normal
    }

    fn world_arm_first(&self, first: &DynamicalSystem) -> Vector3<f64> {
        first.orientation() * self.arm_first
    }

    fn world_point_second(&self, second: Option<&DynamicalSystem>) -> Vector3<f64> {
        match (&self.anchor_second, second) {
            (ContactAnchor::Body(arm), Some(body)) => body.position() + body.orientation() * arm,
            (ContactAnchor::World(point), _) => *point,
            // Ruled out by validate(); treat the arm as a world point
            // rather than panic.
            (ContactAnchor::Body(arm), None) => *arm,
        }
    }

    fn rows(&self) -> [Vector3<f64>; 3] {
        [self.normal, self.tangent1, self.tangent2]
    }

    fn jacobian_for(&self, arm_world: &Vector3<f64>, sign: f64) -> DMatrix<f64> {
        let mut j = DMatrix::zeros(self.dim, NEWTON_EULER_NDOF_V);
        for (row, axis) in self.rows().iter().take(self.dim).enumerate() {
            let torque = arm_world.cross(axis);
            for k in 0..3 {
                j[(row, k)] = sign * axis[k];
                j[(row, 3 + k)] = sign * torque[k];
            }
        }
        j
    }
}

/// Constraint relation between one or two bodies.
#[derive(Debug, Clone)]
pub enum Relation {
    /// Linear map over Lagrangian coordinates.
    LagrangianLinear(LinearMap),
    /// Contact frame over Newton-Euler bodies.
    NewtonEulerContact(ContactFrame),
}

impl Relation {
    /// Constraint dimension `m`.
    #[must_use]
    pub fn dim(&self) -> usize {
        match self {
            Self::LagrangianLinear(map) => map.c_first.nrows(),
            Self::NewtonEulerContact(frame) => frame.dim,
        }
    }

    /// Whether the relation couples two bodies.
    #[must_use]
    pub fn is_two_body(&self) -> bool {
        match self {
            Self::LagrangianLinear(map) => map.c_second.is_some(),
            Self::NewtonEulerContact(frame) => {
                matches!(frame.anchor_second, ContactAnchor::Body(_))
            }
        }
    }

    /// Check the relation against the bodies it will connect.
    ///
    /// # Errors
    ///
    /// Jacobian blocks whose column count differs from the body's
    /// velocity dimension are a fatal configuration error, as is a
    /// two-body relation wired to a single body.
    pub fn validate(
        &self,
        first: &DynamicalSystem,
        second: Option<&DynamicalSystem>,
    ) -> Result<()> {
        if self.is_two_body() && second.is_none() {
            return Err(NsmError::invalid_config(
                "two-body relation attached to a single body",
            ));
        }
        match self {
            Self::LagrangianLinear(map) => {
                if map.c_first.ncols() != first.ndof_v() {
                    return Err(NsmError::DimensionMismatch {
                        context: "relation jacobian (first body)",
                        expected: first.ndof_v(),
                        actual: map.c_first.ncols(),
                    });
                }
                if first.ndof_q() != first.ndof_v() {
                    return Err(NsmError::invalid_config(
                        "linear maps require lagrangian coordinates",
                    ));
                }
                if let (Some(c), Some(body)) = (&map.c_second, second) {
                    if c.ncols() != body.ndof_v() {
                        return Err(NsmError::DimensionMismatch {
                            context: "relation jacobian (second body)",
                            expected: body.ndof_v(),
                            actual: c.ncols(),
                        });
                    }
                }
                Ok(())
            }
            Self::NewtonEulerContact(_) => {
                if first.kind() != DynamicsKind::NewtonEuler {
                    return Err(NsmError::invalid_config(
                        "contact frames require newton-euler bodies",
                    ));
                }
                if let Some(body) = second {
                    if body.kind() != DynamicsKind::NewtonEuler {
                        return Err(NsmError::invalid_config(
                            "contact frames require newton-euler bodies",
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Position-level gap `y`.
    ///
    /// For contact frames only the normal component carries the signed
    /// distance; tangential components are zero.
    #[must_use]
    pub fn gap(&self, first: &DynamicalSystem, second: Option<&DynamicalSystem>) -> DVector<f64> {
        match self {
            Self::LagrangianLinear(map) => {
                let mut y = &map.c_first * first.q() + &map.offset;
                if let (Some(c), Some(body)) = (&map.c_second, second) {
                    y += c * body.q();
                }
                y
            }
            Self::NewtonEulerContact(frame) => {
                let p_first = first.position() + frame.world_arm_first(first);
                let p_second = frame.world_point_second(second);
                let mut y = DVector::zeros(frame.dim);
                y[0] = frame.normal.dot(&(p_first - p_second));
                y
            }
        }
    }

    /// Jacobian block of the first body (dimension `m × ndof_v`).
    #[must_use]
    pub fn jacobian_first(&self, first: &DynamicalSystem) -> DMatrix<f64> {
        match self {
            Self::LagrangianLinear(map) => map.c_first.clone(),
            Self::NewtonEulerContact(frame) => {
                frame.jacobian_for(&frame.world_arm_first(first), 1.0)
            }
        }
    }

    /// Jacobian block of the second body, when present.
    #[must_use]
    pub fn jacobian_second(&self, second: Option<&DynamicalSystem>) -> Option<DMatrix<f64>> {
        match self {
            Self::LagrangianLinear(map) => map.c_second.clone(),
            Self::NewtonEulerContact(frame) => match (&frame.anchor_second, second) {
                (ContactAnchor::Body(arm), Some(body)) => {
                    let arm_world = body.orientation() * arm;
                    Some(frame.jacobian_for(&arm_world, -1.0))
                }
                _ => None,
            },
        }
    }

    /// Constraint-space image of the given body velocities:
    /// `C_first·v_first [+ C_second·v_second]`.
    #[must_use]
    pub fn output_from_velocities(
        &self,
        first: &DynamicalSystem,
        v_first: &DVector<f64>,
        second: Option<&DynamicalSystem>,
        v_second: Option<&DVector<f64>>,
    ) -> DVector<f64> {
        let mut out = self.jacobian_first(first) * v_first;
        if let (Some(j), Some(v)) = (self.jacobian_second(second), v_second) {
            out += j * v;
        }
        out
    }

    /// Velocity-level output using the bodies' current velocities.
    #[must_use]
    pub fn output_velocity(
        &self,
        first: &DynamicalSystem,
        second: Option<&DynamicalSystem>,
    ) -> DVector<f64> {
        self.output_from_velocities(first, first.v(), second, second.map(DynamicalSystem::v))
    }

    /// Scatter a multiplier into the bodies' impulse accumulators:
    /// `p[level] += Cᵀ·λ`.
    pub fn apply_input(
        &self,
        lambda: &DVector<f64>,
        level: usize,
        first: &mut DynamicalSystem,
        second: Option<&mut DynamicalSystem>,
    ) {
        let jt_lambda = self.jacobian_first(first).transpose() * lambda;
        *first.impulse_mut(level) += jt_lambda;

        if let Some(body) = second {
            if let Some(j) = self.jacobian_second(Some(body)) {
                let jt_lambda = j.transpose() * lambda;
                *body.impulse_mut(level) += jt_lambda;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;
    use nsm_types::VELOCITY_LEVEL;

    fn point_mass(z: f64, vz: f64) -> DynamicalSystem {
        DynamicalSystem::lagrangian_linear(
            DMatrix::identity(1, 1),
            DVector::from_element(1, z),
            DVector::from_element(1, vz),
        )
        .unwrap()
    }

    fn rigid_ball(z: f64) -> DynamicalSystem {
        DynamicalSystem::newton_euler(1.0, Matrix3::identity(), Vector3::new(0.0, 0.0, z)).unwrap()
    }

    #[test]
    fn test_linear_map_gap_and_output() {
        let relation = Relation::LagrangianLinear(
            LinearMap::new(DMatrix::identity(1, 1), DVector::zeros(1)).unwrap(),
        );
        let ds = point_mass(0.25, -2.0);

        assert_eq!(relation.dim(), 1);
        assert!(relation.validate(&ds, None).is_ok());
        assert_relative_eq!(relation.gap(&ds, None)[0], 0.25, epsilon = 1e-12);
        assert_relative_eq!(relation.output_velocity(&ds, None)[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_map_two_body_relative_gap() {
        // y = q_a − q_b: separation between two 1-dof masses.
        let relation = Relation::LagrangianLinear(
            LinearMap::new(DMatrix::identity(1, 1), DVector::zeros(1))
                .unwrap()
                .with_second(DMatrix::from_element(1, 1, -1.0))
                .unwrap(),
        );
        let a = point_mass(2.0, 1.0);
        let b = point_mass(0.5, -1.0);

        assert!(relation.is_two_body());
        assert_relative_eq!(relation.gap(&a, Some(&b))[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(
            relation.output_velocity(&a, Some(&b))[0],
            2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_linear_map_dimension_check() {
        let relation = Relation::LagrangianLinear(
            LinearMap::new(DMatrix::identity(1, 1), DVector::zeros(1)).unwrap(),
        );
        let wide = DynamicalSystem::lagrangian_linear(
            DMatrix::identity(2, 2),
            DVector::zeros(2),
            DVector::zeros(2),
        )
        .unwrap();
        assert!(relation.validate(&wide, None).is_err());
    }

    #[test]
    fn test_contact_frame_gap_tracks_body() {
        let ball = rigid_ball(0.5);
        // Plane z = 0, ball surface point at its south pole.
        let frame = ContactFrame::new(
            Vector3::z(),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 0.0),
            &ball,
            None,
            1,
        )
        .unwrap();
        let relation = Relation::NewtonEulerContact(frame);

        // Surface point stored at world origin while the body sits at
        // z = 0.5: arm = (0,0,-0.5), so the gap is zero at creation.
        assert_relative_eq!(relation.gap(&ball, None)[0], 0.0, epsilon = 1e-12);

        let mut lifted = rigid_ball(0.8);
        lifted.normalize_orientation();
        assert_relative_eq!(relation.gap(&lifted, None)[0], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_contact_frame_jacobian_rows() {
        let ball = rigid_ball(1.0);
        let frame = ContactFrame::new(
            Vector3::z(),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 0.0),
            &ball,
            None,
            3,
        )
        .unwrap();
        let relation = Relation::NewtonEulerContact(frame);

        let j = relation.jacobian_first(&ball);
        assert_eq!(j.nrows(), 3);
        assert_eq!(j.ncols(), 6);
        // Normal row: linear part is the normal itself.
        assert_relative_eq!(j[(0, 2)], 1.0, epsilon = 1e-12);
        // Tangent rows are orthogonal to the normal.
        assert_relative_eq!(j[(1, 2)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(j[(2, 2)], 0.0, epsilon = 1e-12);
        // Arm (0,0,-1) × z = tangential torque coupling present.
        let torque_norm = (j[(1, 3)].powi(2) + j[(1, 4)].powi(2) + j[(1, 5)].powi(2)).sqrt();
        assert!(torque_norm > 1e-6);
    }

    #[test]
    fn test_apply_input_scatters_transpose() {
        let relation = Relation::LagrangianLinear(
            LinearMap::new(DMatrix::from_element(1, 1, 2.0), DVector::zeros(1)).unwrap(),
        );
        let mut ds = point_mass(0.0, 0.0);
        let lambda = DVector::from_element(1, 3.0);

        relation.apply_input(&lambda, VELOCITY_LEVEL, &mut ds, None);
        assert_relative_eq!(ds.impulse(VELOCITY_LEVEL)[0], 6.0, epsilon = 1e-12);
    }
}
