//! Non-smooth laws: the complementarity rule attached to a relation.
//!
//! The law defines the admissible set of the multiplier and the local
//! relation between the constraint output and that multiplier. Impact
//! laws additionally correct the free output with a restitution term,
//! which is a method on the variant itself rather than an external
//! dispatch mechanism.

use nalgebra::DVector;

use nsm_types::{NsmError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Complementarity/impact rule of one interaction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NonSmoothLaw {
    /// Unilateral contact with Newton restitution:
    /// `0 <= u + e·u_prev  ⟂  λ >= 0` on the normal component.
    NewtonImpact {
        /// Coefficient of restitution `e` in `[0, 1]`.
        restitution: f64,
    },
    /// Unilateral contact with Newton restitution and Coulomb friction
    /// (constraint dimension 3: normal plus two tangents).
    NewtonImpactFriction {
        /// Coefficient of restitution `e` in `[0, 1]`.
        restitution: f64,
        /// Friction coefficient `μ >= 0`.
        friction: f64,
    },
    /// Bilateral (equality) constraint: `u = 0`, λ unconstrained.
    Equality,
    /// Mixed complementarity: the first `equality_dim` components are
    /// equalities, the remainder is unilateral.
    MixedComplementarity {
        /// Number of leading equality rows.
        equality_dim: usize,
    },
}

impl NonSmoothLaw {
    /// Restitution coefficient, when the law has one.
    #[must_use]
    pub fn restitution(&self) -> Option<f64> {
        match self {
            Self::NewtonImpact { restitution }
            | Self::NewtonImpactFriction { restitution, .. } => Some(*restitution),
            Self::Equality | Self::MixedComplementarity { .. } => None,
        }
    }

    /// Friction coefficient, when the law has one.
    #[must_use]
    pub fn friction(&self) -> Option<f64> {
        match self {
            Self::NewtonImpactFriction { friction, .. } => Some(*friction),
            _ => None,
        }
    }

    /// Check the law's parameters and its compatibility with a relation
    /// of the given dimension.
    ///
    /// # Errors
    ///
    /// Out-of-range coefficients and dimension mismatches are fatal
    /// configuration errors.
    pub fn validate(&self, relation_dim: usize) -> Result<()> {
        match self {
            Self::NewtonImpact { restitution } => {
                if !(0.0..=1.0).contains(restitution) {
                    return Err(NsmError::invalid_config("restitution must be in [0, 1]"));
                }
                Ok(())
            }
            Self::NewtonImpactFriction {
                restitution,
                friction,
            } => {
                if !(0.0..=1.0).contains(restitution) {
                    return Err(NsmError::invalid_config("restitution must be in [0, 1]"));
                }
                if *friction < 0.0 || !friction.is_finite() {
                    return Err(NsmError::invalid_config("friction must be non-negative"));
                }
                if relation_dim != 3 {
                    return Err(NsmError::DimensionMismatch {
                        context: "friction law relation",
                        expected: 3,
                        actual: relation_dim,
                    });
                }
                Ok(())
            }
            Self::Equality => Ok(()),
            Self::MixedComplementarity { equality_dim } => {
                if *equality_dim > relation_dim {
                    return Err(NsmError::DimensionMismatch {
                        context: "mixed law equality rows",
                        expected: relation_dim,
                        actual: *equality_dim,
                    });
                }
                Ok(())
            }
        }
    }

    /// Apply the law's correction to the free constraint output.
    ///
    /// Impact laws add `e·u_prev` on the normal component, where `u_prev`
    /// is the velocity-level output at the beginning of the step. Other
    /// laws leave the free output unchanged.
    pub fn apply_correction(&self, y_free: &mut DVector<f64>, y_prev: &DVector<f64>) {
        match self {
            Self::NewtonImpact { restitution }
            | Self::NewtonImpactFriction { restitution, .. } => {
                if !y_free.is_empty() && !y_prev.is_empty() {
                    y_free[0] += restitution * y_prev[0];
                }
            }
            Self::Equality | Self::MixedComplementarity { .. } => {}
        }
    }
}
