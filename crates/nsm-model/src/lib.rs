//! Dynamics model for non-smooth mechanical simulation.
//!
//! This crate provides the entities the time-stepping scheme operates on:
//!
//! - [`DynamicalSystem`] - per-body state with a tagged-union dynamics
//!   payload (Lagrangian linear time-invariant, Lagrangian with a
//!   [`ForceLaw`], Newton-Euler rigid body)
//! - [`IterationMatrix`] - the per-body matrix `W` with its lazy LU
//!   factorization
//! - [`Relation`] - the constraint map from body state to the gap `y`,
//!   its Jacobian, and the scatter of multipliers back into body impulses
//! - [`NonSmoothLaw`] - the complementarity/impact rule attached to a
//!   relation (restitution, friction, equality, mixed)
//! - [`Interaction`] - one constraint instance with per-level outputs,
//!   multipliers, and its activation state
//!
//! # Dispatch
//!
//! Body, relation, and law kinds are closed enums with exhaustive
//! matching. The only open seam is [`ForceLaw`], a trait for user-supplied
//! nonlinear force models.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]

mod interaction;
mod iteration_matrix;
mod law;
mod memory;
mod relation;
mod system;

pub use interaction::{ActivationState, Interaction};
pub use iteration_matrix::{IterationMatrix, WStore};
pub use law::NonSmoothLaw;
pub use memory::StateMemory;
pub use relation::{tangent_basis, ContactFrame, LinearMap, Relation};
pub use system::{
    Dynamics, DynamicsKind, DynamicalSystem, ForceLaw, LagrangianLinear, LagrangianNonlinear,
    NewtonEulerBody,
};
