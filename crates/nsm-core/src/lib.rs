//! Non-smooth mechanics simulation engine.
//!
//! This crate ties the workspace together into a runnable simulation:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Stepper                              │
//! │  free state → activation → assembly → solve → update       │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         World                               │
//! │  body/interaction arenas, contact bookkeeping, the graph    │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MoreauJean                            │
//! │  iteration matrices, free velocities, activation test       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # One step
//!
//! Within a step the phase order is strict: iteration matrices →
//! free state → activation update → graph rebuild → block assembly →
//! Gauss-Seidel solve → multiplier scatter → state update → memory
//! commit. No phase may be reordered without breaking a data dependency
//! of a later one.
//!
//! # Quick start
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use nsm_core::{Stepper, World};
//! use nsm_model::{DynamicalSystem, LinearMap, NonSmoothLaw, Relation};
//! use nsm_types::SimulationConfig;
//!
//! // A unit point mass 1 m above the ground, pulled down by gravity.
//! let mut world = World::new(SimulationConfig::default());
//! let mut ball = DynamicalSystem::lagrangian_linear(
//!     DMatrix::identity(1, 1),
//!     DVector::from_element(1, 1.0),
//!     DVector::zeros(1),
//! )
//! .unwrap();
//! ball.set_external_force(DVector::from_element(1, -9.81)).unwrap();
//! let ball = world.add_body(ball);
//!
//! // Ground contact: gap equals the height coordinate.
//! let relation = Relation::LagrangianLinear(
//!     LinearMap::new(DMatrix::identity(1, 1), DVector::zeros(1)).unwrap(),
//! );
//! world
//!     .add_interaction(ball, None, relation, NonSmoothLaw::NewtonImpact { restitution: 0.5 })
//!     .unwrap();
//!
//! let mut stepper = Stepper::new(world.config());
//! for _ in 0..100 {
//!     stepper.step(&mut world).unwrap();
//! }
//! assert!(world.body(ball).unwrap().q()[0] > -1e-6);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]

mod integrator;
mod stepper;
mod world;

pub use integrator::MoreauJean;
pub use stepper::{StepResult, Stepper};
pub use world::{ContactEvent, ContactKey, World};
