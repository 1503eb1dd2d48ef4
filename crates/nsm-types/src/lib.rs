//! Core types for non-smooth mechanics simulation.
//!
//! This crate provides the foundational types shared by the whole
//! workspace:
//!
//! - [`DsId`] / [`InteractionId`] - stable handles into the simulation arenas
//! - [`SimulationConfig`] - timestep, integrator, and solver settings
//! - [`NsmError`] - the fatal error taxonomy
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They have no physics and no behavior
//! beyond validation. They are the common language between the dynamics
//! model, the interaction graph, the complementarity solver, and the
//! simulation driver.
//!
//! # Errors vs. statuses
//!
//! Only unrecoverable conditions live in [`NsmError`]: configuration and
//! dimension mismatches, a singular iteration matrix, dangling handles,
//! and divergence. Solver non-convergence is deliberately *not* an error;
//! the solver crate reports it as a status value so the caller can retry
//! with relaxed settings or a smaller timestep.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod config;
mod error;
mod id;

pub use config::{IntegratorConfig, LocalSolverKind, NsgsConfig, SimulationConfig};
pub use error::NsmError;
pub use id::{DsId, InteractionId};

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, NsmError>;

/// Index of the position level in per-level state (gaps, multipliers).
pub const POSITION_LEVEL: usize = 0;

/// Index of the velocity level in per-level state (gaps, multipliers).
///
/// The canonical time-stepping scheme formulates the complementarity
/// problem at this level and stores contact impulses here.
pub const VELOCITY_LEVEL: usize = 1;

/// Number of derivative levels carried by bodies and interactions.
pub const NUM_LEVELS: usize = 2;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_level_constants() {
        assert_eq!(POSITION_LEVEL, 0);
        assert_eq!(VELOCITY_LEVEL, 1);
        assert!(VELOCITY_LEVEL < NUM_LEVELS);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }
}
