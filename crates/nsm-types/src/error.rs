//! Error types for simulation operations.
//!
//! Everything here is fatal for the current step: these variants signal a
//! setup defect or a numerical breakdown that must not be papered over.
//! Solver non-convergence is a recoverable status reported by the solver
//! crate, not an error.

use thiserror::Error;

use crate::{DsId, InteractionId};

/// Errors that can occur during simulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NsmError {
    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Operator dimensions do not match the connected bodies.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Where the mismatch was detected.
        context: &'static str,
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// The iteration matrix of a body could not be factorized.
    #[error("singular iteration matrix for body {body}")]
    SingularIterationMatrix {
        /// The body whose matrix failed to factorize.
        body: DsId,
    },

    /// A local equality sub-solve hit a singular block.
    #[error("singular constraint block for interaction {interaction}")]
    SingularConstraintBlock {
        /// The interaction whose block is singular.
        interaction: InteractionId,
    },

    /// Dangling body handle.
    #[error("unknown body: {0}")]
    UnknownBody(DsId),

    /// Dangling interaction handle.
    #[error("unknown interaction: {0}")]
    UnknownInteraction(InteractionId),

    /// A contact event referenced a body whose generalized coordinates
    /// cannot carry a point-contact relation.
    #[error("unsupported contact geometry for body {body}")]
    UnsupportedContactGeometry {
        /// The offending body.
        body: DsId,
    },

    /// Simulation diverged (`NaN` or `Inf` detected).
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },

    /// A phase was invoked before its precondition phase ran.
    #[error("{what} used before initialization")]
    NotInitialized {
        /// The component that was used too early.
        what: &'static str,
    },
}

impl NsmError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// Check if this is a divergence error.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::InvalidTimestep(_)
                | Self::DimensionMismatch { .. }
        )
    }
}
