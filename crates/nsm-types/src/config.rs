//! Configuration types for the time-stepping scheme and the solver.
//!
//! All tunables are carried explicitly in these structs and threaded
//! through calls; there are no global flags.

use crate::{NsmError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Main configuration for a simulation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    /// Fixed timestep for the scheme (seconds).
    pub timestep: f64,
    /// One-step integrator parameters.
    pub integrator: IntegratorConfig,
    /// Non-smooth Gauss-Seidel solver parameters.
    pub solver: NsgsConfig,
    /// Depth of the per-body state history ring buffer (>= 1).
    pub memory_depth: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: 1.0 / 1000.0,
            integrator: IntegratorConfig::default(),
            solver: NsgsConfig::default(),
            memory_depth: 1,
        }
    }
}

impl SimulationConfig {
    /// Create a configuration with the given timestep.
    #[must_use]
    pub fn with_timestep(timestep: f64) -> Self {
        Self {
            timestep,
            ..Default::default()
        }
    }

    /// Configuration for high-accuracy runs: tight solver tolerance and a
    /// small timestep.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            timestep: 1.0 / 10_000.0,
            solver: NsgsConfig::high_accuracy(),
            ..Default::default()
        }
    }

    /// Configuration for interactive use: coarser timestep, bounded
    /// solver effort.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            timestep: 1.0 / 240.0,
            solver: NsgsConfig::realtime(),
            ..Default::default()
        }
    }

    /// Set the integrator configuration.
    #[must_use]
    pub fn integrator(mut self, integrator: IntegratorConfig) -> Self {
        self.integrator = integrator;
        self
    }

    /// Set the solver configuration.
    #[must_use]
    pub fn solver(mut self, solver: NsgsConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Set the state history depth.
    #[must_use]
    pub fn memory_depth(mut self, depth: usize) -> Self {
        self.memory_depth = depth;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(NsmError::InvalidTimestep(self.timestep));
        }
        if self.memory_depth == 0 {
            return Err(NsmError::invalid_config("memory_depth must be >= 1"));
        }
        self.integrator.validate()?;
        self.solver.validate()?;
        Ok(())
    }

    /// Get the step frequency in Hz.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        1.0 / self.timestep
    }
}

/// Parameters of the one-step θ-scheme integrator.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntegratorConfig {
    /// Implicitness parameter θ in `[0, 1]`.
    ///
    /// 0.5 is the trapezoidal rule; 1.0 is fully implicit.
    pub theta: f64,

    /// Activation weighting γ in `[0, 1]` used in the predicted-gap test
    /// `y + γ·h·ẏ <= 0`.
    ///
    /// The test is one-sided and carries no hysteresis: a contact whose
    /// predicted gap hovers around zero may alternate between active and
    /// inactive on consecutive steps.
    pub gamma: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            theta: 0.5,
            gamma: 0.5,
        }
    }
}

impl IntegratorConfig {
    /// Create an integrator configuration with the given θ and γ.
    #[must_use]
    pub const fn new(theta: f64, gamma: f64) -> Self {
        Self { theta, gamma }
    }

    /// Fully implicit variant (θ = 1).
    #[must_use]
    pub fn fully_implicit() -> Self {
        Self {
            theta: 1.0,
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.theta) || !self.theta.is_finite() {
            return Err(NsmError::invalid_config("theta must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.gamma) || !self.gamma.is_finite() {
            return Err(NsmError::invalid_config("gamma must be in [0, 1]"));
        }
        Ok(())
    }
}

/// Strategy used to solve each single-contact local problem inside the
/// Gauss-Seidel sweep.
///
/// The outer loop and the graph assembly are identical for all strategies;
/// only the per-interaction solve varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LocalSolverKind {
    /// Direct projection onto the admissible set (cone or half-line).
    #[default]
    Projection,
    /// Proximal-point variant: projection against a regularized diagonal.
    ///
    /// More robust on ill-conditioned blocks at the cost of slower
    /// convergence.
    Proximal,
}

/// Configuration for the non-smooth Gauss-Seidel solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NsgsConfig {
    /// Convergence tolerance on the accumulated, normalized multiplier
    /// change per sweep.
    pub tolerance: f64,

    /// Maximum number of Gauss-Seidel sweeps.
    pub max_iterations: usize,

    /// Relaxation factor ω in `(0, 2)` applied to each local update.
    ///
    /// 1.0 is plain Gauss-Seidel; values above 1 over-relax.
    pub relaxation: f64,

    /// Local single-contact solver strategy.
    pub local_solver: LocalSolverKind,

    /// Regularization added to local diagonals by the proximal strategy.
    pub proximal_regularization: f64,

    /// Warm-start multipliers from the previous step.
    pub warm_start: bool,

    /// Scale applied to warm-started multipliers (0-1).
    pub warm_start_factor: f64,

    /// Record the per-sweep error history in the solver result.
    pub track_history: bool,
}

impl Default for NsgsConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 100,
            relaxation: 1.0,
            local_solver: LocalSolverKind::Projection,
            proximal_regularization: 1e-8,
            warm_start: true,
            warm_start_factor: 1.0,
            track_history: false,
        }
    }
}

impl NsgsConfig {
    /// High-accuracy configuration.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 500,
            ..Default::default()
        }
    }

    /// Bounded-effort configuration for interactive use.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 25,
            relaxation: 1.2,
            ..Default::default()
        }
    }

    /// Set the tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the iteration budget.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the local solver strategy.
    #[must_use]
    pub fn with_local_solver(mut self, kind: LocalSolverKind) -> Self {
        self.local_solver = kind;
        self
    }

    /// Enable or disable warm starting.
    #[must_use]
    pub fn with_warm_start(mut self, enabled: bool) -> Self {
        self.warm_start = enabled;
        self
    }

    /// Enable per-sweep error history.
    #[must_use]
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.track_history = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(NsmError::invalid_config("tolerance must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(NsmError::invalid_config("max_iterations must be >= 1"));
        }
        if self.relaxation <= 0.0 || self.relaxation >= 2.0 {
            return Err(NsmError::invalid_config("relaxation must be in (0, 2)"));
        }
        if !(0.0..=1.0).contains(&self.warm_start_factor) {
            return Err(NsmError::invalid_config(
                "warm_start_factor must be in [0, 1]",
            ));
        }
        if self.proximal_regularization < 0.0 {
            return Err(NsmError::invalid_config(
                "proximal_regularization cannot be negative",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(SimulationConfig::default().validate().is_ok());
        assert!(SimulationConfig::high_accuracy().validate().is_ok());
        assert!(SimulationConfig::realtime().validate().is_ok());
    }

    #[test]
    fn test_timestep_validation() {
        let config = SimulationConfig::with_timestep(0.0);
        assert!(matches!(
            config.validate(),
            Err(NsmError::InvalidTimestep(_))
        ));

        let config = SimulationConfig::with_timestep(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_theta_gamma_bounds() {
        let mut config = IntegratorConfig::default();
        assert!(config.validate().is_ok());

        config.theta = 1.5;
        assert!(config.validate().is_err());

        config.theta = 1.0;
        config.gamma = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_solver_validation() {
        let mut config = NsgsConfig::default();
        assert!(config.validate().is_ok());

        config.relaxation = 2.0;
        assert!(config.validate().is_err());

        config.relaxation = 1.0;
        config.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = NsgsConfig::default()
            .with_tolerance(1e-10)
            .with_max_iterations(42)
            .with_local_solver(LocalSolverKind::Proximal)
            .with_warm_start(false);

        assert_eq!(config.tolerance, 1e-10);
        assert_eq!(config.max_iterations, 42);
        assert_eq!(config.local_solver, LocalSolverKind::Proximal);
        assert!(!config.warm_start);
    }
}
