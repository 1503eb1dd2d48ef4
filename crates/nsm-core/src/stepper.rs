//! The simulation driver: one strict phase order per step.

use nalgebra::DVector;
use tracing::{debug, warn};

use nsm_solver::{Nsgs, NsgsResult, NsProblem};
use nsm_types::{NsmError, Result, SimulationConfig, VELOCITY_LEVEL};

use crate::integrator::MoreauJean;
use crate::world::World;

/// Diagnostics of one completed step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Simulation time at the end of the step.
    pub time: f64,
    /// Maximum free-residual norm over all bodies (diagnostic).
    pub residual: f64,
    /// Number of interactions in the active index set.
    pub active_interactions: usize,
    /// Solver outcome; `None` when no interaction was active.
    pub solver: Option<NsgsResult>,
}

impl StepResult {
    /// Whether the non-smooth solve (if any) converged.
    #[must_use]
    pub fn solver_converged(&self) -> bool {
        self.solver.as_ref().is_none_or(NsgsResult::converged)
    }
}

/// Orchestrates one time step:
///
/// 1. iteration matrices (recomputed for non-LTI bodies),
/// 2. free state (contact-free predictor),
/// 3. activation update (predicted-gap test),
/// 4. graph rebuild on topology change,
/// 5. block assembly,
/// 6. Gauss-Seidel solve,
/// 7. multiplier scatter,
/// 8. state update and memory commit.
///
/// A convergence failure of the solver is reported in the result; fatal
/// errors (singular matrices, dangling handles, divergence) abort the
/// step with the failing component identifiable from the error variant.
#[derive(Debug)]
pub struct Stepper {
    integrator: MoreauJean,
    problem: NsProblem,
    solver: Nsgs,
    warm_start_factor: Option<f64>,
}

impl Stepper {
    /// Create a stepper from a simulation configuration.
    #[must_use]
    pub fn new(config: &SimulationConfig) -> Self {
        let warm_start_factor = config
            .solver
            .warm_start
            .then_some(config.solver.warm_start_factor);
        Self {
            integrator: MoreauJean::new(config.integrator),
            problem: NsProblem::new(),
            solver: Nsgs::new(config.solver.clone()),
            warm_start_factor,
        }
    }

    /// The integrator (iteration matrices, free velocities).
    #[must_use]
    pub fn integrator(&self) -> &MoreauJean {
        &self.integrator
    }

    /// Execute one time step.
    ///
    /// # Errors
    ///
    /// Fatal configuration or numerical errors abort the step; solver
    /// non-convergence does not.
    pub fn step(&mut self, world: &mut World) -> Result<StepResult> {
        let h = world.config().timestep;
        if !h.is_finite() || h <= 0.0 {
            return Err(NsmError::InvalidTimestep(h));
        }
        let t_end = world.time() + h;

        // Iteration matrices: once for linear time-invariant bodies,
        // every step otherwise.
        let mut all_lti = true;
        for (id, body) in world.bodies().iter() {
            all_lti &= body.is_linear_time_invariant();
            if !body.is_linear_time_invariant() || !self.integrator.has_w(id) {
                self.integrator.compute_w(id, body, t_end, h)?;
            }
        }

        // Fresh impulse accumulators and constraint outputs.
        for (_, body) in world.bodies_mut().iter_mut() {
            body.clear_impulses();
        }
        world.refresh_interaction_outputs()?;

        let residual = self.integrator.compute_residu(world.bodies(), t_end, h);
        self.integrator.compute_free_state(world.bodies(), t_end, h)?;

        // Activation state machine; any transition changes the topology.
        let mut topology_changed = false;
        for (_, interaction) in world.interactions_mut().iter_mut() {
            topology_changed |= self.integrator.update_activation(interaction, h);
        }
        if topology_changed {
            world.mark_topology_dirty();
        }
        let rebuilt = world.rebuild_graph_if_dirty();
        if rebuilt || !all_lti {
            self.problem.mark_stale();
        }

        let active_interactions = world.graph().vertex_count();
        let solver_result = if active_interactions == 0 {
            None
        } else {
            // Free outputs in graph visitation order.
            let mut free_outputs: Vec<DVector<f64>> =
                Vec::with_capacity(world.graph().vertex_count());
            for vertex in world.graph().vertices() {
                let interaction = world
                    .interactions()
                    .get(vertex.interaction)
                    .ok_or(NsmError::UnknownInteraction(vertex.interaction))?;
                free_outputs.push(
                    self.integrator
                        .compute_free_output(interaction, world.bodies())?,
                );
            }

            // Assembly; blocks are reused only when every iteration
            // matrix is constant. After a rebuild the carried-over
            // diagonal blocks stay valid; edge blocks are recomputed.
            let reuse = all_lti;
            {
                let (graph, interactions, bodies) = world.assembly_parts();
                self.problem.update_blocks(
                    graph,
                    interactions,
                    bodies,
                    self.integrator.w_store_mut(),
                    reuse,
                )?;
                self.problem.compute_q(graph, &free_outputs)?;
                self.problem.init_lambda(
                    graph,
                    interactions,
                    VELOCITY_LEVEL,
                    self.warm_start_factor,
                )?;
            }

            let result =
                self.solver
                    .solve(&mut self.problem, world.graph(), world.interactions())?;
            if !result.converged() {
                warn!(
                    iterations = result.iterations,
                    error = result.error,
                    "non-smooth solve did not converge; applying best iterate"
                );
            }

            {
                let (graph, interactions, bodies) = world.scatter_parts();
                self.problem
                    .post_compute(graph, interactions, bodies, VELOCITY_LEVEL)?;
            }
            Some(result)
        };

        self.integrator
            .update_state(world.bodies_mut(), VELOCITY_LEVEL, h)?;

        for (_, body) in world.bodies_mut().iter_mut() {
            body.commit_state();
        }
        world.advance_time(h);

        debug!(
            time = world.time(),
            residual, active_interactions, "step complete"
        );
        Ok(StepResult {
            time: world.time(),
            residual,
            active_interactions,
            solver: solver_result,
        })
    }

    /// Run a fixed number of steps, collecting the per-step results.
    ///
    /// # Errors
    ///
    /// Stops at the first fatal error.
    pub fn run_steps(&mut self, world: &mut World, steps: usize) -> Result<Vec<StepResult>> {
        let mut results = Vec::with_capacity(steps);
        for _ in 0..steps {
            results.push(self.step(world)?);
        }
        Ok(results)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};
    use nsm_model::{DynamicalSystem, LinearMap, NonSmoothLaw, Relation};

    fn falling_mass(world: &mut World, z: f64) -> nsm_types::DsId {
        let mut ds = DynamicalSystem::lagrangian_linear(
            DMatrix::identity(1, 1),
            DVector::from_element(1, z),
            DVector::zeros(1),
        )
        .unwrap();
        ds.set_external_force(DVector::from_element(1, -9.81)).unwrap();
        world.add_body(ds)
    }

    fn ground_relation() -> Relation {
        Relation::LagrangianLinear(
            LinearMap::new(DMatrix::identity(1, 1), DVector::zeros(1)).unwrap(),
        )
    }

    #[test]
    fn test_free_fall_without_interactions() {
        let mut world = World::new(SimulationConfig::with_timestep(0.01));
        let ball = falling_mass(&mut world, 10.0);

        let mut stepper = Stepper::new(world.config());
        let results = stepper.run_steps(&mut world, 100).unwrap();

        // One second of free fall: v ≈ −9.81 m/s.
        let body = world.body(ball).unwrap();
        assert_relative_eq!(body.v()[0], -9.81, epsilon = 1e-9);
        assert!(body.q()[0] < 10.0);
        assert!(results.iter().all(|r| r.solver.is_none()));
        assert_relative_eq!(world.time(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_force_body_does_not_drift() {
        let mut world = World::new(SimulationConfig::with_timestep(0.01));
        let ball = world.add_body(
            DynamicalSystem::lagrangian_linear(
                DMatrix::identity(1, 1),
                DVector::from_element(1, 2.0),
                DVector::zeros(1),
            )
            .unwrap(),
        );

        let mut stepper = Stepper::new(world.config());
        stepper.run_steps(&mut world, 50).unwrap();

        let body = world.body(ball).unwrap();
        assert_relative_eq!(body.q()[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(body.v()[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_resting_contact_holds_the_body() {
        let mut world = World::new(SimulationConfig::with_timestep(0.01));
        let ball = falling_mass(&mut world, 0.0);
        world
            .add_interaction(
                ball,
                None,
                ground_relation(),
                NonSmoothLaw::NewtonImpact { restitution: 0.0 },
            )
            .unwrap();

        let mut stepper = Stepper::new(world.config());
        let results = stepper.run_steps(&mut world, 200).unwrap();

        let body = world.body(ball).unwrap();
        // The contact impulse cancels gravity: the body stays put.
        assert!(body.q()[0].abs() < 1e-6);
        assert!(body.v()[0].abs() < 1e-6);
        assert!(results.last().unwrap().active_interactions > 0);
        assert!(results.last().unwrap().solver_converged());
    }

    #[test]
    fn test_step_reports_solver_outcome() {
        let mut world = World::new(SimulationConfig::with_timestep(0.01));
        let ball = falling_mass(&mut world, -0.001);
        world
            .add_interaction(
                ball,
                None,
                ground_relation(),
                NonSmoothLaw::NewtonImpact { restitution: 0.0 },
            )
            .unwrap();

        let mut stepper = Stepper::new(world.config());
        let result = stepper.step(&mut world).unwrap();
        assert_eq!(result.active_interactions, 1);
        let solver = result.solver.unwrap();
        assert!(solver.converged());
        assert!(solver.iterations >= 1);
    }

    #[test]
    fn test_invalid_timestep_is_fatal() {
        let mut config = SimulationConfig::default();
        config.timestep = -1.0;
        let mut world = World::new(config);
        let mut stepper = Stepper::new(world.config());
        assert!(matches!(
            stepper.step(&mut world),
            Err(NsmError::InvalidTimestep(_))
        ));
    }
}
