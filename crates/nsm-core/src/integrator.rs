//! The Moreau-Jean one-step integrator.
//!
//! Owns the per-body iteration matrices and free velocities, and the
//! activation test that decides which interactions enter the non-smooth
//! problem.

use std::collections::HashMap;

use nalgebra::DVector;

use nsm_graph::Arena;
use nsm_model::{
    ActivationState, DynamicalSystem, DynamicsKind, Interaction, IterationMatrix, WStore,
};
use nsm_types::{DsId, IntegratorConfig, NsmError, Result, VELOCITY_LEVEL};

/// Moreau-Jean θ-scheme integrator.
///
/// Per body it maintains the iteration matrix
/// `W = M − h·θ·(∂F/∂v) − h²·θ²·(∂F/∂q)` (Lagrangian) or
/// `W = M − h·θ·(∂F/∂v)` (Newton-Euler), factorized lazily before its
/// first solve, and the free velocity predictor that ignores contact
/// forces.
#[derive(Debug)]
pub struct MoreauJean {
    config: IntegratorConfig,
    w: WStore,
    v_free: HashMap<DsId, DVector<f64>>,
}

impl MoreauJean {
    /// Create an integrator with the given θ/γ parameters.
    #[must_use]
    pub fn new(config: IntegratorConfig) -> Self {
        Self {
            config,
            w: WStore::new(),
            v_free: HashMap::new(),
        }
    }

    /// The integrator parameters.
    #[must_use]
    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Allocate and compute the iteration matrix of every body.
    ///
    /// # Errors
    ///
    /// Propagates iteration-matrix computation failures.
    pub fn initialize(
        &mut self,
        bodies: &Arena<DsId, DynamicalSystem>,
        t: f64,
        h: f64,
    ) -> Result<()> {
        self.w.clear();
        self.v_free.clear();
        for (id, body) in bodies.iter() {
            self.compute_w(id, body, t, h)?;
        }
        Ok(())
    }

    /// Recompute the iteration matrix of one body from its current mass
    /// and force Jacobians.
    ///
    /// # Errors
    ///
    /// Currently infallible for all supported payloads; the `Result` is
    /// part of the contract so state-dependent mass operators can fail
    /// here.
    pub fn compute_w(&mut self, id: DsId, body: &DynamicalSystem, t: f64, h: f64) -> Result<()> {
        let theta = self.config.theta;
        let mut w = body.mass_matrix();
        match body.kind() {
            DynamicsKind::LagrangianLinear | DynamicsKind::Lagrangian => {
                w -= body.force_jacobian_v(t) * (h * theta);
                w -= body.force_jacobian_q(t) * (h * h * theta * theta);
            }
            DynamicsKind::NewtonEuler => {
                w -= body.force_jacobian_v(t) * (h * theta);
            }
        }
        match self.w.get_mut(&id) {
            Some(iteration) => iteration.set_matrix(w),
            None => {
                self.w.insert(id, IterationMatrix::new(w));
            }
        }
        Ok(())
    }

    /// Whether a body already has an iteration matrix.
    #[must_use]
    pub fn has_w(&self, id: DsId) -> bool {
        self.w.contains_key(&id)
    }

    /// The iteration matrix of a body.
    #[must_use]
    pub fn w(&self, id: DsId) -> Option<&IterationMatrix> {
        self.w.get(&id)
    }

    /// The whole iteration-matrix store (block assembly needs mutable
    /// access for the lazy factorization).
    pub fn w_store_mut(&mut self) -> &mut WStore {
        &mut self.w
    }

    /// Drop the iteration matrix and free velocity of a removed body.
    pub fn forget_body(&mut self, id: DsId) {
        self.w.remove(&id);
        self.v_free.remove(&id);
    }

    /// Free residual of one body:
    /// `R = M·(v−v_old) − h·[θ·F(t, q, v) + (1−θ)·F(t−h, q_old, v_old)] − p`.
    ///
    /// `t` is the end-of-step time; the old state is the last committed
    /// one (falling back to the current state on the very first step).
    #[must_use]
    pub fn residu_of(&self, body: &DynamicalSystem, t: f64, h: f64) -> DVector<f64> {
        let theta = self.config.theta;
        let (q_old, v_old) = body
            .previous_state(0)
            .map_or_else(|| (body.q().clone(), body.v().clone()), |(q, v)| (q.clone(), v.clone()));

        let f_now = body.force_at(t, body.q(), body.v());
        let f_old = body.force_at(t - h, &q_old, &v_old);

        let mut residu = body.mass_matrix() * (body.v() - &v_old);
        residu -= (f_now * theta + f_old * (1.0 - theta)) * h;
        residu -= body.impulse(VELOCITY_LEVEL);
        residu
    }

    /// Maximum free-residual norm over all bodies (diagnostic; the
    /// explicit linear scheme does not gate on it).
    #[must_use]
    pub fn compute_residu(&self, bodies: &Arena<DsId, DynamicalSystem>, t: f64, h: f64) -> f64 {
        bodies
            .iter()
            .map(|(_, body)| self.residu_of(body, t, h).norm())
            .fold(0.0, f64::max)
    }

    /// Compute the contact-free velocity predictor of every body by
    /// solving `W·x = R` against the factorized iteration matrix and
    /// setting `v_free = v − x`.
    ///
    /// # Errors
    ///
    /// A missing iteration matrix is an ordering error; a singular one is
    /// a fatal numerical failure for that body.
    pub fn compute_free_state(
        &mut self,
        bodies: &Arena<DsId, DynamicalSystem>,
        t: f64,
        h: f64,
    ) -> Result<()> {
        for (id, body) in bodies.iter() {
            let residu = self.residu_of(body, t, h);
            let iteration = self.w.get_mut(&id).ok_or(NsmError::NotInitialized {
                what: "iteration matrix",
            })?;
            let correction = iteration
                .solve_vec(&residu)
                .ok_or(NsmError::SingularIterationMatrix { body: id })?;
            self.v_free.insert(id, body.v() - correction);
        }
        Ok(())
    }

    /// The free velocity of a body, once computed.
    #[must_use]
    pub fn free_velocity(&self, id: DsId) -> Option<&DVector<f64>> {
        self.v_free.get(&id)
    }

    /// Project the free velocities through an interaction's relation and
    /// apply the law's restitution correction, yielding the free
    /// constraint output `y_free`.
    ///
    /// # Errors
    ///
    /// Dangling handles or a missing free state are fatal.
    pub fn compute_free_output(
        &self,
        interaction: &Interaction,
        bodies: &Arena<DsId, DynamicalSystem>,
    ) -> Result<DVector<f64>> {
        let first_id = interaction.first();
        let first = bodies
            .get(first_id)
            .ok_or(NsmError::UnknownBody(first_id))?;
        let v_first = self
            .free_velocity(first_id)
            .ok_or(NsmError::NotInitialized { what: "free state" })?;

        let second = match interaction.second() {
            Some(id) => Some(bodies.get(id).ok_or(NsmError::UnknownBody(id))?),
            None => None,
        };
        let v_second = match interaction.second() {
            Some(id) => Some(
                self.free_velocity(id)
                    .ok_or(NsmError::NotInitialized { what: "free state" })?,
            ),
            None => None,
        };

        let mut y_free = interaction
            .relation()
            .output_from_velocities(first, v_first, second, v_second);
        interaction
            .law()
            .apply_correction(&mut y_free, interaction.y(VELOCITY_LEVEL));
        Ok(y_free)
    }

    /// Reconcile the bodies with the solved impulses:
    /// `v = v_free + W⁻¹·p[level]`, then `q = q_old + h·(θ·v + (1−θ)·v_old)`
    /// with quaternion renormalization for Newton-Euler bodies.
    ///
    /// # Errors
    ///
    /// Missing free state, singular `W`, or a non-finite updated state
    /// are fatal.
    pub fn update_state(
        &mut self,
        bodies: &mut Arena<DsId, DynamicalSystem>,
        level: usize,
        h: f64,
    ) -> Result<()> {
        let theta = self.config.theta;
        for (id, body) in bodies.iter_mut() {
            let v_free = self
                .v_free
                .get(&id)
                .ok_or(NsmError::NotInitialized { what: "free state" })?;

            let impulse = body.impulse(level);
            let v_new = if impulse.iter().all(|x| *x == 0.0) {
                v_free.clone()
            } else {
                let iteration = self.w.get_mut(&id).ok_or(NsmError::NotInitialized {
                    what: "iteration matrix",
                })?;
                let correction = iteration
                    .solve_vec(impulse)
                    .ok_or(NsmError::SingularIterationMatrix { body: id })?;
                v_free + correction
            };

            let v_old = body.v().clone();
            body.integrate_position(h, theta, &v_new, &v_old);
            body.set_v(v_new);

            if !body.is_finite() {
                return Err(NsmError::diverged(format!(
                    "non-finite state for body {id} after update"
                )));
            }
        }
        Ok(())
    }

    /// The activation predicate: predicted gap `y + γ·h·ẏ <= 0`.
    #[must_use]
    pub fn predict_active(&self, y: f64, y_dot: f64, h: f64) -> bool {
        y + self.config.gamma * h * y_dot <= 0.0
    }

    /// Run the activation state machine of one interaction; returns
    /// whether the state changed (topology change).
    ///
    /// Deactivation clears the interaction's multipliers so stale
    /// impulses are not warm-started when it reactivates.
    pub fn update_activation(&self, interaction: &mut Interaction, h: f64) -> bool {
        let predicted = interaction.predicted_gap(self.config.gamma, h);
        let target = if predicted <= 0.0 {
            ActivationState::Active
        } else {
            ActivationState::Inactive
        };
        let changed = interaction.set_activation(target);
        if changed && target == ActivationState::Inactive {
            interaction.clear_lambda();
        }
        changed
    }
}
