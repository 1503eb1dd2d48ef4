//! The non-smooth Gauss-Seidel outer loop.

use tracing::{debug, warn};

use nsm_graph::{Arena, InteractionGraph};
use nsm_model::Interaction;
use nsm_types::{InteractionId, NsgsConfig, NsmError, Result};

use crate::local::{solve_local, LocalStatus};
use crate::problem::NsProblem;

/// Outcome of a solve, as data: non-convergence is recoverable and the
/// caller decides what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// The accumulated normalized error dropped below tolerance.
    Converged,
    /// The iteration budget was exhausted first.
    MaxIterationsReached,
}

/// Result of one NSGS solve.
#[derive(Debug, Clone)]
pub struct NsgsResult {
    /// Convergence status.
    pub status: SolveStatus,
    /// Number of sweeps performed.
    pub iterations: usize,
    /// Error after the first sweep.
    pub initial_error: f64,
    /// Error after the last sweep.
    pub error: f64,
    /// Per-sweep error history, when tracking is enabled.
    pub history: Option<Vec<f64>>,
    /// Number of local solves that reported a numerical failure.
    pub local_failures: usize,
}

impl NsgsResult {
    /// Result for a problem with no active interactions.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: SolveStatus::Converged,
            iterations: 0,
            initial_error: 0.0,
            error: 0.0,
            history: None,
            local_failures: 0,
        }
    }

    /// Whether the solve converged.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

/// Non-smooth Gauss-Seidel solver.
///
/// Sweeps the graph vertices in visitation order; for each interaction it
/// freezes the neighbors' multipliers, forms the local right-hand side
/// `q_i + Σ_{j≠i} Block_ij·λ_j`, and runs the law-specific local solve.
/// The per-sweep error is the sum of local multiplier changes, each
/// normalized by `max(‖q_i‖, 1)`.
#[derive(Debug, Clone)]
pub struct Nsgs {
    config: NsgsConfig,
}

impl Default for Nsgs {
    fn default() -> Self {
        Self::new(NsgsConfig::default())
    }
}

impl Nsgs {
    /// Create a solver with the given configuration.
    #[must_use]
    pub fn new(config: NsgsConfig) -> Self {
        Self { config }
    }

    /// The solver configuration.
    #[must_use]
    pub fn config(&self) -> &NsgsConfig {
        &self.config
    }

    /// Mutable access to the configuration.
    pub fn config_mut(&mut self) -> &mut NsgsConfig {
        &mut self.config
    }

    /// Run the Gauss-Seidel iteration on an assembled problem.
    ///
    /// # Errors
    ///
    /// Calling this before the blocks are fresh, or with dangling
    /// interaction handles, is a fatal ordering/configuration error.
    /// Non-convergence is *not* an error; it is reported in the result.
    pub fn solve(
        &self,
        problem: &mut NsProblem,
        graph: &InteractionGraph,
        interactions: &Arena<InteractionId, Interaction>,
    ) -> Result<NsgsResult> {
        if graph.is_empty() {
            return Ok(NsgsResult::empty());
        }
        if !problem.is_ready() {
            return Err(NsmError::NotInitialized {
                what: "non-smooth problem blocks",
            });
        }

        let laws: Vec<_> = graph
            .vertices()
            .iter()
            .map(|vertex| {
                interactions
                    .get(vertex.interaction)
                    .map(|interaction| *interaction.law())
                    .ok_or(NsmError::UnknownInteraction(vertex.interaction))
            })
            .collect::<Result<_>>()?;

        let omega = self.config.relaxation;
        let mut history = self.config.track_history.then(Vec::new);
        let mut initial_error = f64::NAN;
        let mut error = f64::INFINITY;
        let mut iterations = 0;
        let mut local_failures = 0usize;
        let mut status = SolveStatus::MaxIterationsReached;

        for sweep in 0..self.config.max_iterations {
            iterations = sweep + 1;
            error = 0.0;

            for (index, vertex) in graph.vertices().iter().enumerate() {
                let block = vertex.block.as_ref().ok_or(NsmError::NotInitialized {
                    what: "diagonal block",
                })?;

                // Frozen off-diagonal contributions of the neighbors.
                let (q, lambda) = problem.q_lambda_mut();
                let mut rhs = q.rows(vertex.row, vertex.dim).into_owned();
                for &edge_index in graph.adjacency(index) {
                    let edge = &graph.edges()[edge_index];
                    let coupling = edge.block.as_ref().ok_or(NsmError::NotInitialized {
                        what: "edge block",
                    })?;
                    if edge.source == index {
                        let other = &graph.vertices()[edge.target];
                        rhs += coupling * lambda.rows(other.row, other.dim);
                    } else {
                        let other = &graph.vertices()[edge.source];
                        rhs += coupling.transpose() * lambda.rows(other.row, other.dim);
                    }
                }

                let previous = lambda.rows(vertex.row, vertex.dim).into_owned();
                let mut local = previous.clone();
                let local_status = solve_local(
                    &laws[index],
                    self.config.local_solver,
                    self.config.proximal_regularization,
                    block,
                    &rhs,
                    &mut local,
                );

                let scale = q.rows(vertex.row, vertex.dim).norm().max(1.0);
                match local_status {
                    LocalStatus::NumericalFailure => {
                        // One bad contact must not stop the sweep; fold it
                        // into the error so the solve cannot report
                        // spurious convergence.
                        warn!(
                            interaction = %vertex.interaction,
                            "local solve failed, keeping previous multiplier"
                        );
                        local_failures += 1;
                        error += 1.0;
                        continue;
                    }
                    LocalStatus::Converged | LocalStatus::MaxIterations => {
                        let relaxed = if (omega - 1.0).abs() > f64::EPSILON {
                            &previous * (1.0 - omega) + &local * omega
                        } else {
                            local
                        };
                        error += (&relaxed - &previous).norm() / scale;
                        lambda.rows_mut(vertex.row, vertex.dim).copy_from(&relaxed);
                    }
                }
            }

            if let Some(history) = history.as_mut() {
                history.push(error);
            }
            if sweep == 0 {
                initial_error = error;
            }
            if error < self.config.tolerance {
                status = SolveStatus::Converged;
                break;
            }
        }

        if status == SolveStatus::MaxIterationsReached {
            warn!(
                iterations,
                error,
                tolerance = self.config.tolerance,
                "gauss-seidel sweep budget exhausted"
            );
        } else {
            debug!(iterations, error, "gauss-seidel converged");
        }

        Ok(NsgsResult {
            status,
            iterations,
            initial_error,
            error,
            history,
            local_failures,
        })
    }
}
