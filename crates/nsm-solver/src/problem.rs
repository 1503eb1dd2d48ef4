//! Assembly of the block-sparse non-smooth problem.

use nalgebra::{DMatrix, DVector};

use nsm_graph::{Arena, InteractionGraph};
use nsm_model::{DynamicalSystem, Interaction, WStore};
use nsm_types::{DsId, InteractionId, NsmError, Result};

/// Lifecycle of the assembled problem.
///
/// `BlocksStale` is entered whenever the graph topology changes or a
/// nonlinear body moves; `BlocksFresh` is the precondition for solving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblyState {
    /// Nothing assembled yet.
    #[default]
    Uninitialized,
    /// Structure known, blocks outdated.
    BlocksStale,
    /// Blocks and right-hand side match the current graph and states.
    BlocksFresh,
    /// Multipliers have been scattered back after a solve.
    Solved,
}

/// The one-step non-smooth problem: Delassus blocks stored on the graph,
/// right-hand side `q`, and the packed multiplier vector `λ`.
#[derive(Debug, Default)]
pub struct NsProblem {
    q: DVector<f64>,
    lambda: DVector<f64>,
    state: AssemblyState,
}

fn jacobian_for_body(
    interaction: &Interaction,
    body_id: DsId,
    bodies: &Arena<DsId, DynamicalSystem>,
) -> Result<DMatrix<f64>> {
    let first_body = bodies
        .get(interaction.first())
        .ok_or(NsmError::UnknownBody(interaction.first()))?;
    if interaction.first() == body_id {
        return Ok(interaction.relation().jacobian_first(first_body));
    }
    if interaction.second() == Some(body_id) {
        let second_body = bodies.get(body_id).ok_or(NsmError::UnknownBody(body_id))?;
        return interaction
            .relation()
            .jacobian_second(Some(second_body))
            .ok_or(NsmError::DimensionMismatch {
                context: "edge jacobian (second body)",
                expected: interaction.dim(),
                actual: 0,
            });
    }
    Err(NsmError::UnknownBody(body_id))
}

impl NsProblem {
    /// Create an empty problem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Mark the blocks as outdated (topology change or nonlinear state
    /// change).
    pub fn mark_stale(&mut self) {
        if self.state != AssemblyState::Uninitialized {
            self.state = AssemblyState::BlocksStale;
        }
    }

    /// Whether the problem is ready to be solved.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, AssemblyState::BlocksFresh | AssemblyState::Solved)
    }

    /// The assembled right-hand side.
    #[must_use]
    pub fn q(&self) -> &DVector<f64> {
        &self.q
    }

    /// The packed multiplier vector.
    #[must_use]
    pub fn lambda(&self) -> &DVector<f64> {
        &self.lambda
    }

    /// Simultaneous access to the right-hand side and the multipliers
    /// for the Gauss-Seidel sweep.
    pub fn q_lambda_mut(&mut self) -> (&DVector<f64>, &mut DVector<f64>) {
        (&self.q, &mut self.lambda)
    }

    /// Compute the Delassus blocks on the graph.
    ///
    /// Diagonal: `Block_ii = Σ_k C_{i,k}·W_k⁻¹·C_{i,k}ᵀ` over the bodies
    /// `k` of interaction `i`. Edges: `Block_ij = Σ_k C_{i,k}·W_k⁻¹·C_{j,k}ᵀ`
    /// over the shared bodies; the `(j, i)` block is the transpose and is
    /// never materialized.
    ///
    /// With `reuse_existing` (linear time-invariant bodies, unchanged
    /// topology) blocks already present on the graph are kept as-is; this
    /// is an optimization, never a correctness requirement.
    ///
    /// # Errors
    ///
    /// Dangling handles, a missing iteration matrix, or a singular `W`
    /// are fatal.
    pub fn update_blocks(
        &mut self,
        graph: &mut InteractionGraph,
        interactions: &Arena<InteractionId, Interaction>,
        bodies: &Arena<DsId, DynamicalSystem>,
        w: &mut WStore,
        reuse_existing: bool,
    ) -> Result<()> {
        if reuse_existing && self.is_ready() && graph.blocks_ready() {
            self.state = AssemblyState::BlocksFresh;
            return Ok(());
        }

        // Diagonal blocks.
        for index in 0..graph.vertices().len() {
            let (id, dim, has_block) = {
                let vertex = &graph.vertices()[index];
                (vertex.interaction, vertex.dim, vertex.block.is_some())
            };
            if reuse_existing && has_block {
                continue;
            }
            let interaction = interactions
                .get(id)
                .ok_or(NsmError::UnknownInteraction(id))?;

            let mut block = DMatrix::zeros(dim, dim);
            let mut connected = vec![interaction.first()];
            if let Some(second) = interaction.second() {
                connected.push(second);
            }
            for body_id in connected {
                let jacobian = jacobian_for_body(interaction, body_id, bodies)?;
                let iteration = w
                    .get_mut(&body_id)
                    .ok_or(NsmError::NotInitialized {
                        what: "iteration matrix",
                    })?;
                let w_inv_jt = iteration
                    .solve_mat(&jacobian.transpose())
                    .ok_or(NsmError::SingularIterationMatrix { body: body_id })?;
                block += &jacobian * w_inv_jt;
            }
            graph.vertices_mut()[index].block = Some(block);
        }

        // Off-diagonal blocks, one per edge; the mirror is the transpose.
        for index in 0..graph.edges().len() {
            let (source, target, shared, has_block) = {
                let edge = &graph.edges()[index];
                (edge.source, edge.target, edge.shared.clone(), edge.block.is_some())
            };
            if reuse_existing && has_block {
                continue;
            }
            let source_id = graph.vertices()[source].interaction;
            let target_id = graph.vertices()[target].interaction;
            let source_interaction = interactions
                .get(source_id)
                .ok_or(NsmError::UnknownInteraction(source_id))?;
            let target_interaction = interactions
                .get(target_id)
                .ok_or(NsmError::UnknownInteraction(target_id))?;

            let mut block = DMatrix::zeros(source_interaction.dim(), target_interaction.dim());
            for body_id in shared {
                let j_source = jacobian_for_body(source_interaction, body_id, bodies)?;
                let j_target = jacobian_for_body(target_interaction, body_id, bodies)?;
                let iteration = w
                    .get_mut(&body_id)
                    .ok_or(NsmError::NotInitialized {
                        what: "iteration matrix",
                    })?;
                let w_inv_jt = iteration
                    .solve_mat(&j_target.transpose())
                    .ok_or(NsmError::SingularIterationMatrix { body: body_id })?;
                block += &j_source * w_inv_jt;
            }
            graph.edges_mut()[index].block = Some(block);
        }

        self.state = AssemblyState::BlocksFresh;
        Ok(())
    }

    /// Assemble the right-hand side from the free outputs, given in
    /// graph visitation order.
    ///
    /// # Errors
    ///
    /// The outputs must match the graph's vertices and dimensions.
    pub fn compute_q(
        &mut self,
        graph: &InteractionGraph,
        free_outputs: &[DVector<f64>],
    ) -> Result<()> {
        if free_outputs.len() != graph.vertex_count() {
            return Err(NsmError::DimensionMismatch {
                context: "free outputs",
                expected: graph.vertex_count(),
                actual: free_outputs.len(),
            });
        }
        self.q = DVector::zeros(graph.total_dim());
        for (vertex, output) in graph.vertices().iter().zip(free_outputs) {
            if output.len() != vertex.dim {
                return Err(NsmError::DimensionMismatch {
                    context: "free output dimension",
                    expected: vertex.dim,
                    actual: output.len(),
                });
            }
            self.q.rows_mut(vertex.row, vertex.dim).copy_from(output);
        }
        Ok(())
    }

    /// Initialize the packed multipliers, warm-starting from the
    /// interactions' previous multipliers when a factor is given.
    ///
    /// # Errors
    ///
    /// Dangling interaction handles are fatal.
    pub fn init_lambda(
        &mut self,
        graph: &InteractionGraph,
        interactions: &Arena<InteractionId, Interaction>,
        level: usize,
        warm_start_factor: Option<f64>,
    ) -> Result<()> {
        self.lambda = DVector::zeros(graph.total_dim());
        if let Some(factor) = warm_start_factor {
            for vertex in graph.vertices() {
                let interaction = interactions
                    .get(vertex.interaction)
                    .ok_or(NsmError::UnknownInteraction(vertex.interaction))?;
                let previous = interaction.lambda(level);
                if previous.len() == vertex.dim {
                    self.lambda
                        .rows_mut(vertex.row, vertex.dim)
                        .copy_from(&(previous * factor));
                }
            }
        }
        Ok(())
    }

    /// Scatter the solved multipliers back: write each interaction's
    /// `λ` and accumulate `Cᵀ·λ` into the bodies' impulse vectors.
    ///
    /// # Errors
    ///
    /// Dangling handles are fatal.
    pub fn post_compute(
        &mut self,
        graph: &InteractionGraph,
        interactions: &mut Arena<InteractionId, Interaction>,
        bodies: &mut Arena<DsId, DynamicalSystem>,
        level: usize,
    ) -> Result<()> {
        for vertex in graph.vertices() {
            let lambda_i = self.lambda.rows(vertex.row, vertex.dim).into_owned();
            interactions
                .get_mut(vertex.interaction)
                .ok_or(NsmError::UnknownInteraction(vertex.interaction))?
                .set_lambda(level, lambda_i.clone());

            let interaction = interactions
                .get(vertex.interaction)
                .ok_or(NsmError::UnknownInteraction(vertex.interaction))?;
            match vertex.second {
                Some(second_id) => {
                    let (first, second) = bodies
                        .get2_mut(vertex.first, second_id)
                        .ok_or(NsmError::UnknownBody(vertex.first))?;
                    interaction
                        .relation()
                        .apply_input(&lambda_i, level, first, Some(second));
                }
                None => {
                    let first = bodies
                        .get_mut(vertex.first)
                        .ok_or(NsmError::UnknownBody(vertex.first))?;
                    interaction
                        .relation()
                        .apply_input(&lambda_i, level, first, None);
                }
            }
        }
        self.state = AssemblyState::Solved;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nsm_model::{
        ActivationState, IterationMatrix, LinearMap, NonSmoothLaw, Relation,
    };
    use nsm_types::VELOCITY_LEVEL;

    fn point_mass(mass: f64) -> DynamicalSystem {
        DynamicalSystem::lagrangian_linear(
            DMatrix::from_element(1, 1, mass),
            DVector::zeros(1),
            DVector::zeros(1),
        )
        .unwrap()
    }

    fn pair_interaction(
        first: DsId,
        second: DsId,
        bodies: &Arena<DsId, DynamicalSystem>,
    ) -> Interaction {
        let relation = Relation::LagrangianLinear(
            LinearMap::new(DMatrix::identity(1, 1), DVector::zeros(1))
                .unwrap()
                .with_second(DMatrix::from_element(1, 1, -1.0))
                .unwrap(),
        );
        let mut interaction = Interaction::new(
            first,
            Some(second),
            relation,
            NonSmoothLaw::NewtonImpact { restitution: 0.0 },
            bodies.get(first).unwrap(),
            bodies.get(second),
        )
        .unwrap();
        interaction.set_activation(ActivationState::Active);
        interaction
    }

    struct Fixture {
        bodies: Arena<DsId, DynamicalSystem>,
        interactions: Arena<InteractionId, Interaction>,
        graph: InteractionGraph,
        w: WStore,
    }

    /// Two interactions sharing the middle body of a 3-mass chain.
    fn chain_fixture() -> Fixture {
        let mut bodies: Arena<DsId, DynamicalSystem> = Arena::new();
        let a = bodies.insert(point_mass(2.0));
        let b = bodies.insert(point_mass(4.0));
        let c = bodies.insert(point_mass(8.0));

        let mut interactions: Arena<InteractionId, Interaction> = Arena::new();
        interactions.insert(pair_interaction(a, b, &bodies));
        interactions.insert(pair_interaction(b, c, &bodies));

        let mut graph = InteractionGraph::new();
        graph.rebuild(&interactions);

        let mut w = WStore::new();
        for (id, body) in bodies.iter() {
            w.insert(id, IterationMatrix::new(body.mass_matrix()));
        }

        Fixture {
            bodies,
            interactions,
            graph,
            w,
        }
    }

    #[test]
    fn test_state_machine() {
        let mut fixture = chain_fixture();
        let mut problem = NsProblem::new();
        assert_eq!(problem.state(), AssemblyState::Uninitialized);
        assert!(!problem.is_ready());

        problem
            .update_blocks(
                &mut fixture.graph,
                &fixture.interactions,
                &fixture.bodies,
                &mut fixture.w,
                false,
            )
            .unwrap();
        assert_eq!(problem.state(), AssemblyState::BlocksFresh);
        assert!(problem.is_ready());

        problem.mark_stale();
        assert_eq!(problem.state(), AssemblyState::BlocksStale);
        assert!(!problem.is_ready());
    }

    #[test]
    fn test_diagonal_blocks_sum_inverse_masses() {
        let mut fixture = chain_fixture();
        let mut problem = NsProblem::new();
        problem
            .update_blocks(
                &mut fixture.graph,
                &fixture.interactions,
                &fixture.bodies,
                &mut fixture.w,
                false,
            )
            .unwrap();

        // Interaction over masses 2 and 4: B_ii = 1/2 + 1/4.
        let block = fixture.graph.vertices()[0].block.as_ref().unwrap();
        assert_relative_eq!(block[(0, 0)], 0.75, epsilon = 1e-12);
        // Interaction over masses 4 and 8: B_jj = 1/4 + 1/8.
        let block = fixture.graph.vertices()[1].block.as_ref().unwrap();
        assert_relative_eq!(block[(0, 0)], 0.375, epsilon = 1e-12);
    }

    #[test]
    fn test_edge_block_through_shared_body() {
        let mut fixture = chain_fixture();
        let mut problem = NsProblem::new();
        problem
            .update_blocks(
                &mut fixture.graph,
                &fixture.interactions,
                &fixture.bodies,
                &mut fixture.w,
                false,
            )
            .unwrap();

        // Shared body b (mass 4): J_i over b = −1, J_j over b = +1, so
        // B_ij = (−1)·(1/4)·(1) = −0.25.
        let edge = &fixture.graph.edges()[0];
        let block = edge.block.as_ref().unwrap();
        assert_relative_eq!(block[(0, 0)], -0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_reuse_existing_skips_recompute() {
        let mut fixture = chain_fixture();
        let mut problem = NsProblem::new();
        problem
            .update_blocks(
                &mut fixture.graph,
                &fixture.interactions,
                &fixture.bodies,
                &mut fixture.w,
                false,
            )
            .unwrap();

        // Tamper with a block; a reusing pass must not overwrite it.
        fixture.graph.vertices_mut()[0].block = Some(DMatrix::from_element(1, 1, 123.0));
        problem
            .update_blocks(
                &mut fixture.graph,
                &fixture.interactions,
                &fixture.bodies,
                &mut fixture.w,
                true,
            )
            .unwrap();
        assert_eq!(
            fixture.graph.vertices()[0].block.as_ref().unwrap()[(0, 0)],
            123.0
        );

        // A non-reusing pass recomputes it.
        problem
            .update_blocks(
                &mut fixture.graph,
                &fixture.interactions,
                &fixture.bodies,
                &mut fixture.w,
                false,
            )
            .unwrap();
        assert_relative_eq!(
            fixture.graph.vertices()[0].block.as_ref().unwrap()[(0, 0)],
            0.75,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_compute_q_places_rows() {
        let fixture = chain_fixture();
        let mut problem = NsProblem::new();
        let outputs = vec![
            DVector::from_element(1, -1.0),
            DVector::from_element(1, 2.0),
        ];
        problem.compute_q(&fixture.graph, &outputs).unwrap();
        assert_eq!(problem.q().len(), 2);
        assert_eq!(problem.q()[0], -1.0);
        assert_eq!(problem.q()[1], 2.0);

        // Wrong arity is a fatal error.
        assert!(problem.compute_q(&fixture.graph, &outputs[..1]).is_err());
    }

    #[test]
    fn test_post_compute_scatters_impulses() {
        let mut fixture = chain_fixture();
        let mut problem = NsProblem::new();
        problem
            .update_blocks(
                &mut fixture.graph,
                &fixture.interactions,
                &fixture.bodies,
                &mut fixture.w,
                false,
            )
            .unwrap();
        problem
            .compute_q(
                &fixture.graph,
                &[DVector::zeros(1), DVector::zeros(1)],
            )
            .unwrap();
        problem
            .init_lambda(&fixture.graph, &fixture.interactions, VELOCITY_LEVEL, None)
            .unwrap();

        // Hand-set multipliers, then scatter.
        problem.lambda = DVector::from_vec(vec![3.0, 5.0]);
        problem
            .post_compute(
                &fixture.graph,
                &mut fixture.interactions,
                &mut fixture.bodies,
                VELOCITY_LEVEL,
            )
            .unwrap();
        assert_eq!(problem.state(), AssemblyState::Solved);

        // Middle body b receives −λ_i + λ_j = −3 + 5.
        let ids: Vec<DsId> = fixture.bodies.keys().collect();
        let b = fixture.bodies.get(ids[1]).unwrap();
        assert_relative_eq!(b.impulse(VELOCITY_LEVEL)[0], 2.0, epsilon = 1e-12);

        let first = fixture.interactions.iter().next().unwrap().1;
        assert_relative_eq!(first.lambda(VELOCITY_LEVEL)[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_warm_start_scales_previous_lambda() {
        let mut fixture = chain_fixture();
        for (_, interaction) in fixture.interactions.iter_mut() {
            interaction.set_lambda(VELOCITY_LEVEL, DVector::from_element(1, 2.0));
        }
        let mut problem = NsProblem::new();
        problem
            .init_lambda(
                &fixture.graph,
                &fixture.interactions,
                VELOCITY_LEVEL,
                Some(0.5),
            )
            .unwrap();
        assert_relative_eq!(problem.lambda()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(problem.lambda()[1], 1.0, epsilon = 1e-12);
    }
}
