//! The interaction graph: active constraints and their shared-body
//! coupling structure.

use std::collections::HashMap;

use nalgebra::DMatrix;

use nsm_model::Interaction;
use nsm_types::{DsId, InteractionId};

use crate::arena::Arena;

/// One vertex: an active interaction and its diagonal block.
#[derive(Debug)]
pub struct GraphVertex {
    /// The interaction this vertex represents.
    pub interaction: InteractionId,
    /// First connected body.
    pub first: DsId,
    /// Second connected body, when present.
    pub second: Option<DsId>,
    /// Constraint dimension of the interaction.
    pub dim: usize,
    /// Row offset in the assembled problem (prefix sum of dims in
    /// visitation order).
    pub row: usize,
    /// Diagonal block `C·W⁻¹·Cᵀ`; `None` until assembled.
    pub block: Option<DMatrix<f64>>,
}

/// One edge: a pair of interactions sharing at least one body.
///
/// Only the `(source, target)` block is stored; the `(target, source)`
/// block is its transpose by construction and is never recomputed.
#[derive(Debug)]
pub struct GraphEdge {
    /// Vertex index of the lower-indexed endpoint.
    pub source: usize,
    /// Vertex index of the higher-indexed endpoint.
    pub target: usize,
    /// Bodies shared by the two interactions.
    pub shared: Vec<DsId>,
    /// Off-diagonal block, `dim(source) × dim(target)`; `None` until
    /// assembled.
    pub block: Option<DMatrix<f64>>,
}

/// Undirected graph over the active interactions.
///
/// Owned by the simulation driver; the problem assembler reads the
/// structure and fills in the blocks. Vertex order is the arenas' slot
/// order, so assembly is deterministic.
#[derive(Debug, Default)]
pub struct InteractionGraph {
    vertices: Vec<GraphVertex>,
    edges: Vec<GraphEdge>,
    index_of: HashMap<InteractionId, usize>,
    adjacency: Vec<Vec<usize>>,
    total_dim: usize,
}

impl InteractionGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the graph from the active interactions.
    ///
    /// Diagonal blocks of interactions that were already present are
    /// carried over, so a topology change does not force recomputation of
    /// untouched vertices. Edge blocks are always invalidated.
    pub fn rebuild(&mut self, interactions: &Arena<InteractionId, Interaction>) {
        let mut kept_blocks: HashMap<InteractionId, DMatrix<f64>> = self
            .vertices
            .drain(..)
            .filter_map(|v| v.block.map(|b| (v.interaction, b)))
            .collect();

        self.edges.clear();
        self.index_of.clear();
        self.total_dim = 0;

        // Vertices in slot order.
        for (id, interaction) in interactions.iter() {
            if !interaction.is_active() {
                continue;
            }
            let dim = interaction.dim();
            let index = self.vertices.len();
            self.index_of.insert(id, index);
            self.vertices.push(GraphVertex {
                interaction: id,
                first: interaction.first(),
                second: interaction.second(),
                dim,
                row: self.total_dim,
                block: kept_blocks.remove(&id),
            });
            self.total_dim += dim;
        }

        // Edges from shared bodies.
        let mut by_body: HashMap<DsId, Vec<usize>> = HashMap::new();
        for (index, vertex) in self.vertices.iter().enumerate() {
            by_body.entry(vertex.first).or_default().push(index);
            if let Some(second) = vertex.second {
                by_body.entry(second).or_default().push(index);
            }
        }

        let mut edge_of_pair: HashMap<(usize, usize), usize> = HashMap::new();
        let mut bodies: Vec<&DsId> = by_body.keys().collect();
        bodies.sort();
        for body in bodies {
            let members = &by_body[body];
            for (a, &i) in members.iter().enumerate() {
                for &j in &members[a + 1..] {
                    let pair = if i < j { (i, j) } else { (j, i) };
                    match edge_of_pair.get(&pair) {
                        Some(&edge) => self.edges[edge].shared.push(*body),
                        None => {
                            edge_of_pair.insert(pair, self.edges.len());
                            self.edges.push(GraphEdge {
                                source: pair.0,
                                target: pair.1,
                                shared: vec![*body],
                                block: None,
                            });
                        }
                    }
                }
            }
        }

        self.adjacency = vec![Vec::new(); self.vertices.len()];
        for (edge_index, edge) in self.edges.iter().enumerate() {
            self.adjacency[edge.source].push(edge_index);
            self.adjacency[edge.target].push(edge_index);
        }
    }

    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no active interactions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Total constraint dimension (sum of vertex dims).
    #[must_use]
    pub fn total_dim(&self) -> usize {
        self.total_dim
    }

    /// All vertices in visitation order.
    #[must_use]
    pub fn vertices(&self) -> &[GraphVertex] {
        &self.vertices
    }

    /// Mutable access to the vertices (block assembly).
    pub fn vertices_mut(&mut self) -> &mut [GraphVertex] {
        &mut self.vertices
    }

    /// All edges.
    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Mutable access to the edges (block assembly).
    pub fn edges_mut(&mut self) -> &mut [GraphEdge] {
        &mut self.edges
    }

    /// Edge indices incident to a vertex.
    #[must_use]
    pub fn adjacency(&self, vertex: usize) -> &[usize] {
        self.adjacency.get(vertex).map_or(&[], Vec::as_slice)
    }

    /// Vertex index of an interaction, if it is in the graph.
    #[must_use]
    pub fn vertex_index(&self, id: InteractionId) -> Option<usize> {
        self.index_of.get(&id).copied()
    }

    /// Edge index between two vertices, if any.
    #[must_use]
    pub fn edge_between(&self, i: usize, j: usize) -> Option<usize> {
        let pair = if i < j { (i, j) } else { (j, i) };
        self.edges
            .iter()
            .position(|e| (e.source, e.target) == pair)
    }

    /// Drop every computed block (forces full reassembly).
    pub fn invalidate_blocks(&mut self) {
        for vertex in &mut self.vertices {
            vertex.block = None;
        }
        for edge in &mut self.edges {
            edge.block = None;
        }
    }

    /// Whether every vertex and edge block has been assembled.
    #[must_use]
    pub fn blocks_ready(&self) -> bool {
        self.vertices.iter().all(|v| v.block.is_some())
            && self.edges.iter().all(|e| e.block.is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};
    use nsm_model::{
        ActivationState, DynamicalSystem, LinearMap, NonSmoothLaw, Relation,
    };

    fn point_mass() -> DynamicalSystem {
        DynamicalSystem::lagrangian_linear(
            DMatrix::identity(1, 1),
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

    fn three_body_chain() -> (
        Arena<DsId, DynamicalSystem>,
        Arena<InteractionId, Interaction>,
        InteractionId,
        InteractionId,
    ) {
        let mut bodies: Arena<DsId, DynamicalSystem> = Arena::new();
        let a = bodies.insert(point_mass());
        let b = bodies.insert(point_mass());
        let c = bodies.insert(point_mass());

        let mut interactions: Arena<InteractionId, Interaction> = Arena::new();
        let i = interactions.insert(pair_interaction(a, b, &bodies));
        let j = interactions.insert(pair_interaction(b, c, &bodies));
        (bodies, interactions, i, j)
    }

    #[test]
    fn test_shared_body_edge() {
        let (_bodies, interactions, i, j) = three_body_chain();
        let mut graph = InteractionGraph::new();
        graph.rebuild(&interactions);

        assert_eq!(graph.vertex_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.total_dim(), 2);

        let vi = graph.vertex_index(i).unwrap();
        let vj = graph.vertex_index(j).unwrap();
        let edge = &graph.edges()[graph.edge_between(vi, vj).unwrap()];
        assert_eq!(edge.shared.len(), 1);
    }

    #[test]
    fn test_inactive_interactions_are_excluded() {
        let (_bodies, mut interactions, i, _j) = three_body_chain();
        interactions
            .get_mut(i)
            .unwrap()
            .set_activation(ActivationState::Inactive);

        let mut graph = InteractionGraph::new();
        graph.rebuild(&interactions);
        assert_eq!(graph.vertex_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.vertex_index(i).is_none());
    }

    #[test]
    fn test_row_offsets_are_prefix_sums() {
        let (_bodies, interactions, i, j) = three_body_chain();
        let mut graph = InteractionGraph::new();
        graph.rebuild(&interactions);

        let vi = graph.vertex_index(i).unwrap();
        let vj = graph.vertex_index(j).unwrap();
        assert_eq!(graph.vertices()[vi].row, 0);
        assert_eq!(graph.vertices()[vj].row, 1);
    }

    #[test]
    fn test_removal_keeps_diagonal_block_and_drops_edge() {
        let (_bodies, mut interactions, i, j) = three_body_chain();
        let mut graph = InteractionGraph::new();
        graph.rebuild(&interactions);

        // Pretend the assembler filled the diagonal block of i.
        let vi = graph.vertex_index(i).unwrap();
        graph.vertices_mut()[vi].block = Some(DMatrix::from_element(1, 1, 42.0));

        interactions.remove(j);
        graph.rebuild(&interactions);

        assert_eq!(graph.vertex_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        let vi = graph.vertex_index(i).unwrap();
        // Diagonal block of the surviving interaction is untouched.
        assert_eq!(graph.vertices()[vi].block.as_ref().unwrap()[(0, 0)], 42.0);
    }

    #[test]
    fn test_blocks_ready() {
        let (_bodies, interactions, _i, _j) = three_body_chain();
        let mut graph = InteractionGraph::new();
        graph.rebuild(&interactions);
        assert!(!graph.blocks_ready());

        for vertex in graph.vertices_mut() {
            vertex.block = Some(DMatrix::zeros(1, 1));
        }
        for edge in graph.edges_mut() {
            edge.block = Some(DMatrix::zeros(1, 1));
        }
        assert!(graph.blocks_ready());

        graph.invalidate_blocks();
        assert!(!graph.blocks_ready());
    }
}
