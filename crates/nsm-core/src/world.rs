//! World: arenas, contact bookkeeping, and the interaction graph.

use std::collections::{HashMap, HashSet};

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::debug;

use nsm_graph::{Arena, InteractionGraph};
use nsm_model::{
    tangent_basis, ContactFrame, DynamicalSystem, DynamicsKind, Interaction, LinearMap,
    NonSmoothLaw, Relation,
};
use nsm_types::{DsId, InteractionId, NsmError, Result, SimulationConfig};

/// Persistent identity of one contact, as reported by the geometric
/// collaborator. The feature index disambiguates multiple contact points
/// between the same body pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContactKey {
    /// First body of the pair.
    pub first: DsId,
    /// Second body, or `None` for an environment contact.
    pub second: Option<DsId>,
    /// Collaborator-assigned feature index.
    pub feature: u32,
}

/// One contact reported by the geometric collaborator for the current
/// frame: the core consumes only this geometry and never looks at
/// shapes.
#[derive(Debug, Clone, Copy)]
pub struct ContactEvent {
    /// First body.
    pub first: DsId,
    /// Second body, or `None` for a contact against the static
    /// environment.
    pub second: Option<DsId>,
    /// Feature index within the pair.
    pub feature: u32,
    /// Contact normal, pointing from the second side toward the first
    /// body.
    pub normal: Vector3<f64>,
    /// Surface point on the first body (world frame).
    pub point_first: Vector3<f64>,
    /// Surface point on the second side (world frame).
    pub point_second: Vector3<f64>,
    /// Signed gap: positive when separated, negative when penetrating.
    pub signed_gap: f64,
    /// Restitution coefficient for the impact law.
    pub restitution: f64,
    /// Friction coefficient; `Some` selects a 3-row friction contact.
    pub friction: Option<f64>,
}

impl ContactEvent {
    /// The persistent key of this contact.
    #[must_use]
    pub fn key(&self) -> ContactKey {
        ContactKey {
            first: self.first,
            second: self.second,
            feature: self.feature,
        }
    }

    /// Constraint dimension implied by the material parameters.
    #[must_use]
    pub fn dim(&self) -> usize {
        if self.friction.is_some() {
            3
        } else {
            1
        }
    }

    /// The non-smooth law implied by the material parameters.
    #[must_use]
    pub fn law(&self) -> NonSmoothLaw {
        match self.friction {
            Some(friction) => NonSmoothLaw::NewtonImpactFriction {
                restitution: self.restitution,
                friction,
            },
            None => NonSmoothLaw::NewtonImpact {
                restitution: self.restitution,
            },
        }
    }
}

/// The simulation world: exclusive owner of all bodies and interactions.
///
/// The interaction graph is rebuilt here whenever the set of active
/// interactions changes; the assembler only reads its structure and
/// fills in blocks.
#[derive(Debug, Default)]
pub struct World {
    config: SimulationConfig,
    bodies: Arena<DsId, DynamicalSystem>,
    interactions: Arena<InteractionId, Interaction>,
    contacts: HashMap<ContactKey, InteractionId>,
    graph: InteractionGraph,
    topology_dirty: bool,
    time: f64,
}

impl World {
    /// Create a world with the given configuration.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// The simulation configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Advance the clock by one step.
    pub fn advance_time(&mut self, h: f64) {
        self.time += h;
    }

    /// Add a body; its history buffer is sized from the configuration.
    pub fn add_body(&mut self, body: DynamicalSystem) -> DsId {
        let body = body.with_memory_depth(self.config.memory_depth);
        self.bodies.insert(body)
    }

    /// Remove a body together with every interaction that involves it.
    pub fn remove_body(&mut self, id: DsId) -> Option<DynamicalSystem> {
        let body = self.bodies.remove(id)?;

        let dependent: Vec<InteractionId> = self
            .interactions
            .iter()
            .filter(|(_, interaction)| interaction.involves(id))
            .map(|(interaction_id, _)| interaction_id)
            .collect();
        for interaction_id in dependent {
            if let Some(interaction) = self.interactions.remove(interaction_id) {
                if interaction.is_active() {
                    self.topology_dirty = true;
                }
            }
        }
        self.contacts
            .retain(|key, _| key.first != id && key.second != Some(id));

        debug!(body = %id, "removed body and its interactions");
        Some(body)
    }

    /// Shared access to a body.
    #[must_use]
    pub fn body(&self, id: DsId) -> Option<&DynamicalSystem> {
        self.bodies.get(id)
    }

    /// Mutable access to a body.
    pub fn body_mut(&mut self, id: DsId) -> Option<&mut DynamicalSystem> {
        self.bodies.get_mut(id)
    }

    /// The body arena.
    #[must_use]
    pub fn bodies(&self) -> &Arena<DsId, DynamicalSystem> {
        &self.bodies
    }

    /// Mutable body arena.
    pub fn bodies_mut(&mut self) -> &mut Arena<DsId, DynamicalSystem> {
        &mut self.bodies
    }

    /// Add a non-contact interaction (joint, bilateral coupling, ...).
    ///
    /// # Errors
    ///
    /// Dangling handles and relation/law mismatches are fatal
    /// configuration errors.
    pub fn add_interaction(
        &mut self,
        first: DsId,
        second: Option<DsId>,
        relation: Relation,
        law: NonSmoothLaw,
    ) -> Result<InteractionId> {
        let first_body = self.bodies.get(first).ok_or(NsmError::UnknownBody(first))?;
        let second_body = match second {
            Some(id) => Some(self.bodies.get(id).ok_or(NsmError::UnknownBody(id))?),
            None => None,
        };
        let mut interaction =
            Interaction::new(first, second, relation, law, first_body, second_body)?;
        interaction.update_output(first_body, second_body);
        Ok(self.interactions.insert(interaction))
    }

    /// Remove an interaction.
    pub fn remove_interaction(&mut self, id: InteractionId) -> Option<Interaction> {
        let interaction = self.interactions.remove(id)?;
        if interaction.is_active() {
            self.topology_dirty = true;
        }
        self.contacts.retain(|_, interaction_id| *interaction_id != id);
        Some(interaction)
    }

    /// Shared access to an interaction.
    #[must_use]
    pub fn interaction(&self, id: InteractionId) -> Option<&Interaction> {
        self.interactions.get(id)
    }

    /// The interaction arena.
    #[must_use]
    pub fn interactions(&self) -> &Arena<InteractionId, Interaction> {
        &self.interactions
    }

    /// Mutable interaction arena.
    pub fn interactions_mut(&mut self) -> &mut Arena<InteractionId, Interaction> {
        &mut self.interactions
    }

    /// Number of interactions currently in the active index set.
    #[must_use]
    pub fn active_interaction_count(&self) -> usize {
        self.interactions
            .iter()
            .filter(|(_, interaction)| interaction.is_active())
            .count()
    }

    /// Reconcile the contact set with this frame's events from the
    /// geometric collaborator: create interactions for new contacts,
    /// refresh the geometry of persisting ones, and destroy the ones
    /// that separated.
    ///
    /// # Errors
    ///
    /// Dangling handles and unsupported body kinds are fatal.
    pub fn sync_contacts(&mut self, events: &[ContactEvent]) -> Result<()> {
        let mut seen: HashSet<ContactKey> = HashSet::with_capacity(events.len());

        for event in events {
            let key = event.key();
            seen.insert(key);

            let relation = self.contact_relation(event)?;
            let first_body = self
                .bodies
                .get(event.first)
                .ok_or(NsmError::UnknownBody(event.first))?;
            let second_body = match event.second {
                Some(id) => Some(self.bodies.get(id).ok_or(NsmError::UnknownBody(id))?),
                None => None,
            };

            match self.contacts.get(&key) {
                Some(&id) => {
                    self.interactions
                        .get_mut(id)
                        .ok_or(NsmError::UnknownInteraction(id))?
                        .set_relation(relation, first_body, second_body)?;
                }
                None => {
                    let mut interaction = Interaction::new(
                        event.first,
                        event.second,
                        relation,
                        event.law(),
                        first_body,
                        second_body,
                    )?;
                    interaction.update_output(first_body, second_body);
                    let id = self.interactions.insert(interaction);
                    self.contacts.insert(key, id);
                    debug!(contact = %id, body = %event.first, "new contact");
                }
            }
        }

        let stale: Vec<ContactKey> = self
            .contacts
            .keys()
            .filter(|key| !seen.contains(key))
            .copied()
            .collect();
        for key in stale {
            if let Some(id) = self.contacts.remove(&key) {
                if let Some(interaction) = self.interactions.remove(id) {
                    if interaction.is_active() {
                        self.topology_dirty = true;
                    }
                }
                debug!(contact = %id, "contact separated");
            }
        }
        Ok(())
    }

    /// Build the relation for a contact event from the first body's
    /// coordinate kind.
    fn contact_relation(&self, event: &ContactEvent) -> Result<Relation> {
        let first = self
            .bodies
            .get(event.first)
            .ok_or(NsmError::UnknownBody(event.first))?;
        let second = match event.second {
            Some(id) => Some(self.bodies.get(id).ok_or(NsmError::UnknownBody(id))?),
            None => None,
        };

        match first.kind() {
            DynamicsKind::NewtonEuler => Ok(Relation::NewtonEulerContact(ContactFrame::new(
                event.normal,
                event.point_first,
                event.point_second,
                first,
                second,
                event.dim(),
            )?)),
            DynamicsKind::LagrangianLinear | DynamicsKind::Lagrangian => {
                // Point-mass contact: only 3-dof translational bodies can
                // carry a world-space contact normal.
                if first.ndof_v() != 3 {
                    return Err(NsmError::UnsupportedContactGeometry { body: event.first });
                }
                if let (Some(body), Some(id)) = (second, event.second) {
                    if body.ndof_v() != 3 {
                        return Err(NsmError::UnsupportedContactGeometry { body: id });
                    }
                }
                let norm = event.normal.norm();
                if norm <= f64::EPSILON {
                    return Err(NsmError::invalid_config("contact normal must be nonzero"));
                }
                let normal = event.normal / norm;
                let dim = event.dim();

                let mut rows = vec![normal];
                if dim == 3 {
                    let (t1, t2) = tangent_basis(&normal);
                    rows.push(t1);
                    rows.push(t2);
                }
                let mut c = DMatrix::zeros(dim, 3);
                for (row, axis) in rows.iter().enumerate() {
                    for k in 0..3 {
                        c[(row, k)] = axis[k];
                    }
                }

                // Calibrate the offset so the linearized gap equals the
                // reported signed gap at creation time.
                let mut normal_gap =
                    normal.dot(&Vector3::new(first.q()[0], first.q()[1], first.q()[2]));
                if let Some(body) = second {
                    normal_gap -=
                        normal.dot(&Vector3::new(body.q()[0], body.q()[1], body.q()[2]));
                }
                let mut offset = DVector::zeros(dim);
                offset[0] = event.signed_gap - normal_gap;

                let mut map = LinearMap::new(c.clone(), offset)?;
                if second.is_some() {
                    map = map.with_second(-c)?;
                }
                Ok(Relation::LagrangianLinear(map))
            }
        }
    }

    /// Whether the vertex set of the graph is out of date.
    #[must_use]
    pub fn topology_dirty(&self) -> bool {
        self.topology_dirty
    }

    /// Mark the graph as out of date (activation change).
    pub fn mark_topology_dirty(&mut self) {
        self.topology_dirty = true;
    }

    /// Rebuild the graph from the active interactions when needed;
    /// returns whether a rebuild happened.
    pub fn rebuild_graph_if_dirty(&mut self) -> bool {
        if !self.topology_dirty {
            return false;
        }
        self.graph.rebuild(&self.interactions);
        self.topology_dirty = false;
        debug!(
            vertices = self.graph.vertex_count(),
            edges = self.graph.edge_count(),
            "interaction graph rebuilt"
        );
        true
    }

    /// The interaction graph.
    #[must_use]
    pub fn graph(&self) -> &InteractionGraph {
        &self.graph
    }

    /// Refresh every interaction's `y`/`ẏ` from the bodies' current
    /// state.
    ///
    /// # Errors
    ///
    /// Dangling body handles are fatal.
    pub fn refresh_interaction_outputs(&mut self) -> Result<()> {
        let bodies = &self.bodies;
        for (_, interaction) in self.interactions.iter_mut() {
            let first = bodies
                .get(interaction.first())
                .ok_or(NsmError::UnknownBody(interaction.first()))?;
            let second = match interaction.second() {
                Some(id) => Some(bodies.get(id).ok_or(NsmError::UnknownBody(id))?),
                None => None,
            };
            interaction.update_output(first, second);
        }
        Ok(())
    }

    /// Total kinetic energy of all bodies.
    #[must_use]
    pub fn total_kinetic_energy(&self) -> f64 {
        self.bodies
            .iter()
            .map(|(_, body)| body.kinetic_energy())
            .sum()
    }

    /// Split borrows for block assembly: mutable graph, shared arenas.
    pub(crate) fn assembly_parts(
        &mut self,
    ) -> (
        &mut InteractionGraph,
        &Arena<InteractionId, Interaction>,
        &Arena<DsId, DynamicalSystem>,
    ) {
        (&mut self.graph, &self.interactions, &self.bodies)
    }

    /// Split borrows for multiplier scatter: shared graph, mutable
    /// arenas.
    pub(crate) fn scatter_parts(
        &mut self,
    ) -> (
        &InteractionGraph,
        &mut Arena<InteractionId, Interaction>,
        &mut Arena<DsId, DynamicalSystem>,
    ) {
        (&self.graph, &mut self.interactions, &mut self.bodies)
    }
}
