//! Interactions: one constraint instance between one or two bodies.

use nalgebra::DVector;

use nsm_types::{DsId, NsmError, Result, NUM_LEVELS, POSITION_LEVEL, VELOCITY_LEVEL};

use crate::law::NonSmoothLaw;
use crate::relation::Relation;
use crate::system::DynamicalSystem;

/// Activation state of an interaction.
///
/// Driven exclusively by the integrator's predicted-gap test
/// `y + γ·h·ẏ <= 0`. The test is one-sided with no hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    /// The constraint does not take part in the current non-smooth
    /// problem.
    #[default]
    Inactive,
    /// The constraint is assembled into the current non-smooth problem.
    Active,
}

/// One constraint instance: relation + law + per-level outputs and
/// multipliers.
///
/// Interactions are created when the geometric collaborator reports a new
/// proximity and destroyed when it reports separation; they persist across
/// steps while the contact persists, which is what makes multiplier
/// warm-starting meaningful.
#[derive(Debug)]
pub struct Interaction {
    first: DsId,
    second: Option<DsId>,
    relation: Relation,
    law: NonSmoothLaw,
    y: Vec<DVector<f64>>,
    lambda: Vec<DVector<f64>>,
    activation: ActivationState,
}

impl Interaction {
    /// Create an interaction and validate relation/law/body compatibility.
    ///
    /// # Errors
    ///
    /// Any dimension or parameter mismatch is a fatal configuration
    /// error.
    pub fn new(
        first: DsId,
        second: Option<DsId>,
        relation: Relation,
        law: NonSmoothLaw,
        first_body: &DynamicalSystem,
        second_body: Option<&DynamicalSystem>,
    ) -> Result<Self> {
        relation.validate(first_body, second_body)?;
        law.validate(relation.dim())?;
        if second.is_some() != second_body.is_some() {
            return Err(NsmError::invalid_config(
                "interaction body handles and bodies disagree",
            ));
        }

        let m = relation.dim();
        Ok(Self {
            first,
            second,
            relation,
            law,
            y: (0..NUM_LEVELS).map(|_| DVector::zeros(m)).collect(),
            lambda: (0..NUM_LEVELS).map(|_| DVector::zeros(m)).collect(),
            activation: ActivationState::Inactive,
        })
    }

    /// Constraint dimension `m`.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.relation.dim()
    }

    /// Handle of the first connected body.
    #[must_use]
    pub fn first(&self) -> DsId {
        self.first
    }

    /// Handle of the second connected body, when present.
    #[must_use]
    pub fn second(&self) -> Option<DsId> {
        self.second
    }

    /// Both body handles in order.
    #[must_use]
    pub fn bodies(&self) -> (DsId, Option<DsId>) {
        (self.first, self.second)
    }

    /// Whether the interaction involves the given body.
    #[must_use]
    pub fn involves(&self, ds: DsId) -> bool {
        self.first == ds || self.second == Some(ds)
    }

    /// The constraint relation.
    #[must_use]
    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    /// The non-smooth law.
    #[must_use]
    pub fn law(&self) -> &NonSmoothLaw {
        &self.law
    }

    /// Constraint output at the given level (0 = gap, 1 = gap rate).
    #[must_use]
    pub fn y(&self, level: usize) -> &DVector<f64> {
        &self.y[level]
    }

    /// Multiplier at the given level.
    #[must_use]
    pub fn lambda(&self, level: usize) -> &DVector<f64> {
        &self.lambda[level]
    }

    /// Overwrite the multiplier at the given level.
    pub fn set_lambda(&mut self, level: usize, lambda: DVector<f64>) {
        debug_assert_eq!(lambda.len(), self.dim());
        self.lambda[level] = lambda;
    }

    /// Current activation state.
    #[must_use]
    pub fn activation(&self) -> ActivationState {
        self.activation
    }

    /// Whether the interaction is part of the active index set.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.activation == ActivationState::Active
    }

    /// Set the activation state; returns whether it changed.
    pub fn set_activation(&mut self, state: ActivationState) -> bool {
        let changed = self.activation != state;
        self.activation = state;
        changed
    }

    /// Refresh `y[0]` (gap) and `y[1]` (gap rate) from the bodies'
    /// current state.
    pub fn update_output(
        &mut self,
        first: &DynamicalSystem,
        second: Option<&DynamicalSystem>,
    ) {
        self.y[POSITION_LEVEL] = self.relation.gap(first, second);
        self.y[VELOCITY_LEVEL] = self.relation.output_velocity(first, second);
    }

    /// Predicted normal gap `y + γ·h·ẏ` used by the activation test.
    #[must_use]
    pub fn predicted_gap(&self, gamma: f64, h: f64) -> f64 {
        self.y[POSITION_LEVEL][0] + gamma * h * self.y[VELOCITY_LEVEL][0]
    }

    /// Replace the relation with one of the same dimension (contact
    /// geometry refresh from the collision collaborator), keeping the
    /// multipliers for warm starting.
    ///
    /// # Errors
    ///
    /// The new relation must validate against the connected bodies and
    /// keep the constraint dimension unchanged.
    pub fn set_relation(
        &mut self,
        relation: Relation,
        first_body: &DynamicalSystem,
        second_body: Option<&DynamicalSystem>,
    ) -> Result<()> {
        relation.validate(first_body, second_body)?;
        if relation.dim() != self.dim() {
            return Err(NsmError::DimensionMismatch {
                context: "relation refresh",
                expected: self.dim(),
                actual: relation.dim(),
            });
        }
        self.relation = relation;
        Ok(())
    }

    /// Zero the multipliers at every level (used when an interaction
    /// deactivates, so stale impulses are not warm-started later).
    pub fn clear_lambda(&mut self) {
        for lambda in &mut self.lambda {
            lambda.fill(0.0);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::relation::LinearMap;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn ground_contact(z: f64, vz: f64) -> (Interaction, DynamicalSystem) {
        let body = DynamicalSystem::lagrangian_linear(
            DMatrix::identity(1, 1),
            DVector::from_element(1, z),
            DVector::from_element(1, vz),
        )
        .unwrap();
        let relation = Relation::LagrangianLinear(
            LinearMap::new(DMatrix::identity(1, 1), DVector::zeros(1)).unwrap(),
        );
        let interaction = Interaction::new(
            DsId::new(0),
            None,
            relation,
            NonSmoothLaw::NewtonImpact { restitution: 0.0 },
            &body,
            None,
        )
        .unwrap();
        (interaction, body)
    }

    #[test]
    fn test_new_validates_law_against_relation() {
        let body = DynamicalSystem::lagrangian_linear(
            DMatrix::identity(1, 1),
            DVector::zeros(1),
            DVector::zeros(1),
        )
        .unwrap();
        let relation = Relation::LagrangianLinear(
            LinearMap::new(DMatrix::identity(1, 1), DVector::zeros(1)).unwrap(),
        );
        // Friction law needs a 3-row relation.
        let result = Interaction::new(
            DsId::new(0),
            None,
            relation,
            NonSmoothLaw::NewtonImpactFriction {
                restitution: 0.0,
                friction: 0.5,
            },
            &body,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_update_output_and_predicted_gap() {
        let (mut interaction, body) = ground_contact(0.01, -1.0);
        interaction.update_output(&body, None);

        assert_relative_eq!(interaction.y(POSITION_LEVEL)[0], 0.01, epsilon = 1e-12);
        assert_relative_eq!(interaction.y(VELOCITY_LEVEL)[0], -1.0, epsilon = 1e-12);
        // Spec scenario: y=0.01, ẏ=−1, h=0.01, γ=0.5 → predicted 0.005.
        assert_relative_eq!(interaction.predicted_gap(0.5, 0.01), 0.005, epsilon = 1e-12);
    }

    #[test]
    fn test_activation_transitions() {
        let (mut interaction, _) = ground_contact(0.0, 0.0);
        assert!(!interaction.is_active());

        assert!(interaction.set_activation(ActivationState::Active));
        assert!(interaction.is_active());
        // Setting the same state again reports no change.
        assert!(!interaction.set_activation(ActivationState::Active));
    }

    #[test]
    fn test_clear_lambda() {
        let (mut interaction, _) = ground_contact(0.0, 0.0);
        interaction.set_lambda(VELOCITY_LEVEL, DVector::from_element(1, 4.2));
        interaction.clear_lambda();
        assert_eq!(interaction.lambda(VELOCITY_LEVEL)[0], 0.0);
    }
}
