//! Stable handles for simulation entities.
//!
//! Bodies and interactions live in arenas owned by the simulation world;
//! everything else refers to them through these copyable handles. The
//! graph stores handles, never owning pointers, so ownership stays with
//! the arenas.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unique identifier for a dynamical system (body) in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DsId(pub u32);

impl DsId {
    /// Create a new body ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for DsId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ds({})", self.0)
    }
}

/// Unique identifier for an interaction (constraint instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InteractionId(pub u32);

impl InteractionId {
    /// Create a new interaction ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for InteractionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for InteractionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interaction({})", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = DsId::new(7);
        assert_eq!(id.raw(), 7);
        assert_eq!(DsId::from(7), id);
        assert_eq!(id.to_string(), "Ds(7)");
    }

    #[test]
    fn test_ids_are_distinct_types() {
        let a = InteractionId::new(3);
        assert_eq!(a.to_string(), "Interaction(3)");
        assert_eq!(a, InteractionId::new(3));
    }
}
