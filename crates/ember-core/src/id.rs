//! Host-issued entity handles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to an entity owned by the host world.
///
/// The host allocates these when the particle runtime asks for a new
/// entity; Ember never invents handles on its own, so two independent
/// hosts can hand out overlapping values without interfering.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityHandle(pub u64);

impl EntityHandle {
    /// Create a handle from a raw value
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityHandle({})", self.0)
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
