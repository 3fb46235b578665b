//! # Unit Handles
//!
//! Units are addressed by lightweight handles consisting of:
//! - An index into the registry's slot array
//! - A generation counter so a handle to a destroyed unit never aliases the
//!   slot's next occupant

use serde::{Deserialize, Serialize};

/// Unique handle for a unit.
///
/// The handle is split into two parts:
/// - Lower 32 bits: slot index
/// - Upper 32 bits: generation of that slot when the unit was spawned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UnitId(u64);

impl UnitId {
    /// Creates a handle from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the handle.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw 64-bit value, as carried on the wire.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuilds a handle from its raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}
