//! # Selection
//!
//! The ordered list of units the local player has picked. Order matters:
//! the pairing resolver scans it front to back.

use amalgam_core::UnitId;

/// Source of the local player's current selection.
pub trait SelectionProvider: Send {
    /// Selected units in selection order.
    fn selected(&self) -> Vec<UnitId>;

    /// Removes a unit from the selection (it joined a transition or died).
    fn deselect(&mut self, unit: UnitId);
}

/// A plain ordered selection list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    units: Vec<UnitId>,
}

impl Selection {
    /// Creates an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit unless it is already selected.
    pub fn select(&mut self, unit: UnitId) {
        if !self.units.contains(&unit) {
            self.units.push(unit);
        }
    }

    /// Replaces the whole selection.
    pub fn set(&mut self, units: impl IntoIterator<Item = UnitId>) {
        self.units.clear();
        for unit in units {
            self.select(unit);
        }
    }

    /// Empties the selection.
    pub fn clear(&mut self) {
        self.units.clear();
    }

    /// Number of selected units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True if nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl SelectionProvider for Selection {
    fn selected(&self) -> Vec<UnitId> {
        self.units.clone()
    }

    fn deselect(&mut self, unit: UnitId) {
        self.units.retain(|u| *u != unit);
    }
}
