//! # Unit Registry
//!
//! Generational slot arena holding every unit a peer knows about.
//!
//! The authority allocates handles with [`UnitRegistry::spawn`]; replicas
//! mirror them with [`UnitRegistry::insert_replica`] so a handle means the
//! same unit on every peer.
//!
//! # Thread Safety
//!
//! The registry is NOT thread-safe. It is owned and mutated by a single tick
//! loop, which is what makes taking a transition lock atomic with the
//! validation that precedes it.

use super::{PeerId, Unit, UnitId};

#[derive(Clone, Debug, Default)]
struct Slot {
    generation: u32,
    unit: Option<Unit>,
}

/// Generational arena of units.
#[derive(Clone, Debug, Default)]
pub struct UnitRegistry {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
}

impl UnitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with room for `capacity` units.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Number of live units.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// True if there are no live units.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Stores a new unit and returns its handle.
    pub fn spawn(&mut self, unit: Unit) -> UnitId {
        self.live += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.unit = Some(unit);
            return UnitId::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            unit: Some(unit),
        });
        UnitId::new(index, 0)
    }

    /// Stores a unit at a handle assigned by the authority.
    ///
    /// Overwrites a live unit with the same handle (a state refresh). Returns
    /// `false` and leaves the registry untouched if the slot has already
    /// moved past `id`'s generation, i.e. the unit is known to be destroyed.
    pub fn insert_replica(&mut self, id: UnitId, unit: Unit) -> bool {
        let index = id.index() as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, Slot::default);
        }

        let slot = &mut self.slots[index];
        if slot.generation > id.generation() {
            return false;
        }
        if slot.generation < id.generation() && slot.unit.take().is_some() {
            self.live -= 1;
        }
        slot.generation = id.generation();
        if slot.unit.replace(unit).is_none() {
            self.live += 1;
        }
        self.free_list.retain(|&free| free != id.index());
        true
    }

    /// Removes a unit. Its handle (and every copy of it) resolves to `None`
    /// from now on.
    pub fn despawn(&mut self, id: UnitId) -> Option<Unit> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }

        let unit = slot.unit.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index());
        self.live -= 1;
        Some(unit)
    }

    /// Resolves a handle.
    #[must_use]
    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.unit.as_ref()
    }

    /// Resolves a handle mutably.
    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.unit.as_mut()
    }

    /// Resolves two distinct handles mutably at once.
    ///
    /// Returns `None` if either handle is gone or both name the same slot.
    pub fn get_pair_mut(&mut self, a: UnitId, b: UnitId) -> Option<(&mut Unit, &mut Unit)> {
        let (ia, ib) = (a.index() as usize, b.index() as usize);
        if ia == ib || !self.contains(a) || !self.contains(b) {
            return None;
        }

        let (low, high) = if ia < ib { (ia, ib) } else { (ib, ia) };
        let (head, tail) = self.slots.split_at_mut(high);
        let first = head[low].unit.as_mut()?;
        let second = tail[0].unit.as_mut()?;
        if ia < ib {
            Some((first, second))
        } else {
            Some((second, first))
        }
    }

    /// True if the handle resolves to a live unit.
    #[must_use]
    pub fn contains(&self, id: UnitId) -> bool {
        self.get(id).is_some()
    }

    /// Iterates over all live units.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &Unit)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.unit
                .as_ref()
                .map(|unit| (UnitId::new(index as u32, slot.generation), unit))
        })
    }

    /// Number of live units owned by `owner`.
    #[must_use]
    pub fn count_owned_by(&self, owner: PeerId) -> usize {
        self.iter().filter(|(_, unit)| unit.owner == owner).count()
    }
}
