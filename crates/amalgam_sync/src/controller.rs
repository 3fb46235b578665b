//! # Entity Controller
//!
//! The seam between the composition engine and whatever owns transforms,
//! navigation, physics and replication of the actual game objects.
//!
//! ```text
//! amalgam_sync calls:        the host implements:
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │ trait EntityController│ ← │ impl EntityController│
//! └──────────────────────┘   └──────────────────────┘
//! ```
//!
//! The engine never owns positions or agents itself. Transition groups
//! drive them through this trait every tick.

use std::collections::HashMap;

use amalgam_core::{UnitId, Vec3};

// ============================================================================
// REPLICATION MODE
// ============================================================================

/// How a unit's transform is replicated while it is on screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReplicationMode {
    /// Owner-driven transform sync.
    #[default]
    Sync,
    /// Transform sync suspended; every peer animates locally.
    None,
}

// ============================================================================
// CONTROLLER TRAIT
// ============================================================================

/// Operations the engine needs on a unit's scene object.
///
/// Implementations must tolerate calls for units they do not know: such
/// calls are no-ops and reads return `None`.
pub trait EntityController: Send {
    /// Halts navigation.
    fn stop_motion(&mut self, unit: UnitId);

    /// Resumes navigation.
    fn resume_motion(&mut self, unit: UnitId);

    /// Drops the current navigation path.
    fn reset_path(&mut self, unit: UnitId);

    /// Enables or disables the collider.
    fn set_collision_enabled(&mut self, unit: UnitId, enabled: bool);

    /// Switches transform replication.
    fn set_replication_mode(&mut self, unit: UnitId, mode: ReplicationMode);

    /// World position.
    fn position(&self, unit: UnitId) -> Option<Vec3>;

    /// Moves the unit.
    fn set_position(&mut self, unit: UnitId, position: Vec3);

    /// Local scale.
    fn scale(&self, unit: UnitId) -> Option<Vec3>;

    /// Rescales the unit.
    fn set_scale(&mut self, unit: UnitId, scale: Vec3);

    /// Creates the scene object for a unit.
    fn spawn(&mut self, unit: UnitId, position: Vec3, scale: Vec3);

    /// Destroys the scene object for a unit.
    fn despawn(&mut self, unit: UnitId);
}

// ============================================================================
// MOCK IMPLEMENTATION (for testing and the simulator)
// ============================================================================

/// Recorded state of one scene object.
#[derive(Clone, Debug, PartialEq)]
pub struct MockEntity {
    /// World position.
    pub position: Vec3,
    /// Local scale.
    pub scale: Vec3,
    /// Navigation running.
    pub moving: bool,
    /// Times the path was reset.
    pub path_resets: u32,
    /// Collider enabled.
    pub collision: bool,
    /// Replication mode.
    pub replication: ReplicationMode,
}

impl MockEntity {
    fn new(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            moving: true,
            path_resets: 0,
            collision: true,
            replication: ReplicationMode::Sync,
        }
    }
}

/// In-memory controller that records every call.
#[derive(Clone, Debug, Default)]
pub struct MockEntityController {
    entities: HashMap<UnitId, MockEntity>,
    despawned: Vec<UnitId>,
}

impl MockEntityController {
    /// Creates an empty controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded state of a unit.
    #[must_use]
    pub fn entity(&self, unit: UnitId) -> Option<&MockEntity> {
        self.entities.get(&unit)
    }

    /// True if a scene object exists for the unit.
    #[must_use]
    pub fn is_spawned(&self, unit: UnitId) -> bool {
        self.entities.contains_key(&unit)
    }

    /// Number of live scene objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if there are no scene objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Units whose scene objects were destroyed, in order.
    #[must_use]
    pub fn despawned(&self) -> &[UnitId] {
        &self.despawned
    }

    fn with_entity(&mut self, unit: UnitId, f: impl FnOnce(&mut MockEntity)) {
        if let Some(entity) = self.entities.get_mut(&unit) {
            f(entity);
        }
    }
}

impl EntityController for MockEntityController {
    fn stop_motion(&mut self, unit: UnitId) {
        self.with_entity(unit, |e| e.moving = false);
    }

    fn resume_motion(&mut self, unit: UnitId) {
        self.with_entity(unit, |e| e.moving = true);
    }

    fn reset_path(&mut self, unit: UnitId) {
        self.with_entity(unit, |e| e.path_resets += 1);
    }

    fn set_collision_enabled(&mut self, unit: UnitId, enabled: bool) {
        self.with_entity(unit, |e| e.collision = enabled);
    }

    fn set_replication_mode(&mut self, unit: UnitId, mode: ReplicationMode) {
        self.with_entity(unit, |e| e.replication = mode);
    }

    fn position(&self, unit: UnitId) -> Option<Vec3> {
        self.entities.get(&unit).map(|e| e.position)
    }

    fn set_position(&mut self, unit: UnitId, position: Vec3) {
        self.with_entity(unit, |e| e.position = position);
    }

    fn scale(&self, unit: UnitId) -> Option<Vec3> {
        self.entities.get(&unit).map(|e| e.scale)
    }

    fn set_scale(&mut self, unit: UnitId, scale: Vec3) {
        self.with_entity(unit, |e| e.scale = scale);
    }

    fn spawn(&mut self, unit: UnitId, position: Vec3, scale: Vec3) {
        self.entities
            .entry(unit)
            .or_insert_with(|| MockEntity::new(position, scale));
    }

    fn despawn(&mut self, unit: UnitId) {
        if self.entities.remove(&unit).is_some() {
            self.despawned.push(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_calls() {
        let mut controller = MockEntityController::new();
        let id = UnitId::new(0, 0);
        controller.spawn(id, Vec3::new(1.0, 0.0, 2.0), Vec3::ONE);

        controller.stop_motion(id);
        controller.reset_path(id);
        controller.set_collision_enabled(id, false);
        controller.set_replication_mode(id, ReplicationMode::None);

        let e = controller.entity(id).unwrap();
        assert!(!e.moving);
        assert_eq!(e.path_resets, 1);
        assert!(!e.collision);
        assert_eq!(e.replication, ReplicationMode::None);
    }

    #[test]
    fn test_unknown_unit_is_noop() {
        let mut controller = MockEntityController::new();
        let ghost = UnitId::new(9, 9);
        controller.set_position(ghost, Vec3::ONE);
        controller.despawn(ghost);

        assert!(controller.position(ghost).is_none());
        assert!(controller.is_empty());
        assert!(controller.despawned().is_empty());
    }

    #[test]
    fn test_spawn_is_idempotent() {
        let mut controller = MockEntityController::new();
        let id = UnitId::new(1, 0);
        controller.spawn(id, Vec3::ZERO, Vec3::ONE);
        controller.set_position(id, Vec3::splat(3.0));
        controller.spawn(id, Vec3::ZERO, Vec3::ONE);

        assert_eq!(controller.position(id), Some(Vec3::splat(3.0)));
        assert_eq!(controller.len(), 1);
    }
}
