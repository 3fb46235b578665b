//! # Transition Groups
//!
//! One record per in-flight merge or split on one peer. Groups are never
//! replicated; every peer builds its own from the authority's broadcast and
//! animates it locally.
//!
//! ## Lifecycle
//!
//! ```text
//! begin() ──> update() x N ──> finish()
//!   stop agents     lerp by elapsed     resume agents
//!   replication off                     replication on
//! ```
//!
//! `elapsed` runs from 0 and is normalized by the duration, so `1.0` means
//! done. It is never clamped back; interpolation clamps its factor instead.

use amalgam_core::{TransitionId, TransitionKind, UnitId, UnitRegistry, Vec3};
use tracing::warn;

use crate::controller::{EntityController, ReplicationMode};

// ============================================================================
// PROGRESS
// ============================================================================

/// Normalized elapsed time of a transition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    elapsed: f64,
    duration: f64,
}

impl Progress {
    /// Starts at zero for a transition lasting `duration_secs`.
    #[must_use]
    pub fn new(duration_secs: f32) -> Self {
        Self {
            elapsed: 0.0,
            duration: f64::from(duration_secs),
        }
    }

    /// Normalized elapsed time. `>= 1.0` means complete.
    #[inline]
    #[must_use]
    pub const fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Duration in seconds.
    #[inline]
    #[must_use]
    pub const fn duration(&self) -> f64 {
        self.duration
    }

    /// True once the transition has run its full duration.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.elapsed >= 1.0
    }

    /// Interpolation factor for this tick.
    #[inline]
    #[must_use]
    pub fn factor(&self) -> f32 {
        self.elapsed as f32
    }

    /// Adds one tick of `dt` seconds. A non-positive duration completes at
    /// once.
    pub fn advance(&mut self, dt: f64) {
        if self.duration <= 0.0 {
            self.force_complete();
        } else {
            self.elapsed += dt.max(0.0) / self.duration;
        }
    }

    /// Jumps to completion without ever moving backwards.
    pub fn force_complete(&mut self) {
        if self.elapsed < 1.0 {
            self.elapsed = 1.0;
        }
    }
}

/// Puts a participant on hold for the length of a transition.
fn hold(unit: UnitId, registry: &mut UnitRegistry, controller: &mut dyn EntityController) {
    controller.stop_motion(unit);
    controller.reset_path(unit);
    controller.set_replication_mode(unit, ReplicationMode::None);
    if let Some(u) = registry.get_mut(unit) {
        u.selected = false;
    }
}

/// Hands a participant back to navigation and transform sync.
fn release(unit: UnitId, controller: &mut dyn EntityController) {
    controller.resume_motion(unit);
    controller.set_replication_mode(unit, ReplicationMode::Sync);
}

/// Checks that every participant still resolves. Force-completes otherwise.
fn participants_live(
    transition: TransitionId,
    units: [UnitId; 2],
    registry: &mut UnitRegistry,
    progress: &mut Progress,
) -> bool {
    for unit in units {
        match registry.get_mut(unit) {
            Some(u) => u.selected = false,
            None => {
                warn!(%transition, %unit, "participant gone, completing transition early");
                progress.force_complete();
                return false;
            }
        }
    }
    true
}

// ============================================================================
// MERGE
// ============================================================================

/// Two units sliding to their midpoint while the owner grows.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeGroup {
    transition: TransitionId,
    owner: UnitId,
    merging: UnitId,
    owner_start: Vec3,
    merging_start: Vec3,
    origin: Vec3,
    owner_scale: Vec3,
    merging_scale: Vec3,
    scaling: f32,
    progress: Progress,
}

impl MergeGroup {
    /// Captures start positions and scales, then puts both units on hold.
    ///
    /// The owner's collider is disabled for the whole merge.
    pub fn begin(
        transition: TransitionId,
        owner: UnitId,
        merging: UnitId,
        duration_secs: f32,
        scaling: f32,
        registry: &mut UnitRegistry,
        controller: &mut dyn EntityController,
    ) -> Self {
        let owner_start = controller.position(owner).unwrap_or(Vec3::ZERO);
        let merging_start = controller.position(merging).unwrap_or(owner_start);
        let owner_scale = controller.scale(owner).unwrap_or(Vec3::ONE);
        let merging_scale = controller.scale(merging).unwrap_or(Vec3::ONE);

        hold(owner, registry, controller);
        hold(merging, registry, controller);
        controller.set_collision_enabled(owner, false);

        Self {
            transition,
            owner,
            merging,
            owner_start,
            merging_start,
            origin: owner_start.midpoint(merging_start),
            owner_scale,
            merging_scale,
            scaling,
            progress: Progress::new(duration_secs),
        }
    }

    /// Surviving unit.
    #[must_use]
    pub const fn owner(&self) -> UnitId {
        self.owner
    }

    /// Consumed unit.
    #[must_use]
    pub const fn merging(&self) -> UnitId {
        self.merging
    }

    /// Meeting point of the two units.
    #[must_use]
    pub const fn origin(&self) -> Vec3 {
        self.origin
    }

    fn update(&mut self, registry: &mut UnitRegistry, controller: &mut dyn EntityController) {
        if !participants_live(
            self.transition,
            [self.owner, self.merging],
            registry,
            &mut self.progress,
        ) {
            return;
        }

        let t = self.progress.factor();
        controller.stop_motion(self.owner);
        controller.stop_motion(self.merging);

        controller.set_position(self.owner, self.owner_start.lerp(self.origin, t));
        controller.set_position(self.merging, self.merging_start.lerp(self.origin, t));

        let grown = |scale: Vec3| scale.lerp(scale.scaled(self.scaling), t).with_y(scale.y);
        controller.set_scale(self.owner, grown(self.owner_scale));
        controller.set_scale(self.merging, grown(self.merging_scale));
    }

    fn finish(&self, controller: &mut dyn EntityController) {
        controller.set_collision_enabled(self.owner, true);
        release(self.owner, controller);
        release(self.merging, controller);
    }
}

// ============================================================================
// SPLIT
// ============================================================================

/// One unit and its freshly spawned twin drifting apart.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitGroup {
    transition: TransitionId,
    owner: UnitId,
    split: UnitId,
    origin: Vec3,
    offset: Vec3,
    progress: Progress,
}

impl SplitGroup {
    /// Computes the outward offset and puts both units on hold.
    ///
    /// The offset is `(radius, radius, radius)` turned by `angle_degrees`
    /// about the vertical axis, flattened to the ground plane. The owner
    /// travels along `+offset`, the twin along `-offset`.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        transition: TransitionId,
        owner: UnitId,
        split: UnitId,
        duration_secs: f32,
        angle_degrees: f32,
        radius: f32,
        registry: &mut UnitRegistry,
        controller: &mut dyn EntityController,
    ) -> Self {
        let origin = controller.position(owner).unwrap_or(Vec3::ZERO);
        let offset = Vec3::splat(radius).rotate_y(angle_degrees).with_y(0.0);

        hold(owner, registry, controller);
        hold(split, registry, controller);

        Self {
            transition,
            owner,
            split,
            origin,
            offset,
            progress: Progress::new(duration_secs),
        }
    }

    /// The unit that asked to split.
    #[must_use]
    pub const fn owner(&self) -> UnitId {
        self.owner
    }

    /// The spawned twin.
    #[must_use]
    pub const fn split(&self) -> UnitId {
        self.split
    }

    /// Outward offset travelled by the owner.
    #[must_use]
    pub const fn offset(&self) -> Vec3 {
        self.offset
    }

    fn update(&mut self, registry: &mut UnitRegistry, controller: &mut dyn EntityController) {
        if !participants_live(
            self.transition,
            [self.owner, self.split],
            registry,
            &mut self.progress,
        ) {
            return;
        }

        let t = self.progress.factor();
        controller.stop_motion(self.owner);
        controller.stop_motion(self.split);
        controller.set_position(self.owner, self.origin.lerp(self.origin + self.offset, t));
        controller.set_position(self.split, self.origin.lerp(self.origin - self.offset, t));
    }

    fn finish(&self, controller: &mut dyn EntityController) {
        release(self.owner, controller);
        release(self.split, controller);
    }
}

// ============================================================================
// GROUP ENUM
// ============================================================================

/// Any in-flight transition.
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionGroup {
    /// A merge.
    Merge(MergeGroup),
    /// A split.
    Split(SplitGroup),
}

impl TransitionGroup {
    /// Authority-assigned id.
    #[must_use]
    pub const fn transition(&self) -> TransitionId {
        match self {
            Self::Merge(g) => g.transition,
            Self::Split(g) => g.transition,
        }
    }

    /// Merge or split.
    #[must_use]
    pub const fn kind(&self) -> TransitionKind {
        match self {
            Self::Merge(_) => TransitionKind::Merge,
            Self::Split(_) => TransitionKind::Split,
        }
    }

    /// `[owner, partner]`, where the partner is the merging unit or the twin.
    #[must_use]
    pub const fn participants(&self) -> [UnitId; 2] {
        match self {
            Self::Merge(g) => [g.owner, g.merging],
            Self::Split(g) => [g.owner, g.split],
        }
    }

    /// Elapsed time.
    #[must_use]
    pub const fn progress(&self) -> &Progress {
        match self {
            Self::Merge(g) => &g.progress,
            Self::Split(g) => &g.progress,
        }
    }

    pub(crate) fn progress_mut(&mut self) -> &mut Progress {
        match self {
            Self::Merge(g) => &mut g.progress,
            Self::Split(g) => &mut g.progress,
        }
    }

    /// Applies one tick of interpolation at the current elapsed time.
    pub fn update(&mut self, registry: &mut UnitRegistry, controller: &mut dyn EntityController) {
        match self {
            Self::Merge(g) => g.update(registry, controller),
            Self::Split(g) => g.update(registry, controller),
        }
    }

    /// Restores navigation and replication on this peer.
    pub fn finish(&self, controller: &mut dyn EntityController) {
        match self {
            Self::Merge(g) => g.finish(controller),
            Self::Split(g) => g.finish(controller),
        }
    }
}
