//! # Attribute Table
//!
//! Per-rank multiplier rows consumed when a merge commits and when a
//! transition's duration is derived.
//!
//! ## Layout
//!
//! Every list is indexed by rank. Index 0 is never a valid rank and is
//! conventionally `0.0`. A table with `N` entries per list supports ranks
//! `1..N`, so `max_rank() == N - 1`.
//!
//! ```toml
//! capacity = 50
//! attack_cooldown_factor = 1.0
//! health         = [0.0, 1.0, 2.0, 1.8]
//! attack         = [0.0, 1.0, 2.0, 1.8]
//! speed          = [0.0, 1.0, 0.9, 0.9]
//! merge_duration = [0.0, 3.0, 3.5, 4.0]
//! split_duration = [0.0, 2.0, 2.0, 2.0]
//! ```
//!
//! ## Zero Means "No Data"
//!
//! A stat multiplier of exactly `0.0` is a sentinel for "this rank has no
//! entry for this stat". Commit code must skip such stats rather than zero
//! them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default unit capacity per player.
pub const DEFAULT_CAPACITY: usize = 50;

fn default_cooldown_factor() -> f32 {
    1.0
}

/// Multipliers for a single rank.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttributeRow {
    /// The rank this row belongs to.
    pub rank: u32,
    /// Health multiplier (applied to both max and current health).
    pub health: f32,
    /// Attack power multiplier.
    pub attack: f32,
    /// Movement speed multiplier.
    pub speed: f32,
    /// Merge duration in seconds.
    pub merge_duration: f32,
    /// Split duration in seconds.
    pub split_duration: f32,
}

impl AttributeRow {
    /// Applies `multiplier` to `value` unless the multiplier is the
    /// "no data" sentinel.
    #[inline]
    #[must_use]
    pub fn scale(value: f32, multiplier: f32) -> f32 {
        if multiplier == 0.0 {
            value
        } else {
            value * multiplier
        }
    }

    /// Floors `value * multiplier` for integer stats, honouring the sentinel.
    #[inline]
    #[must_use]
    pub fn scale_floor(value: i32, multiplier: f32) -> i32 {
        if multiplier == 0.0 {
            value
        } else {
            (value as f32 * multiplier).floor() as i32
        }
    }
}

/// Rank-indexed multiplier table plus the per-player unit capacity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeTable {
    /// Maximum number of live units a single player may own.
    pub capacity: usize,
    /// Factor applied to attack cooldown when a merge commits.
    #[serde(default = "default_cooldown_factor")]
    pub attack_cooldown_factor: f32,
    /// Health multipliers by rank.
    pub health: Vec<f32>,
    /// Attack multipliers by rank.
    pub attack: Vec<f32>,
    /// Speed multipliers by rank.
    pub speed: Vec<f32>,
    /// Merge durations (seconds) by rank.
    pub merge_duration: Vec<f32>,
    /// Split durations (seconds) by rank.
    pub split_duration: Vec<f32>,
}

impl AttributeTable {
    /// Parses and validates a table from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] for malformed TOML and
    /// [`CoreError::InvalidConfig`] if the table breaks an invariant.
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        let table: Self = toml::from_str(text)?;
        table.validate()?;
        Ok(table)
    }

    /// Reads, parses and validates a table from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] if the file cannot be read, otherwise the
    /// same errors as [`AttributeTable::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks the structural invariants of the table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> CoreResult<()> {
        if self.capacity == 0 {
            return Err(CoreError::InvalidConfig("capacity must be positive".into()));
        }
        if !(self.attack_cooldown_factor.is_finite() && self.attack_cooldown_factor > 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "attack_cooldown_factor must be positive, got {}",
                self.attack_cooldown_factor
            )));
        }

        let len = self.health.len();
        if len < 2 {
            return Err(CoreError::InvalidConfig(format!(
                "rank lists need at least 2 entries (index 0 plus rank 1), got {len}"
            )));
        }

        for (name, list) in self.lists() {
            if list.len() != len {
                return Err(CoreError::InvalidConfig(format!(
                    "`{name}` has {} entries, expected {len}",
                    list.len()
                )));
            }
            if let Some(bad) = list.iter().find(|v| !v.is_finite() || **v < 0.0) {
                return Err(CoreError::InvalidConfig(format!(
                    "`{name}` contains invalid multiplier {bad}"
                )));
            }
        }

        Ok(())
    }

    fn lists(&self) -> [(&'static str, &[f32]); 5] {
        [
            ("health", &self.health),
            ("attack", &self.attack),
            ("speed", &self.speed),
            ("merge_duration", &self.merge_duration),
            ("split_duration", &self.split_duration),
        ]
    }

    /// Highest rank the table has a row for.
    #[must_use]
    pub fn max_rank(&self) -> u32 {
        self.health.len().saturating_sub(1) as u32
    }

    /// Looks up the row for `rank`.
    ///
    /// Returns `None` for rank 0 and for ranks past the end of the table.
    #[must_use]
    pub fn row(&self, rank: u32) -> Option<AttributeRow> {
        if rank == 0 {
            return None;
        }
        let i = rank as usize;
        Some(AttributeRow {
            rank,
            health: *self.health.get(i)?,
            attack: *self.attack.get(i)?,
            speed: *self.speed.get(i)?,
            merge_duration: *self.merge_duration.get(i)?,
            split_duration: *self.split_duration.get(i)?,
        })
    }

    /// Merge duration (seconds) for a unit of `rank`.
    #[must_use]
    pub fn merge_duration(&self, rank: u32) -> Option<f32> {
        self.row(rank).map(|r| r.merge_duration)
    }

    /// Split duration (seconds) for a unit of `rank`.
    #[must_use]
    pub fn split_duration(&self, rank: u32) -> Option<f32> {
        self.row(rank).map(|r| r.split_duration)
    }
}

impl Default for AttributeTable {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            attack_cooldown_factor: 1.0,
            health: vec![0.0, 1.0, 2.0, 1.8, 1.6, 1.5, 1.4, 1.3, 1.25, 1.2, 1.15],
            attack: vec![0.0, 1.0, 2.0, 1.8, 1.6, 1.5, 1.4, 1.3, 1.25, 1.2, 1.15],
            speed: vec![0.0, 1.0, 0.9, 0.9, 0.9, 0.85, 0.85, 0.85, 0.8, 0.8, 0.8],
            merge_duration: vec![0.0, 3.0, 3.5, 4.0, 4.5, 5.0, 5.5, 6.0, 6.5, 7.0, 7.5],
            split_duration: vec![0.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0],
        }
    }
}
