//! # Engine Configuration
//!
//! Tunables shared by the authority and every peer. All peers of a session
//! must run with the same values, otherwise their animations drift apart.
//!
//! ```toml
//! tick_rate = 60
//! scaling_value = 2.0
//! spawn_radius = 1.0
//! rng_seed = 7
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::TICK_RATE;

/// Engine-wide settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ticks per second.
    pub tick_rate: u32,
    /// How much a merging owner grows on the X/Z axes by the end of a merge.
    pub scaling_value: f32,
    /// Distance each split half travels from the original position.
    pub spawn_radius: f32,
    /// Seed for the authority's split-angle generator.
    pub rng_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            scaling_value: 2.0,
            spawn_radius: 1.0,
            rng_seed: 0x414d_414c_4741_4d00,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a config from TOML text. Missing keys take
    /// their default.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigParse`] or [`EngineError::InvalidConfig`].
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the file cannot be read, otherwise the
    /// errors of [`EngineConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for the first bad value.
    pub fn validate(&self) -> EngineResult<()> {
        if self.tick_rate == 0 {
            return Err(EngineError::InvalidConfig("tick_rate must be positive".into()));
        }
        if !(self.scaling_value.is_finite() && self.scaling_value > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "scaling_value must be positive, got {}",
                self.scaling_value
            )));
        }
        if !(self.spawn_radius.is_finite() && self.spawn_radius >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "spawn_radius must be non-negative, got {}",
                self.spawn_radius
            )));
        }
        Ok(())
    }

    /// Seconds per tick.
    #[inline]
    #[must_use]
    pub fn tick_delta_secs(&self) -> f64 {
        1.0 / f64::from(self.tick_rate)
    }
}
