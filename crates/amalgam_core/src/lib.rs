//! # AMALGAM Core
//!
//! The unit model shared by the authority and every observing peer.
//!
//! ## Architecture Rules
//!
//! 1. **Handles, not references** - units are addressed by generational
//!    [`UnitId`]s; a destroyed unit's handle resolves to `None`, never to a
//!    recycled slot
//! 2. **Locks are state** - a unit in flight carries a [`LockState`] naming the
//!    transition that holds it
//! 3. **Tables are data** - rank multipliers live in TOML, see [`AttributeTable`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use amalgam_core::{AttributeTable, Unit, UnitRegistry};
//!
//! let table = AttributeTable::from_toml_file("data/attributes.toml")?;
//! let mut registry = UnitRegistry::new();
//! let id = registry.spawn(Unit::new(owner));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod attributes;
pub mod error;
pub mod math;
pub mod unit;

pub use attributes::{AttributeRow, AttributeTable};
pub use error::{CoreError, CoreResult};
pub use math::Vec3;
pub use unit::{
    LockState, PeerId, TransitionId, TransitionKind, Unit, UnitId, UnitRegistry,
};
