//! # AMALGAM Sync - The Composition Protocol
//!
//! Networked merging and splitting of units.
//!
//! ## Architecture
//!
//! - **Pairing**: greedy, selection-ordered proposal of merge pairs and split
//!   candidates ([`pairing`])
//! - **Protocol**: peers request, the authority validates and broadcasts
//!   ([`protocol`], [`authority`])
//! - **Ledger**: every peer animates each broadcast transition in its own
//!   ledger, one pass per tick ([`ledger`], [`group`])
//! - **Commit**: the authority recomputes attributes exactly once when the
//!   requesting peer reports completion ([`commit`])
//!
//! ## Message Flow
//!
//! ```text
//! PEER (requester)            AUTHORITY                  EVERY PEER
//!   |                             |                           |
//!   |--- Merge{a, b} ------------>| validate + lock           |
//!   |                             |--- MergeStarted --------->| ledger.insert
//!   |                             |                           | ... ticks ...
//!   |--- EndMerge --------------->| commit (once)             |
//!   |                             |--- MergeEnded ----------->| resume visuals
//!   |                             |--- Replicate(state) ----->| refresh replica
//! ```
//!
//! The authority never trusts a peer's view: every request is re-validated
//! against ground truth at receipt time.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod authority;
pub mod commit;
pub mod config;
pub mod controller;
pub mod error;
pub mod group;
pub mod ledger;
pub mod pairing;
pub mod peer;
pub mod protocol;
pub mod selection;
pub mod session;
pub mod tick;
pub mod transport;

pub use authority::{Authority, AuthorityStats, AuthorityTickReport, Response};
pub use commit::{commit_merge, commit_split, CommitOutcome, MergeCommit};
pub use config::EngineConfig;
pub use controller::{EntityController, MockEntityController, ReplicationMode};
pub use error::{EngineError, EngineResult, Rejection};
pub use group::{MergeGroup, Progress, SplitGroup, TransitionGroup};
pub use ledger::{Completion, GroupLedger, LedgerId};
pub use pairing::{resolve_pairs, resolve_split_candidates, MergePair};
pub use peer::{LivePool, Peer, PeerBuilder, PeerTickReport};
pub use protocol::{
    Accepted, BroadcastOutcome, CompositionBroadcast, CompositionRequest, RequestHeader,
    UnitSnapshot,
};
pub use selection::{Selection, SelectionProvider};
pub use session::Session;
pub use tick::TickLoop;
pub use transport::{
    AuthorityLink, AuthorityTransport, Envelope, LinkConditions, LoopbackNetwork, PeerLink,
    PeerTransport,
};

/// Tick rate of every peer's loop (updates per second).
pub const TICK_RATE: u32 = 60;

/// Seconds per tick at [`TICK_RATE`].
pub const TICK_DELTA_SECS: f64 = 1.0 / TICK_RATE as f64;
