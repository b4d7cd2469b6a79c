//! Per-match optimistic state machine and the durable per-match actor
//! that owns it.
//!
//! [`instance`] is the single-writer runtime: one [`instance::MatchInstance`]
//! per live match, holding its [`anchormatch_types::model::MatchState`]
//! behind a lock and fanning updates out to subscribers. [`coordinator`]
//! drives the instance through the blockchain-facing protocol — rate
//! limiting, wallet selection, circuit-broken submission, confirmation
//! polling, reconciliation, checkpoints, and finalize.

pub mod coordinator;
pub mod error;
pub mod instance;

pub use coordinator::{MatchCoordinator, StatusCallback};
pub use error::{CoordinatorError, InstanceError};
pub use instance::{InstanceRegistry, MatchInstance};
