//! `CoordinatorError` (500-599) and `InstanceError` (600-699): the two
//! crate-local error enums for this crate's two halves, bridged into
//! `AnchorMatchError` at the public boundary the same way `BatchError`
//! and `GovernorError` are bridged from theirs.

use anchormatch_types::error::{AnchorMatchError, ErrorCategory};
use anchormatch_types::ids::{BatchId, MatchId};
use thiserror::Error;

/// Failures from the blockchain-facing half of a match's lifecycle:
/// submission, confirmation, reconciliation, checkpointing, finalize.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("COORDINATOR_ERR_500: submit_move failed for match {match_id}: {reason}")]
    SubmitFailed { match_id: MatchId, reason: String },

    #[error("COORDINATOR_ERR_501: confirmation of match {match_id}'s pending transaction timed out")]
    ConfirmationTimeout { match_id: MatchId },

    #[error("COORDINATOR_ERR_502: on-chain reconciliation for match {match_id} disagrees on: {fields:?}")]
    ReconciliationConflict { match_id: MatchId, fields: Vec<String> },

    #[error("COORDINATOR_ERR_503: finalize failed for match {match_id}: {reason}")]
    FinalizeFailed { match_id: MatchId, reason: String },

    #[error("COORDINATOR_ERR_504: checkpoint {event_index} for match {match_id} failed: {reason}")]
    CheckpointFailed {
        match_id: MatchId,
        event_index: u64,
        reason: String,
    },

    #[error("COORDINATOR_ERR_505: the chain rejected the signed transaction for match {match_id}: {reason}")]
    SigningRejected { match_id: MatchId, reason: String },

    #[error("COORDINATOR_ERR_506: match {match_id} is not yet anchored in any batch")]
    BatchNotFound { match_id: MatchId },

    #[error("COORDINATOR_ERR_507: batch {batch_id} manifest could not be read: {reason}")]
    ManifestUnreadable { batch_id: BatchId, reason: String },
}

impl CoordinatorError {
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::SubmitFailed { .. } => 500,
            Self::ConfirmationTimeout { .. } => 501,
            Self::ReconciliationConflict { .. } => 502,
            Self::FinalizeFailed { .. } => 503,
            Self::CheckpointFailed { .. } => 504,
            Self::SigningRejected { .. } => 505,
            Self::BatchNotFound { .. } => 506,
            Self::ManifestUnreadable { .. } => 507,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SubmitFailed { .. } | Self::ConfirmationTimeout { .. } => ErrorCategory::Transient,
            Self::ReconciliationConflict { .. } => ErrorCategory::Conflict,
            Self::FinalizeFailed { .. } | Self::ManifestUnreadable { .. } => ErrorCategory::Persistence,
            Self::CheckpointFailed { .. } => ErrorCategory::Persistence,
            Self::SigningRejected { .. } => ErrorCategory::Validation,
            Self::BatchNotFound { .. } => ErrorCategory::Validation,
        }
    }
}

impl From<CoordinatorError> for AnchorMatchError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::ReconciliationConflict { fields, .. } => Self::Conflict { fields },
            CoordinatorError::ConfirmationTimeout { match_id } => Self::Transient {
                reason: format!("match {match_id} confirmation timed out"),
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Failures from the local, single-writer bookkeeping half of a match's
/// lifecycle: phase gating, authorization, basic move validation.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("INSTANCE_ERR_600: match {0} has no live instance")]
    NotFound(MatchId),

    #[error("INSTANCE_ERR_601: wrong phase for match {match_id}: expected {expected}, got {actual}")]
    WrongPhase {
        match_id: MatchId,
        expected: String,
        actual: String,
    },

    #[error("INSTANCE_ERR_602: player {pubkey} already joined match {match_id}")]
    PlayerAlreadyJoined { match_id: MatchId, pubkey: String },

    #[error("INSTANCE_ERR_603: unauthorized operation on match {match_id}: {reason}")]
    Unauthorized { match_id: MatchId, reason: String },

    #[error("INSTANCE_ERR_604: token user {token_user} does not match operation user {operation_user}")]
    UserMismatch {
        token_user: String,
        operation_user: String,
    },

    #[error("INSTANCE_ERR_605: malformed move for match {match_id}: {reason}")]
    InvalidMove { match_id: MatchId, reason: String },

    #[error("INSTANCE_ERR_606: match {0} already has a pending transaction")]
    AlreadyPending(MatchId),
}

impl InstanceError {
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::NotFound(_) => 600,
            Self::WrongPhase { .. } => 601,
            Self::PlayerAlreadyJoined { .. } => 602,
            Self::Unauthorized { .. } => 603,
            Self::UserMismatch { .. } => 604,
            Self::InvalidMove { .. } => 605,
            Self::AlreadyPending(_) => 606,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_)
            | Self::WrongPhase { .. }
            | Self::PlayerAlreadyJoined { .. }
            | Self::InvalidMove { .. } => ErrorCategory::Validation,
            Self::Unauthorized { .. } | Self::UserMismatch { .. } => ErrorCategory::Authorization,
            Self::AlreadyPending(_) => ErrorCategory::Conflict,
        }
    }
}

impl From<InstanceError> for AnchorMatchError {
    fn from(err: InstanceError) -> Self {
        match err {
            InstanceError::NotFound(id) => Self::MatchNotFound(id),
            InstanceError::WrongPhase { expected, actual, .. } => Self::WrongPhase { expected, actual },
            InstanceError::Unauthorized { reason, .. } => Self::Unauthorized { reason },
            InstanceError::UserMismatch { .. } => Self::Unauthorized {
                reason: err_to_reason(&err),
            },
            other => Self::Validation {
                reason: other.to_string(),
            },
        }
    }
}

fn err_to_reason(err: &InstanceError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_codes_are_stable() {
        assert_eq!(
            CoordinatorError::ConfirmationTimeout {
                match_id: MatchId::new()
            }
            .code(),
            501
        );
    }

    #[test]
    fn instance_codes_are_stable() {
        assert_eq!(InstanceError::NotFound(MatchId::new()).code(), 600);
        assert_eq!(
            InstanceError::AlreadyPending(MatchId::new()).category(),
            ErrorCategory::Conflict
        );
    }

    #[test]
    fn reconciliation_conflict_maps_to_conflict_category() {
        let err = CoordinatorError::ReconciliationConflict {
            match_id: MatchId::new(),
            fields: vec!["move_count".to_string()],
        };
        let mapped: AnchorMatchError = err.into();
        assert!(matches!(mapped, AnchorMatchError::Conflict { .. }));
    }
}
