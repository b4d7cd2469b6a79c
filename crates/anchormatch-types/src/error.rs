//! Umbrella error type for the match coordination core.
//!
//! Every crate below this one defines its own `thiserror`-derived enum
//! scoped to its own failure modes, with a numeric code in a reserved
//! range. `AnchorMatchError` wraps each of them via `#[from]` so `?`
//! composes across crate boundaries, and maps every variant onto one of
//! seven error categories via `category()` so the coordinator's
//! propagation rule can dispatch without matching every individual
//! variant.

use thiserror::Error;

use crate::ids::{BatchId, MatchId, UserId};

/// The seven error categories used for propagation policy: retry
/// `Transient` internally, surface everything else with structured
/// details, downgrade `Verification`'s failures to a collected report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Authorization,
    RateLimited,
    BreakerOpen,
    Transient,
    Conflict,
    Persistence,
    Verification,
}

/// Central error enum returned by the coordinator and verifier crates to
/// their callers. Numeric codes in the 000-099 range; everything below
/// 100 is a direct top-level variant, everything 100+ is wrapped from a
/// subordinate crate's own enum.
#[derive(Debug, Error)]
pub enum AnchorMatchError {
    #[error("AM_ERR_000: match not found: {0}")]
    MatchNotFound(MatchId),

    #[error("AM_ERR_001: wrong phase: expected {expected}, got {actual}")]
    WrongPhase { expected: String, actual: String },

    #[error("AM_ERR_002: invalid request: {reason}")]
    Validation { reason: String },

    #[error("AM_ERR_003: unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("AM_ERR_004: rate limited for user {user_id}, retry at {retry_at}")]
    RateLimited {
        user_id: UserId,
        retry_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("AM_ERR_005: circuit breaker open, retry at {next_attempt_at}")]
    BreakerOpen {
        next_attempt_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("AM_ERR_006: no wallet available to sign transaction")]
    NoWallet,

    #[error("AM_ERR_007: reconciliation conflict on fields: {fields:?}")]
    Conflict { fields: Vec<String> },

    #[error("AM_ERR_008: match {0} not finalized on-chain")]
    NotFinalized(MatchId),

    #[error("AM_ERR_009: batch {0} not found")]
    BatchNotFound(BatchId),

    #[error("AM_ERR_010: transient failure, retries exhausted: {reason}")]
    Transient { reason: String },

    #[error("AM_ERR_011: persistence failure: {reason}")]
    Persistence { reason: String },

    /// Catch-all for lower-layer failures (canonicalization, hashing,
    /// Merkle build) that crates above `anchormatch-types` convert into
    /// this variant at their crate boundary, since the originating enums
    /// live in crates this one cannot depend on without a cycle.
    #[error("AM_ERR_012: internal error: {0}")]
    Internal(String),
}

impl AnchorMatchError {
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::MatchNotFound(_) => 0,
            Self::WrongPhase { .. } => 1,
            Self::Validation { .. } => 2,
            Self::Unauthorized { .. } => 3,
            Self::RateLimited { .. } => 4,
            Self::BreakerOpen { .. } => 5,
            Self::NoWallet => 6,
            Self::Conflict { .. } => 7,
            Self::NotFinalized(_) => 8,
            Self::BatchNotFound(_) => 9,
            Self::Transient { .. } => 10,
            Self::Persistence { .. } => 11,
            Self::Internal(_) => 12,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MatchNotFound(_)
            | Self::WrongPhase { .. }
            | Self::Validation { .. }
            | Self::NoWallet => ErrorCategory::Validation,
            Self::Unauthorized { .. } => ErrorCategory::Authorization,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::BreakerOpen { .. } => ErrorCategory::BreakerOpen,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::NotFinalized(_) | Self::BatchNotFound(_) => ErrorCategory::Validation,
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Persistence { .. } => ErrorCategory::Persistence,
            Self::Internal(_) => ErrorCategory::Verification,
        }
    }

    /// `true` if the coordinator should retry this error internally
    /// rather than surface it to the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// Crate-wide `Result` alias, used by every port trait and by the
/// coordinator/verifier/batcher public APIs.
pub type Result<T> = std::result::Result<T, AnchorMatchError>;

impl From<std::io::Error> for AnchorMatchError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AnchorMatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation {
            reason: format!("serialization error: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = AnchorMatchError::MatchNotFound(MatchId::new());
        assert!(format!("{err}").starts_with("AM_ERR_000"));
    }

    #[test]
    fn category_mapping() {
        assert_eq!(
            AnchorMatchError::Validation {
                reason: "x".into()
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            AnchorMatchError::Transient { reason: "x".into() }.category(),
            ErrorCategory::Transient
        );
        assert!(
            AnchorMatchError::Transient { reason: "x".into() }.is_retryable()
        );
        assert!(
            !AnchorMatchError::Conflict { fields: vec![] }.is_retryable()
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AnchorMatchError::NoWallet.code(), 6);
        assert_eq!(
            AnchorMatchError::Conflict {
                fields: vec!["move_count".into()]
            }
            .code(),
            7
        );
    }
}
