//! `GovernorError` (300-399): rate limit, circuit breaker, and wallet
//! pool failures, bridged into `AnchorMatchError::Internal` at the
//! crate boundary the same way `CanonError`/`MerkleError` are.

use anchormatch_types::error::{AnchorMatchError, ErrorCategory};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("GOVERNOR_ERR_300: rate limit exceeded for user, retry at {retry_at_unix}")]
    RateLimited { retry_at_unix: i64 },

    #[error("GOVERNOR_ERR_301: circuit breaker is open, next attempt at {next_attempt_at_unix}")]
    BreakerOpen { next_attempt_at_unix: i64 },

    #[error("GOVERNOR_ERR_302: no wallet available in the pool")]
    NoWallet,

    #[error("GOVERNOR_ERR_303: wallet pool was constructed with an empty key set")]
    EmptyWalletPool,
}

impl GovernorError {
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::RateLimited { .. } => 300,
            Self::BreakerOpen { .. } => 301,
            Self::NoWallet => 302,
            Self::EmptyWalletPool => 303,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::BreakerOpen { .. } => ErrorCategory::BreakerOpen,
            Self::NoWallet | Self::EmptyWalletPool => ErrorCategory::Validation,
        }
    }
}

impl From<GovernorError> for AnchorMatchError {
    fn from(err: GovernorError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(GovernorError::RateLimited { retry_at_unix: 0 }.code(), 300);
        assert_eq!(
            GovernorError::BreakerOpen {
                next_attempt_at_unix: 0
            }
            .code(),
            301
        );
        assert_eq!(GovernorError::NoWallet.code(), 302);
    }

    #[test]
    fn categories_map_to_expected_error_category() {
        assert_eq!(
            GovernorError::RateLimited { retry_at_unix: 0 }.category(),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            GovernorError::BreakerOpen {
                next_attempt_at_unix: 0
            }
            .category(),
            ErrorCategory::BreakerOpen
        );
    }
}
