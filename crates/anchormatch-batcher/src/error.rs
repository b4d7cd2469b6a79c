//! `BatchError` (400-499): batch manifest construction, upload, and
//! anchoring failures.

use anchormatch_types::error::{AnchorMatchError, ErrorCategory};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("BATCH_ERR_400: failed to upload manifest for batch {batch_id}: {reason}")]
    UploadFailed { batch_id: String, reason: String },

    #[error("BATCH_ERR_401: failed to anchor batch {batch_id} on-chain: {reason}")]
    AnchorFailed { batch_id: String, reason: String },

    #[error("BATCH_ERR_402: failed to sign manifest for batch {batch_id}: {reason}")]
    SignFailed { batch_id: String, reason: String },

    #[error("BATCH_ERR_403: failed to persist batch manager state: {reason}")]
    StatePersistFailed { reason: String },

    #[error("BATCH_ERR_404: no anchored batch found for match {match_id}")]
    BatchNotFound { match_id: String },

    #[error("BATCH_ERR_405: manifest for batch {batch_id} is malformed: {reason}")]
    MalformedManifest { batch_id: String, reason: String },
}

impl BatchError {
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::UploadFailed { .. } => 400,
            Self::AnchorFailed { .. } => 401,
            Self::SignFailed { .. } => 402,
            Self::StatePersistFailed { .. } => 403,
            Self::BatchNotFound { .. } => 404,
            Self::MalformedManifest { .. } => 405,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UploadFailed { .. } | Self::StatePersistFailed { .. } => ErrorCategory::Persistence,
            Self::AnchorFailed { .. } => ErrorCategory::Transient,
            Self::SignFailed { .. } => ErrorCategory::Validation,
            Self::BatchNotFound { .. } => ErrorCategory::Validation,
            Self::MalformedManifest { .. } => ErrorCategory::Verification,
        }
    }
}

impl From<BatchError> for AnchorMatchError {
    fn from(err: BatchError) -> Self {
        Self::Internal(err.to_string())
    }
}
