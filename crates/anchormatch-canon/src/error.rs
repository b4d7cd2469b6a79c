//! Error types owned by this crate: `CanonError` (100-199, canonicalization
//! and hashing/signing) and `MerkleError` (200-299, tree build/proof).
//! Both map onto `anchormatch_types::error::ErrorCategory` and bridge into
//! `AnchorMatchError::Internal` at the crate boundary, following the
//! `OpenmatchError`-bridging convention this workspace already uses.

use anchormatch_types::error::{AnchorMatchError, ErrorCategory};
use thiserror::Error;

/// Canonicalization, hashing, and signing failures.
#[derive(Debug, Error)]
pub enum CanonError {
    #[error("CANON_ERR_100: serialization failed: {0}")]
    Serialize(String),

    #[error("CANON_ERR_101: value contains a non-finite number (NaN or Infinity)")]
    NotFinite,

    #[error("CANON_ERR_102: signature has an unrecognized encoding length: {len}")]
    InvalidSignatureEncoding { len: usize },

    #[error("CANON_ERR_103: public key is not valid hex: {0}")]
    InvalidPubkeyEncoding(String),

    #[error("CANON_ERR_104: malformed ed25519 key material: {0}")]
    MalformedKey(String),
}

impl CanonError {
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Serialize(_) => 100,
            Self::NotFinite => 101,
            Self::InvalidSignatureEncoding { .. } => 102,
            Self::InvalidPubkeyEncoding(_) => 103,
            Self::MalformedKey(_) => 104,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Serialize(_) | Self::NotFinite => ErrorCategory::Validation,
            Self::InvalidSignatureEncoding { .. }
            | Self::InvalidPubkeyEncoding(_)
            | Self::MalformedKey(_) => ErrorCategory::Verification,
        }
    }
}

impl From<CanonError> for AnchorMatchError {
    fn from(err: CanonError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Merkle tree build/proof failures.
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("MERKLE_ERR_200: cannot build a tree from an empty leaf set")]
    EmptyInput,

    #[error("MERKLE_ERR_201: leaf input is not valid hex: {0}")]
    InvalidHexEncoding(String),

    #[error("MERKLE_ERR_202: decoded hash is not 32 bytes")]
    InvalidHashLength,

    #[error("MERKLE_ERR_203: leaf index {index} is out of range for {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("MERKLE_ERR_204: proof depth {actual} disagrees with tree height {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

impl MerkleError {
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::EmptyInput => 200,
            Self::InvalidHexEncoding(_) => 201,
            Self::InvalidHashLength => 202,
            Self::IndexOutOfRange { .. } => 203,
            Self::LengthMismatch { .. } => 204,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EmptyInput | Self::InvalidHexEncoding(_) | Self::IndexOutOfRange { .. } => {
                ErrorCategory::Validation
            }
            Self::InvalidHashLength | Self::LengthMismatch { .. } => ErrorCategory::Verification,
        }
    }
}

impl From<MerkleError> for AnchorMatchError {
    fn from(err: MerkleError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canon_error_codes_stable() {
        assert_eq!(CanonError::NotFinite.code(), 101);
        assert_eq!(
            CanonError::InvalidSignatureEncoding { len: 7 }.code(),
            102
        );
    }

    #[test]
    fn merkle_error_codes_stable() {
        assert_eq!(MerkleError::EmptyInput.code(), 200);
        assert_eq!(
            MerkleError::LengthMismatch {
                expected: 2,
                actual: 1
            }
            .code(),
            204
        );
    }

    #[test]
    fn bridges_into_umbrella_error() {
        let err: AnchorMatchError = CanonError::NotFinite.into();
        assert!(matches!(err, AnchorMatchError::Internal(_)));
    }
}
