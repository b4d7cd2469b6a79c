//! Content hashing and Ed25519 signature verification.
//!
//! Grounded on the `Receipt::signing_bytes`/`SpendRight::signing_payload`
//! hash-then-sign idiom in the prior-generation types crate, generalized
//! from "sign a fixed payload shape" to "sign whatever canonical bytes
//! the caller already produced." This crate never holds private key
//! material in the hot coordinator path — `sign_with_key` exists for
//! adapters that implement `SignerProvider` outside this workspace, and
//! the coordinator itself only ever calls through that port.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha256};

use anchormatch_types::model::Signature;

use crate::error::CanonError;

/// SHA-256 of `bytes`, hex-encoded.
#[must_use]
pub fn hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Sign `bytes` with `signing_key`, producing a wire-ready `Signature`
/// record. Exposed for adapters implementing `SignerProvider`; the
/// coordinator never calls this directly.
///
/// # Errors
/// Never actually fails for a well-formed `SigningKey`; returns a
/// `Result` for symmetry with `verify` and to leave room for a future
/// HSM-backed signer that can.
pub fn sign_with_key(
    signing_key: &SigningKey,
    signer_pubkey_hex: impl Into<String>,
    bytes: &[u8],
    signed_at: DateTime<Utc>,
) -> Result<Signature, CanonError> {
    let sig = signing_key.sign(bytes);
    let encoded = base64::engine::general_purpose::STANDARD.encode(sig.to_bytes());
    Ok(Signature::ed25519(signer_pubkey_hex.into(), encoded, signed_at))
}

/// Verify `signature` (base64 or hex) over `bytes` against `signer_pubkey`
/// (hex-encoded Ed25519 public key).
///
/// The encoding is picked by length alone: a 128-character
/// signature is hex, anything else is base64. Lengths that decode to
/// anything other than 64 bytes are rejected.
///
/// # Errors
/// Returns `CanonError::InvalidSignatureEncoding` or
/// `CanonError::InvalidPubkeyEncoding` if either input is malformed, or
/// `CanonError::MalformedKey` if the decoded bytes aren't a valid
/// Ed25519 key/signature pair. Returns `Ok(false)` (not an error) for a
/// well-formed but non-matching signature.
pub fn verify(bytes: &[u8], signature: &str, signer_pubkey: &str) -> Result<bool, CanonError> {
    let sig_bytes = decode_signature(signature)?;
    let pubkey_bytes = hex::decode(signer_pubkey)
        .map_err(|e| CanonError::InvalidPubkeyEncoding(e.to_string()))?;
    let pubkey_array: [u8; 32] = pubkey_bytes
        .try_into()
        .map_err(|_| CanonError::MalformedKey("public key is not 32 bytes".to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&pubkey_array)
        .map_err(|e| CanonError::MalformedKey(e.to_string()))?;
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    Ok(verifying_key.verify(bytes, &sig).is_ok())
}

fn decode_signature(signature: &str) -> Result<[u8; 64], CanonError> {
    let bad_encoding = || CanonError::InvalidSignatureEncoding { len: signature.len() };
    let raw = if signature.len() == 128 {
        hex::decode(signature).map_err(|_| bad_encoding())?
    } else {
        base64::engine::general_purpose::STANDARD
            .decode(signature)
            .map_err(|_| bad_encoding())?
    };
    raw.try_into().map_err(|_| bad_encoding())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn keypair() -> (SigningKey, String) {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let pubkey_hex = hex::encode(key.verifying_key().to_bytes());
        (key, pubkey_hex)
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash(b"payload"), hash(b"payload"));
        assert_ne!(hash(b"payload"), hash(b"other"));
    }

    #[test]
    fn sign_then_verify_base64_roundtrips() {
        let (key, pubkey_hex) = keypair();
        let sig = sign_with_key(&key, pubkey_hex.clone(), b"payload", Utc::now()).unwrap();
        assert_ne!(sig.signature.len(), 128, "base64 signature must not look like hex");
        assert!(verify(b"payload", &sig.signature, &pubkey_hex).unwrap());
    }

    #[test]
    fn sign_then_verify_hex_roundtrips() {
        let (key, pubkey_hex) = keypair();
        let sig = key.sign(b"payload");
        let hex_sig = hex::encode(sig.to_bytes());
        assert_eq!(hex_sig.len(), 128);
        assert!(verify(b"payload", &hex_sig, &pubkey_hex).unwrap());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (key, pubkey_hex) = keypair();
        let sig = sign_with_key(&key, pubkey_hex.clone(), b"payload", Utc::now()).unwrap();
        assert!(!verify(b"tampered", &sig.signature, &pubkey_hex).unwrap());
    }

    #[test]
    fn unknown_length_signature_rejected() {
        let (_key, pubkey_hex) = keypair();
        let err = verify(b"payload", "short", &pubkey_hex).unwrap_err();
        assert!(matches!(err, CanonError::InvalidSignatureEncoding { .. }));
    }

    #[test]
    fn malformed_pubkey_rejected() {
        let err = verify(b"payload", &"aa".repeat(64), "not-hex").unwrap_err();
        assert!(matches!(err, CanonError::InvalidPubkeyEncoding(_)));
    }
}
