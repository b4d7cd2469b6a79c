//! Deterministic byte canonicalization, content hashing/signing, and
//! Merkle tree construction for the match coordination core.
//!
//! Everything here is pure and synchronous: no Store, no BlockchainClient,
//! no Clock. Callers above this crate (`anchormatch-batcher`,
//! `anchormatch-coordinator`, `anchormatch-verifier`) own the I/O; this
//! crate only owns the bytes.

pub mod canon;
pub mod error;
pub mod hash_sign;
pub mod merkle;

pub use canon::canonicalize;
pub use error::{CanonError, MerkleError};
pub use hash_sign::{hash, sign_with_key, verify};
pub use merkle::MerkleTree;
