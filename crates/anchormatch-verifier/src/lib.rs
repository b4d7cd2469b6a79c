//! Four-layer verification of a finalized match record.
//!
//! [`Verifier`] never throws: each of hash, Merkle inclusion, signature
//! chain, and replay verification runs independently, and every failure
//! is collected into one [`anchormatch_types::model::VerificationReport`]
//! rather than short-circuiting the others.

pub mod verifier;

pub use verifier::Verifier;
