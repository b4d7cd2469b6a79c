//! Newtype identifiers used throughout the match coordination core.
//!
//! Every externally-meaningful identifier gets its own type so a `MatchId`
//! can never be passed where a `UserId` is expected, following the
//! wrap-every-id-in-its-own-newtype convention the wider workspace uses.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MatchId
// ---------------------------------------------------------------------------

/// Globally unique match identifier. Uses UUIDv7 so lexicographic ordering
/// of `MatchId` strings tracks creation order — `find_batch_for_match`
/// relies on this for its `first_match_id..=last_match_id` range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MatchId(pub Uuid);

impl MatchId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Derive a checkpoint's match-id: `"{match_id}-checkpoint-{event_index}"`.
    /// This is the id the checkpoint's anchor transaction is filed under.
    #[must_use]
    pub fn checkpoint_id(&self, event_index: u64) -> String {
        format!("{self}-checkpoint-{event_index}")
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Identifier for an authenticated end user. This is the rate-limiting
/// subject and audit key throughout the coordinator — never the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// BatchId
// ---------------------------------------------------------------------------

/// Identifier for a finalized Merkle batch: `"batch-YYYYMMDD-NNN"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl BatchId {
    /// Build a `BatchId` from a UTC date and a per-day sequence number.
    #[must_use]
    pub fn new(date: chrono::NaiveDate, sequence: u32) -> Self {
        Self(format!(
            "batch-{}-{sequence:03}",
            date.format("%Y%m%d")
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split `"batch-YYYYMMDD-NNN"` back into its date and sequence parts.
    #[must_use]
    pub fn parts(&self) -> Option<(chrono::NaiveDate, u32)> {
        let rest = self.0.strip_prefix("batch-")?;
        let (date_part, seq_part) = rest.split_once('-')?;
        let date = chrono::NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()?;
        let seq: u32 = seq_part.parse().ok()?;
        Some((date, seq))
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TxId
// ---------------------------------------------------------------------------

/// Opaque blockchain transaction identifier (signature/hash), as returned
/// by `BlockchainClient`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub String);

impl TxId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_id_uniqueness_and_ordering() {
        let a = MatchId::new();
        let b = MatchId::new();
        assert_ne!(a, b);
        assert!(a < b, "UUIDv7 ids must be time-ordered");
    }

    #[test]
    fn match_id_checkpoint_derivation() {
        let id = MatchId::from_bytes([0u8; 16]);
        assert_eq!(
            id.checkpoint_id(20),
            format!("{id}-checkpoint-20")
        );
    }

    #[test]
    fn batch_id_roundtrip() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let id = BatchId::new(date, 1);
        assert_eq!(id.as_str(), "batch-20260728-001");
        let (d, s) = id.parts().unwrap();
        assert_eq!(d, date);
        assert_eq!(s, 1);
    }

    #[test]
    fn user_id_display() {
        let id = UserId::from("alice");
        assert_eq!(format!("{id}"), "alice");
    }

    #[test]
    fn serde_roundtrips() {
        let mid = MatchId::new();
        let json = serde_json::to_string(&mid).unwrap();
        let back: MatchId = serde_json::from_str(&json).unwrap();
        assert_eq!(mid, back);
    }
}
