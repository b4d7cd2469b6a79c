//! Data model for the match coordination core.
//!
//! `MatchRecord` is the canonical artifact produced per finalized match;
//! `MatchState` is the off-chain mirror a Match Instance owns exclusively
//! while the match is live. Struct shapes favor the
//! derive-everything-plus-a-`dummy()`-constructor idiom used throughout
//! this workspace, and the phase state machine below follows the same
//! `can_transition_to`-style gate convention.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, MatchId, UserId};

// ---------------------------------------------------------------------------
// MatchPhase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a match, mirrored off-chain and on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Created,
    Waiting,
    Playing,
    Ended,
    Paused,
}

impl MatchPhase {
    /// Whether a state-mutating operation may run while the match is in
    /// this phase. `Paused` rejects every mutating operation except
    /// `resume()`: `get_state()` stays readable on a paused match, but
    /// `submit_move`, `join`, `checkpoint`, `finalize`, and `sync` all
    /// fail `WrongPhase`.
    #[must_use]
    pub fn accepts_mutation(&self) -> bool {
        !matches!(self, Self::Paused)
    }
}

impl std::fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Waiting => "waiting",
            Self::Playing => "playing",
            Self::Ended => "ended",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// A player descriptor, as recorded in `MatchState.players` and
/// `MatchRecord.players`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub pubkey: String,
    pub display_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Player {
    #[must_use]
    pub fn new(pubkey: impl Into<String>, display_type: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            display_type: display_type.into(),
            metadata: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// MoveEntry
// ---------------------------------------------------------------------------

/// A single indexed player action, as it lives in a finalized
/// `MatchRecord.moves`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveEntry {
    pub index: u64,
    pub player_id: String,
    #[serde(rename = "type")]
    pub move_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
}

/// A move as submitted by a caller, before it is assigned its index by
/// the owning Match Instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub player_id: String,
    #[serde(rename = "type")]
    pub move_type: String,
    pub payload: serde_json::Value,
    pub nonce: u64,
}

// ---------------------------------------------------------------------------
// PendingTransaction
// ---------------------------------------------------------------------------

/// Tracks a submitted-but-unconfirmed transaction. At most one per match
/// at any time under single-writer discipline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub mv: Move,
    pub submission_time: DateTime<Utc>,
    pub state_before: MatchState,
    pub timeout_deadline: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Checkpoint reference
// ---------------------------------------------------------------------------

/// The last checkpoint recorded against a match's off-chain state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub event_index: u64,
    pub state_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// A full checkpoint artifact, uploaded to
/// `checkpoints/{match_id}/{event_index}.json` and optionally anchored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub match_id: MatchId,
    pub event_index: u64,
    pub state_snapshot: MatchState,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// MatchState
// ---------------------------------------------------------------------------

/// The off-chain, in-memory mirror of a match's on-chain state plus
/// coordination fields. Exclusively owned by one Match Instance, which
/// is the only writer permitted to mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub match_id: MatchId,
    pub phase: MatchPhase,
    pub current_player: u32,
    pub players: Vec<Player>,
    pub player_count: u32,
    pub move_count: u64,
    pub seed: String,
    pub game_type: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub high_value: bool,
    #[serde(default)]
    pub pending_transactions: HashMap<String, PendingTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<CheckpointRef>,
}

impl MatchState {
    /// Construct the initial `Created`-phase state for `match.create`.
    #[must_use]
    pub fn new(match_id: MatchId, game_type: u32, seed: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            match_id,
            phase: MatchPhase::Created,
            current_player: 0,
            players: Vec::new(),
            player_count: 0,
            move_count: 0,
            seed: seed.into(),
            game_type,
            created_at: now,
            ended_at: None,
            high_value: false,
            pending_transactions: HashMap::new(),
            last_checkpoint: None,
        }
    }

    /// `true` if a pending transaction is already tracked (enforces at
    /// most one outstanding pending transaction per match).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending_transactions.is_empty()
    }

    /// Advance `current_player` to the next seat, wrapping modulo
    /// `player_count`.
    #[must_use]
    pub fn next_player(&self) -> u32 {
        if self.player_count == 0 {
            0
        } else {
            (self.current_player + 1) % self.player_count
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl MatchState {
    /// Dummy `MatchState` for tests, following the
    /// `Order::dummy()`/`SpendRight::dummy()` idiom.
    #[must_use]
    pub fn dummy() -> Self {
        let mut s = Self::new(MatchId::new(), 1, "42", Utc::now());
        s.players = vec![Player::new("pk-a", "human"), Player::new("pk-b", "human")];
        s.player_count = 2;
        s.phase = MatchPhase::Playing;
        s
    }
}

// ---------------------------------------------------------------------------
// OnChainMatchState — what BlockchainClient::get_match_state returns
// ---------------------------------------------------------------------------

/// The subset of match state read back from the chain during preflight,
/// reconciliation, and finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnChainMatchState {
    pub match_id: MatchId,
    pub phase: MatchPhase,
    pub current_player: u32,
    pub move_count: u64,
    pub player_count: u32,
    pub seed: String,
}

// ---------------------------------------------------------------------------
// TxStatus
// ---------------------------------------------------------------------------

/// Confirmation status of a submitted transaction, as reported through
/// `status_callback` during `submit_move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
    Timeout,
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A signature record appended to a `MatchRecord` at finalize time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub signer: String,
    pub sig_type: String,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

impl Signature {
    #[must_use]
    pub fn ed25519(signer: impl Into<String>, signature_b64: impl Into<String>, signed_at: DateTime<Utc>) -> Self {
        Self {
            signer: signer.into(),
            sig_type: "ed25519".to_string(),
            signature: signature_b64.into(),
            signed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Reasoning segment / model descriptor
// ---------------------------------------------------------------------------

/// One chain-of-thought segment for a single move, spliced in at finalize
/// time when an AI-decision provider is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningSegment {
    pub move_index: u64,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives_considered: Vec<String>,
    pub decision: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// ---------------------------------------------------------------------------
// MatchRecord
// ---------------------------------------------------------------------------

/// The canonical, immutable-once-signed artifact produced per finalized
/// match. Field order here is irrelevant to the wire format — the
/// canonical serializer re-sorts keys lexicographically regardless of
/// struct definition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub version: String,
    pub game_type: u32,
    pub seed: String,
    pub players: Vec<Player>,
    pub moves: Vec<MoveEntry>,
    pub phase: MatchPhase,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub chain_of_thought: HashMap<String, Vec<ReasoningSegment>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub model_versions: HashMap<String, ModelDescriptor>,
    pub storage: Storage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Signature>,
}

impl MatchRecord {
    /// Validate the closing invariants: `moves[i].index == i`,
    /// non-decreasing timestamps, at least two players, terminal phase.
    ///
    /// # Errors
    /// Returns a description of the first invariant violated.
    pub fn validate_invariants(&self) -> std::result::Result<(), String> {
        if self.phase != MatchPhase::Ended {
            return Err(format!("phase must be Ended, got {}", self.phase));
        }
        if self.players.len() < 2 {
            return Err(format!(
                "players.len() must be >= 2, got {}",
                self.players.len()
            ));
        }
        let mut last_ts: Option<DateTime<Utc>> = None;
        for (i, mv) in self.moves.iter().enumerate() {
            if mv.index != i as u64 {
                return Err(format!(
                    "moves[{i}].index == {} but expected {i}",
                    mv.index
                ));
            }
            if let Some(prev) = last_ts {
                if mv.timestamp < prev {
                    return Err(format!("moves[{i}].timestamp decreased"));
                }
            }
            last_ts = Some(mv.timestamp);
        }
        Ok(())
    }

    /// A copy of this record with `signatures` cleared, used for the
    /// sign-then-verify canonicalization flow.
    #[must_use]
    pub fn without_signatures(&self) -> Self {
        let mut copy = self.clone();
        copy.signatures = Vec::new();
        copy
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl MatchRecord {
    /// Dummy finalized `MatchRecord` for tests.
    #[must_use]
    pub fn dummy() -> Self {
        let now = Utc::now();
        Self {
            match_id: MatchId::new(),
            version: "1.0.0".to_string(),
            game_type: 1,
            seed: "42".to_string(),
            players: vec![Player::new("pk-a", "human"), Player::new("pk-b", "human")],
            moves: vec![
                MoveEntry {
                    index: 0,
                    player_id: "pk-a".to_string(),
                    move_type: "place".to_string(),
                    payload: serde_json::json!({"cell": 0}),
                    timestamp: now,
                    nonce: 1,
                },
                MoveEntry {
                    index: 1,
                    player_id: "pk-b".to_string(),
                    move_type: "place".to_string(),
                    payload: serde_json::json!({"cell": 1}),
                    timestamp: now,
                    nonce: 2,
                },
            ],
            phase: MatchPhase::Ended,
            chain_of_thought: HashMap::new(),
            model_versions: HashMap::new(),
            storage: Storage::default(),
            signatures: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch model (in-flight and persisted)
// ---------------------------------------------------------------------------

/// One finalized match awaiting inclusion in a Merkle batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatchEntry {
    pub match_id: MatchId,
    pub match_hash: String,
    pub hot_url: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Persisted pending-batch state, the `batch_manager_state` Store key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchManagerState {
    pub pending_matches: Vec<PendingBatchEntry>,
    pub batch_counter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// The persisted manifest for a flushed batch, written to
/// `manifests/{batch_id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub version: String,
    pub batch_id: BatchId,
    pub merkle_root: String,
    pub match_count: u32,
    pub match_ids: Vec<MatchId>,
    pub match_hashes: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchored_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

// ---------------------------------------------------------------------------
// Merkle proof wire format
// ---------------------------------------------------------------------------

/// The Merkle-inclusion proof object, wire format:
/// `{"match_id": str, "sha256": hex, "proof": [hex...], "index": int}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub match_id: MatchId,
    pub sha256: String,
    pub proof: Vec<String>,
    pub index: usize,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// A typed, aggregable metrics event recorded through `MetricsSink`.
/// Distinct from the `tracing` log stream: this channel feeds
/// counters/histograms, not human-readable log lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricEvent {
    MoveSubmitted { match_id: MatchId },
    MoveConfirmed { match_id: MatchId, latency_ms: u64 },
    MoveFailed { match_id: MatchId, reason: String },
    MoveTimeout { match_id: MatchId },
    ReconciliationConflict { match_id: MatchId, fields: Vec<String> },
    BreakerOpened,
    BreakerClosed,
    RateLimitRejected { user_id: UserId },
    WalletRotated { new_index: usize },
    BatchFlushed { batch_id: BatchId, count: usize },
    BatchAnchored { batch_id: BatchId },
    CheckpointCreated { match_id: MatchId, event_index: u64 },
}

/// An aggregated snapshot over everything recorded through `MetricsSink`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub moves_submitted: u64,
    pub moves_confirmed: u64,
    pub moves_failed: u64,
    pub moves_timed_out: u64,
    pub reconciliation_conflicts: u64,
    pub breaker_opens: u64,
    pub rate_limit_rejections: u64,
    pub wallet_rotations: u64,
    pub batches_flushed: u64,
    pub batches_anchored: u64,
    pub checkpoints_created: u64,
    pub confirmation_latencies_ms: Vec<u64>,
}

// ---------------------------------------------------------------------------
// Verification report
// ---------------------------------------------------------------------------

/// The result of `Verifier::verify`: every layer runs independently and
/// contributes to one report rather than short-circuiting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub merkle_ok: bool,
    pub signatures_ok: bool,
    pub replay_ok: bool,
}

impl VerificationReport {
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

// ---------------------------------------------------------------------------
// TerminalState — GameEngine::replay's return type
// ---------------------------------------------------------------------------

/// The terminal state a `GameEngine` reports after replaying a move
/// sequence, compared against the recorded terminal state during
/// verification step 4 (replay).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalState {
    pub move_count: u64,
    pub winner: Option<String>,
    pub outcome_hash: String,
}

// ---------------------------------------------------------------------------
// WalletHandle
// ---------------------------------------------------------------------------

/// A handle to one signing identity in the wallet pool, passed down into
/// `BlockchainClient` calls without exposing key material to the
/// coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletHandle {
    pub pubkey: String,
    pub index: usize,
}

// ---------------------------------------------------------------------------
// Request/response shapes for the operation-routing surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMatchRequest {
    pub match_id: MatchId,
    pub game_name: String,
    pub game_type: u32,
    pub seed: String,
    #[serde(default)]
    pub high_value: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_phase_mutation_gate() {
        assert!(MatchPhase::Playing.accepts_mutation());
        assert!(!MatchPhase::Paused.accepts_mutation());
    }

    #[test]
    fn match_state_next_player_wraps() {
        let mut s = MatchState::dummy();
        s.current_player = 1;
        assert_eq!(s.next_player(), 0);
    }

    #[test]
    fn match_record_validates_move_index() {
        let mut r = MatchRecord::dummy();
        r.moves[1].index = 5;
        assert!(r.validate_invariants().is_err());
    }

    #[test]
    fn match_record_rejects_single_player() {
        let mut r = MatchRecord::dummy();
        r.players.truncate(1);
        assert!(r.validate_invariants().is_err());
    }

    #[test]
    fn match_record_requires_ended_phase() {
        let mut r = MatchRecord::dummy();
        r.phase = MatchPhase::Playing;
        assert!(r.validate_invariants().is_err());
    }

    #[test]
    fn match_record_valid_dummy_passes() {
        let r = MatchRecord::dummy();
        assert!(r.validate_invariants().is_ok());
    }

    #[test]
    fn without_signatures_clears_only_signatures() {
        let mut r = MatchRecord::dummy();
        r.signatures.push(Signature::ed25519("pk", "sig", Utc::now()));
        let stripped = r.without_signatures();
        assert!(stripped.signatures.is_empty());
        assert_eq!(stripped.match_id, r.match_id);
    }

    #[test]
    fn verification_report_add_error_flips_validity() {
        let mut report = VerificationReport::default();
        report.is_valid = true;
        report.add_error("hash mismatch");
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn serde_roundtrip_match_record() {
        let r = MatchRecord::dummy();
        let json = serde_json::to_string(&r).unwrap();
        let back: MatchRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
