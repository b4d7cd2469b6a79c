//! External port traits.
//!
//! Every crate that needs to call out to the world — chain, storage,
//! auth, metrics, clock, signing, scheduling, game rules — depends on a
//! trait object defined here, never on a concrete transport. Production
//! wiring lives in a binary or integration crate that is not part of
//! this workspace; `test_helpers` supplies in-memory implementations for
//! every trait below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::ids::{BatchId, MatchId, TxId, UserId};
use crate::model::{
    CreateMatchRequest, MatchState, MetricEvent, MetricsSnapshot, Move, MoveEntry,
    OnChainMatchState, Signature, TerminalState, TxStatus, WalletHandle,
};

/// Monotonic instant, as returned by `Clock::now()`. A thin wrapper
/// around `std::time::Instant` so the trait stays mockable without
/// pulling a real wall clock into test code.
pub type Instant = std::time::Instant;

/// Opaque key a `Scheduler` alarm is registered under; typically a
/// match id plus a discriminator (timeout vs. checkpoint vs. batch flush).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlarmKey {
    MoveTimeout(MatchId),
    Checkpoint(MatchId),
    BatchFlush(BatchId),
}

/// Handle returned by `Scheduler::schedule_at`, passed back to `cancel`
/// to retire an alarm before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmHandle(pub u64);

/// Read/write access to the blockchain program this core anchors
/// records against. Every method can fail transiently; callers route
/// those failures through the circuit breaker, not this trait.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    async fn create_match(&self, req: CreateMatchRequest) -> Result<MatchState>;
    async fn join_match(&self, match_id: &MatchId, player_pubkey: &str) -> Result<MatchState>;
    async fn submit_move(&self, match_id: &MatchId, mv: &Move, wallet: &WalletHandle) -> Result<TxId>;
    async fn end_match(&self, match_id: &MatchId, match_hash: &str, hot_url: &str) -> Result<()>;
    async fn anchor_batch(
        &self,
        batch_id: &BatchId,
        merkle_root: [u8; 32],
        count: u32,
        first_match_id: &MatchId,
        last_match_id: &MatchId,
        wallet: &WalletHandle,
    ) -> Result<TxId>;
    async fn anchor_match_record(
        &self,
        match_id: &str,
        content_hash: &str,
        wallet: &WalletHandle,
    ) -> Result<TxId>;
    async fn get_match_state(&self, match_id: &MatchId) -> Result<OnChainMatchState>;
    async fn find_batch_for_match(&self, match_id: &MatchId) -> Result<Option<BatchId>>;
    async fn is_authorized_signer(&self, pubkey: &str) -> Result<bool>;
    async fn confirm_tx(&self, tx_id: &TxId) -> Result<TxStatus>;
    async fn get_signature_status(&self, tx_id: &TxId) -> Result<TxStatus>;
}

/// Content-addressed blob storage for manifests, checkpoints, and hot
/// match records, under a `checkpoints/`, `manifests/` key layout.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Verifies a bearer token and resolves it to the authenticated caller.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify_token(&self, bearer: &str) -> Result<UserId>;
}

/// Aggregable counters and histograms, distinct from the `tracing` log
/// stream. Implementations must not block the caller.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
    fn snapshot(&self) -> MetricsSnapshot;
}

/// Time source, abstracted so tests can hold time fixed or step it
/// deterministically instead of sleeping real wall-clock seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Supplies the active signing identity and performs Ed25519 signing
/// without exposing key material to callers.
#[async_trait]
pub trait SignerProvider: Send + Sync {
    async fn sign(&self, bytes: &[u8]) -> Result<Signature>;
    fn current_wallet(&self) -> WalletHandle;
}

/// Deadline-based alarm scheduling for move timeouts, checkpoint
/// cadence, and batch flush timers.
pub trait Scheduler: Send + Sync {
    fn schedule_at(&self, deadline: DateTime<Utc>, key: AlarmKey) -> AlarmHandle;
    fn cancel(&self, handle: AlarmHandle);
}

/// Replays a move sequence under a game's own rules to compute a
/// terminal state for comparison during verification, keeping rule
/// simulation out of the coordinator itself.
#[async_trait]
pub trait GameEngine: Send + Sync {
    async fn replay(&self, game_type: u32, seed: &str, moves: &[MoveEntry]) -> Result<TerminalState>;
}
