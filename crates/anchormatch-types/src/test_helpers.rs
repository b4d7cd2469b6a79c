//! In-memory test doubles for every port trait, gated behind the
//! `test-helpers` feature (forwarded from this crate through every crate
//! that re-exports them). Each double is configurable enough to inject
//! the specific failures cross-crate lifecycle tests need: never-
//! confirms, signature-status-never-finalizes, fail-N-times-then-
//! succeed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer as _, SigningKey};

use crate::error::{AnchorMatchError, Result};
use crate::ids::{BatchId, MatchId, TxId, UserId};
use crate::model::{
    CreateMatchRequest, MatchPhase, MatchState, MetricEvent, MetricsSnapshot, Move, MoveEntry,
    OnChainMatchState, Signature as SigRecord, TerminalState, TxStatus, WalletHandle,
};
use crate::ports::{AlarmHandle, AlarmKey, AuthVerifier, BlockchainClient, Clock, GameEngine, Instant, MetricsSink, Scheduler, SignerProvider, Store};

// ---------------------------------------------------------------------------
// InMemoryBlockchainClient
// ---------------------------------------------------------------------------

struct ChainEntry {
    state: MatchState,
    on_chain: OnChainMatchState,
}

/// In-memory stand-in for the program this core anchors records
/// against. Configurable to inject the failure modes cross-crate
/// lifecycle tests need: `set_never_confirms` (a move never reaches
/// `Confirmed`), `set_signature_status_never_finalizes`
/// (`get_signature_status` stays `Pending` forever), `fail_next_n_calls`
/// (network-error N times then succeed).
pub struct InMemoryBlockchainClient {
    matches: Mutex<HashMap<MatchId, ChainEntry>>,
    batches: Mutex<HashMap<MatchId, BatchId>>,
    authorized: Mutex<HashSet<String>>,
    tx_counter: AtomicU64,
    never_confirms: std::sync::atomic::AtomicBool,
    sig_status_never_finalizes: std::sync::atomic::AtomicBool,
    fail_remaining: AtomicU32,
}

impl Default for InMemoryBlockchainClient {
    fn default() -> Self {
        Self {
            matches: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
            authorized: Mutex::new(HashSet::new()),
            tx_counter: AtomicU64::new(0),
            never_confirms: std::sync::atomic::AtomicBool::new(false),
            sig_status_never_finalizes: std::sync::atomic::AtomicBool::new(false),
            fail_remaining: AtomicU32::new(0),
        }
    }
}

impl InMemoryBlockchainClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorize_signer(&self, pubkey: impl Into<String>) {
        self.authorized.lock().unwrap().insert(pubkey.into());
    }

    pub fn set_never_confirms(&self, v: bool) {
        self.never_confirms.store(v, Ordering::SeqCst);
    }

    pub fn set_signature_status_never_finalizes(&self, v: bool) {
        self.sig_status_never_finalizes.store(v, Ordering::SeqCst);
    }

    /// The next `n` fallible calls (`submit_move`, `anchor_batch`,
    /// `anchor_match_record`, `confirm_tx`) return `Transient` before
    /// this client starts succeeding again.
    pub fn fail_next_n_calls(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<()> {
        loop {
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(());
            }
            if self
                .fail_remaining
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(AnchorMatchError::Transient {
                    reason: "injected transient failure".to_string(),
                });
            }
        }
    }

    fn next_tx_id(&self) -> TxId {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        TxId::new(format!("tx-{n}"))
    }
}

#[async_trait]
impl BlockchainClient for InMemoryBlockchainClient {
    async fn create_match(&self, req: CreateMatchRequest) -> Result<MatchState> {
        self.maybe_fail()?;
        let state = MatchState::new(req.match_id, req.game_type, req.seed, Utc::now());
        let on_chain = OnChainMatchState {
            match_id: state.match_id,
            phase: state.phase,
            current_player: state.current_player,
            move_count: state.move_count,
            player_count: state.player_count,
            seed: state.seed.clone(),
        };
        let mut matches = self.matches.lock().unwrap();
        matches.insert(
            state.match_id,
            ChainEntry {
                state: state.clone(),
                on_chain,
            },
        );
        Ok(state)
    }

    async fn join_match(&self, match_id: &MatchId, player_pubkey: &str) -> Result<MatchState> {
        self.maybe_fail()?;
        let mut matches = self.matches.lock().unwrap();
        let entry = matches
            .get_mut(match_id)
            .ok_or(AnchorMatchError::MatchNotFound(*match_id))?;
        entry
            .state
            .players
            .push(crate::model::Player::new(player_pubkey, "human"));
        entry.state.player_count = entry.state.players.len() as u32;
        if entry.state.phase == MatchPhase::Created {
            entry.state.phase = MatchPhase::Waiting;
        }
        entry.on_chain.player_count = entry.state.player_count;
        entry.on_chain.phase = entry.state.phase;
        Ok(entry.state.clone())
    }

    async fn submit_move(&self, match_id: &MatchId, mv: &Move, _wallet: &WalletHandle) -> Result<TxId> {
        self.maybe_fail()?;
        let mut matches = self.matches.lock().unwrap();
        let entry = matches
            .get_mut(match_id)
            .ok_or(AnchorMatchError::MatchNotFound(*match_id))?;
        entry.state.move_count += 1;
        entry.state.current_player = entry.state.next_player();
        entry.state.phase = MatchPhase::Playing;
        entry.on_chain.move_count = entry.state.move_count;
        entry.on_chain.current_player = entry.state.current_player;
        entry.on_chain.phase = entry.state.phase;
        let _ = mv;
        Ok(self.next_tx_id())
    }

    async fn end_match(&self, match_id: &MatchId, _match_hash: &str, _hot_url: &str) -> Result<()> {
        self.maybe_fail()?;
        let mut matches = self.matches.lock().unwrap();
        let entry = matches
            .get_mut(match_id)
            .ok_or(AnchorMatchError::MatchNotFound(*match_id))?;
        entry.state.phase = MatchPhase::Ended;
        entry.state.ended_at = Some(Utc::now());
        entry.on_chain.phase = MatchPhase::Ended;
        Ok(())
    }

    async fn anchor_batch(
        &self,
        batch_id: &BatchId,
        _merkle_root: [u8; 32],
        _count: u32,
        first_match_id: &MatchId,
        last_match_id: &MatchId,
        _wallet: &WalletHandle,
    ) -> Result<TxId> {
        self.maybe_fail()?;
        let mut batches = self.batches.lock().unwrap();
        batches.insert(*first_match_id, batch_id.clone());
        batches.insert(*last_match_id, batch_id.clone());
        Ok(self.next_tx_id())
    }

    async fn anchor_match_record(
        &self,
        _match_id: &str,
        _content_hash: &str,
        _wallet: &WalletHandle,
    ) -> Result<TxId> {
        self.maybe_fail()?;
        Ok(self.next_tx_id())
    }

    async fn get_match_state(&self, match_id: &MatchId) -> Result<OnChainMatchState> {
        let matches = self.matches.lock().unwrap();
        matches
            .get(match_id)
            .map(|e| e.on_chain.clone())
            .ok_or(AnchorMatchError::MatchNotFound(*match_id))
    }

    async fn find_batch_for_match(&self, match_id: &MatchId) -> Result<Option<BatchId>> {
        Ok(self.batches.lock().unwrap().get(match_id).cloned())
    }

    async fn is_authorized_signer(&self, pubkey: &str) -> Result<bool> {
        Ok(self.authorized.lock().unwrap().contains(pubkey))
    }

    async fn confirm_tx(&self, _tx_id: &TxId) -> Result<TxStatus> {
        if self.never_confirms.load(Ordering::SeqCst) {
            Ok(TxStatus::Pending)
        } else {
            self.maybe_fail()?;
            Ok(TxStatus::Confirmed)
        }
    }

    async fn get_signature_status(&self, tx_id: &TxId) -> Result<TxStatus> {
        if self.sig_status_never_finalizes.load(Ordering::SeqCst) {
            Ok(TxStatus::Pending)
        } else {
            self.confirm_tx(tx_id).await
        }
    }
}

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

/// In-memory content store, keyed by the same slash-separated paths the
/// production object store uses (`checkpoints/{match_id}/...`,
/// `manifests/{batch_id}.json`).
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// AuthVerifier doubles
// ---------------------------------------------------------------------------

/// Accepts every bearer token, resolving it to a fixed `UserId`.
pub struct AlwaysAuthVerifier {
    pub user_id: UserId,
}

impl AlwaysAuthVerifier {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
        }
    }
}

#[async_trait]
impl AuthVerifier for AlwaysAuthVerifier {
    async fn verify_token(&self, _bearer: &str) -> Result<UserId> {
        Ok(self.user_id.clone())
    }
}

/// Rejects every bearer token with `Unauthorized`.
#[derive(Default)]
pub struct RejectingAuthVerifier;

#[async_trait]
impl AuthVerifier for RejectingAuthVerifier {
    async fn verify_token(&self, _bearer: &str) -> Result<UserId> {
        Err(AnchorMatchError::Unauthorized {
            reason: "test double configured to reject every token".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingMetricsSink
// ---------------------------------------------------------------------------

/// Records every `MetricEvent` and aggregates an on-demand snapshot, so
/// tests can assert both "did this fire" and "what's the running total".
#[derive(Default)]
pub struct RecordingMetricsSink {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetricsSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn record(&self, event: MetricEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let events = self.events.lock().unwrap();
        let mut snap = MetricsSnapshot::default();
        for event in events.iter() {
            match event {
                MetricEvent::MoveSubmitted { .. } => snap.moves_submitted += 1,
                MetricEvent::MoveConfirmed { latency_ms, .. } => {
                    snap.moves_confirmed += 1;
                    snap.confirmation_latencies_ms.push(*latency_ms);
                }
                MetricEvent::MoveFailed { .. } => snap.moves_failed += 1,
                MetricEvent::MoveTimeout { .. } => snap.moves_timed_out += 1,
                MetricEvent::ReconciliationConflict { .. } => snap.reconciliation_conflicts += 1,
                MetricEvent::BreakerOpened => snap.breaker_opens += 1,
                MetricEvent::BreakerClosed => {}
                MetricEvent::RateLimitRejected { .. } => snap.rate_limit_rejections += 1,
                MetricEvent::WalletRotated { .. } => snap.wallet_rotations += 1,
                MetricEvent::BatchFlushed { .. } => snap.batches_flushed += 1,
                MetricEvent::BatchAnchored { .. } => snap.batches_anchored += 1,
                MetricEvent::CheckpointCreated { .. } => snap.checkpoints_created += 1,
            }
        }
        snap
    }
}

// ---------------------------------------------------------------------------
// Clock doubles
// ---------------------------------------------------------------------------

/// A clock pinned to a single instant/timestamp for the life of the test.
pub struct FixedClock {
    instant: Instant,
    timestamp: DateTime<Utc>,
}

impl FixedClock {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            instant: Instant::now(),
            timestamp,
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Instant {
        self.instant
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A clock that only advances when a test calls `advance`, for
/// deterministic timeout/alarm testing without real sleeps.
pub struct SteppableClock {
    state: Mutex<(Instant, DateTime<Utc>)>,
}

impl SteppableClock {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((Instant::now(), timestamp)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut state = self.state.lock().unwrap();
        state.0 += delta
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(0));
        state.1 += delta;
    }
}

impl Clock for SteppableClock {
    fn now(&self) -> Instant {
        self.state.lock().unwrap().0
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().1
    }
}

// ---------------------------------------------------------------------------
// StaticSignerProvider
// ---------------------------------------------------------------------------

/// Signs with a fixed, test-only Ed25519 keypair and reports a fixed
/// wallet handle. Never rotates; the wallet pool's own rotation logic
/// (in `anchormatch-governors`) is tested against this one identity plus
/// its siblings, not against this provider directly.
pub struct StaticSignerProvider {
    signing_key: SigningKey,
    wallet: WalletHandle,
}

impl StaticSignerProvider {
    #[must_use]
    pub fn new(seed: [u8; 32], index: usize) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let pubkey = hex::encode(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            wallet: WalletHandle { pubkey, index },
        }
    }
}

#[async_trait]
impl SignerProvider for StaticSignerProvider {
    async fn sign(&self, bytes: &[u8]) -> Result<SigRecord> {
        let sig = self.signing_key.sign(bytes);
        use base64::Engine as _;
        Ok(SigRecord::ed25519(
            self.wallet.pubkey.clone(),
            base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()),
            Utc::now(),
        ))
    }

    fn current_wallet(&self) -> WalletHandle {
        self.wallet.clone()
    }
}

// ---------------------------------------------------------------------------
// InProcessScheduler
// ---------------------------------------------------------------------------

/// Records scheduled alarms in-process instead of arming a real timer.
/// Tests drive time forward themselves and call `due(now)` to collect
/// everything that should have fired by then.
#[derive(Default)]
pub struct InProcessScheduler {
    next_handle: AtomicU64,
    alarms: Mutex<HashMap<AlarmHandle, (DateTime<Utc>, AlarmKey)>>,
}

impl InProcessScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alarm with a deadline at or before `now`, removing them
    /// from the pending set as it collects them.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<AlarmKey> {
        let mut alarms = self.alarms.lock().unwrap();
        let due_handles: Vec<AlarmHandle> = alarms
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(h, _)| *h)
            .collect();
        due_handles
            .into_iter()
            .filter_map(|h| alarms.remove(&h).map(|(_, key)| key))
            .collect()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.alarms.lock().unwrap().len()
    }
}

impl Scheduler for InProcessScheduler {
    fn schedule_at(&self, deadline: DateTime<Utc>, key: AlarmKey) -> AlarmHandle {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = AlarmHandle(id);
        self.alarms.lock().unwrap().insert(handle, (deadline, key));
        handle
    }

    fn cancel(&self, handle: AlarmHandle) {
        self.alarms.lock().unwrap().remove(&handle);
    }
}

// ---------------------------------------------------------------------------
// StubGameEngine
// ---------------------------------------------------------------------------

/// Deterministic replay stand-in: folds the move sequence into a stable
/// outcome hash instead of running real game rules. `force_mismatch`
/// lets a test simulate a replay disagreement without needing a second
/// real engine.
#[derive(Default)]
pub struct StubGameEngine {
    force_mismatch: std::sync::atomic::AtomicBool,
}

impl StubGameEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_force_mismatch(&self, v: bool) {
        self.force_mismatch.store(v, Ordering::SeqCst);
    }
}

#[async_trait]
impl GameEngine for StubGameEngine {
    async fn replay(&self, game_type: u32, seed: &str, moves: &[MoveEntry]) -> Result<TerminalState> {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(game_type.to_le_bytes());
        hasher.update(seed.as_bytes());
        for mv in moves {
            hasher.update(mv.index.to_le_bytes());
            hasher.update(mv.player_id.as_bytes());
            hasher.update(mv.nonce.to_le_bytes());
        }
        if self.force_mismatch.load(Ordering::SeqCst) {
            hasher.update(b"mismatch");
        }
        let digest = hasher.finalize();
        let winner = moves.last().map(|mv| mv.player_id.clone());
        Ok(TerminalState {
            move_count: moves.len() as u64,
            winner,
            outcome_hash: hex::encode(digest),
        })
    }
}
