//! The blockchain-facing half of a match's lifecycle: rate limiting,
//! wallet selection, circuit-broken submission, confirmation polling,
//! reconciliation, checkpoints, and finalize.
//!
//! [`MatchCoordinator`] drives one [`MatchInstance`] at a time through
//! this protocol. It owns no per-match state itself — everything
//! mutable lives either on the instance (off-chain optimistic state) or
//! behind the shared [`Governors`] (rate limiter counters, breaker
//! state, wallet rotation index), the same split the prior-generation
//! ingress crate drew between its stateless request handler and its
//! stateful escrow manager.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use anchormatch_batcher::BatchManager;
use anchormatch_governors::{BreakerOutcome, BreakerState, GovernorError, Governors};
use anchormatch_types::config::TxConfig;
use anchormatch_types::error::{AnchorMatchError, Result};
use anchormatch_types::ids::{MatchId, TxId, UserId};
use anchormatch_types::model::{
    MatchPhase, MatchRecord, MatchState, MetricEvent, ModelDescriptor, Move, ReasoningSegment,
    Storage, TxStatus, WalletHandle,
};
use anchormatch_types::ports::{BlockchainClient, Clock, MetricsSink, SignerProvider, Store};

use crate::error::CoordinatorError;
use crate::instance::InstanceRegistry;

/// Reports a transaction's status as it moves through confirmation, so
/// a caller watching a match can surface `Pending | Confirmed | Failed
/// | Timeout` transitions live instead of only seeing the final
/// `submit_move` result.
pub type StatusCallback = Arc<dyn Fn(MatchId, TxStatus) + Send + Sync>;

const MAX_CONFIRM_ATTEMPTS: u32 = 3;
const CONFIRM_BACKOFF_CAP: std::time::Duration = std::time::Duration::from_secs(10);
const SIGNATURE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

fn dt_from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn ms_to_chrono(ms: u64) -> ChronoDuration {
    ChronoDuration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Drives matches through the blockchain-facing protocol: one
/// coordinator serves every live match, serialized per-match through
/// the owning [`crate::instance::MatchInstance`].
pub struct MatchCoordinator {
    instances: Arc<InstanceRegistry>,
    blockchain: Arc<dyn BlockchainClient>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    governors: Governors,
    /// Batch manager for finalize's preferred anchoring path. `None`
    /// means batching is disabled and `finalize` calls
    /// `blockchain.end_match` directly instead.
    batcher: Option<Arc<BatchManager>>,
    /// Signs the canonical `MatchRecord` at finalize. `None` ships an
    /// unsigned record — acceptable for a core run without a configured
    /// signing identity, but `verify`'s signature layer then has
    /// nothing to check.
    signer: Option<Arc<dyn SignerProvider>>,
    tx: TxConfig,
}

impl MatchCoordinator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instances: Arc<InstanceRegistry>,
        blockchain: Arc<dyn BlockchainClient>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
        governors: Governors,
        batcher: Option<Arc<BatchManager>>,
        signer: Option<Arc<dyn SignerProvider>>,
        tx: TxConfig,
    ) -> Self {
        Self {
            instances,
            blockchain,
            store,
            clock,
            metrics,
            governors,
            batcher,
            signer,
            tx,
        }
    }

    /// `submit_move`: the full nine-step protocol. Takes an
    /// already-authenticated `bearer` so the instance can re-verify it
    /// binds to `user_id` — the token's `user_id` must equal the
    /// operation's `user_id`.
    #[tracing::instrument(skip(self, mv, bearer, override_wallet, status_callback), fields(match_id = %match_id))]
    pub async fn submit_move(
        &self,
        match_id: MatchId,
        mv: Move,
        user_id: &str,
        bearer: &str,
        override_wallet: Option<WalletHandle>,
        status_callback: Option<&StatusCallback>,
    ) -> Result<MatchState> {
        let user = UserId::new(user_id);

        // 1. Rate limit.
        let decision = self.governors.rate_limiter.check(&user).await;
        if !decision.allowed {
            self.metrics.record(MetricEvent::RateLimitRejected { user_id: user.clone() });
            return Err(AnchorMatchError::RateLimited {
                user_id: user,
                retry_at: dt_from_unix(decision.reset_at_unix),
            });
        }

        // 2. Preflight: on-chain state must already be in Playing.
        let on_chain = self.blockchain.get_match_state(&match_id).await?;
        if on_chain.phase != MatchPhase::Playing {
            return Err(AnchorMatchError::WrongPhase {
                expected: "playing".to_string(),
                actual: on_chain.phase.to_string(),
            });
        }

        // 3. Wallet selection.
        let wallet = override_wallet.unwrap_or_else(|| self.governors.wallet_pool.current());

        // 4/5/6. Submit through the breaker (which also records the tx
        // against the wallet pool); the instance performs the
        // optimistic apply and pending-transaction tracking atomically
        // once a tx id exists, so an interrupted submit never leaves
        // state mutated without a tracked pending entry.
        let tx_id = self.submit_through_breaker(&match_id, &mv, &wallet).await?;
        self.metrics.record(MetricEvent::MoveSubmitted { match_id });

        let instance = self.instances.get_or_create(match_id);
        let submitted_at = self.clock.timestamp();
        instance
            .submit_move(mv, &tx_id, user_id, bearer, ms_to_chrono(self.tx.tx_timeout_ms))
            .await?;

        // 7/8. Confirm with retry, then poll signature status.
        let deadline = submitted_at + ms_to_chrono(self.tx.tx_timeout_ms);
        let status = self.confirm_move(match_id, &tx_id, deadline, status_callback).await;

        // 9. Outcome.
        match status {
            Ok(TxStatus::Confirmed) => {
                let confirmed = instance.confirm_pending(&tx_id).await?;
                let latency_ms = (self.clock.timestamp() - submitted_at)
                    .num_milliseconds()
                    .max(0) as u64;
                self.metrics
                    .record(MetricEvent::MoveConfirmed { match_id, latency_ms });

                tracing::debug!(%match_id, %tx_id, "pending transaction cleared on confirmation");
                if confirmed.move_count % self.tx.sync_interval_moves.max(1) == 0 {
                    self.reconcile(match_id).await?;
                }
                if confirmed.high_value
                    && confirmed.move_count % self.tx.checkpoint_interval_moves.max(1) == 0
                {
                    if let Err(err) = self.create_checkpoint(match_id, confirmed.move_count).await {
                        tracing::warn!(%match_id, error = %err, "checkpoint creation failed, continuing");
                    }
                }
                Ok(confirmed)
            }
            Ok(TxStatus::Failed) => {
                instance.rollback_pending(&tx_id).await?;
                self.metrics.record(MetricEvent::MoveFailed {
                    match_id,
                    reason: "chain rejected transaction".to_string(),
                });
                tracing::error!(%match_id, %tx_id, "chain rejected submitted move, rolled back");
                Err(CoordinatorError::SigningRejected {
                    match_id,
                    reason: "chain rejected transaction".to_string(),
                }
                .into())
            }
            Ok(TxStatus::Timeout) => {
                instance.rollback_pending(&tx_id).await?;
                self.metrics.record(MetricEvent::MoveTimeout { match_id });
                tracing::error!(%match_id, %tx_id, "move confirmation timed out, rolled back");
                Err(CoordinatorError::ConfirmationTimeout { match_id }.into())
            }
            Ok(TxStatus::Pending) => {
                // poll_signature_status only returns once the status
                // is no longer Pending; reaching here would be a bug
                // in that loop, not a reachable outcome of a real call.
                instance.rollback_pending(&tx_id).await?;
                Err(CoordinatorError::ConfirmationTimeout { match_id }.into())
            }
            Err(err) => {
                instance.rollback_pending(&tx_id).await?;
                self.metrics.record(MetricEvent::MoveFailed {
                    match_id,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn submit_through_breaker(
        &self,
        match_id: &MatchId,
        mv: &Move,
        wallet: &WalletHandle,
    ) -> Result<TxId> {
        let state_before = self.governors.circuit_breaker.state();
        let blockchain = self.blockchain.clone();
        let wallet_pool = self.governors.wallet_pool.clone();
        let match_id = *match_id;
        let mv = mv.clone();
        let wallet = wallet.clone();

        let outcome = self
            .governors
            .circuit_breaker
            .execute(|| async move {
                wallet_pool.record_tx();
                blockchain.submit_move(&match_id, &mv, &wallet).await
            })
            .await;

        let state_after = self.governors.circuit_breaker.state();
        if state_before != BreakerState::Open && state_after == BreakerState::Open {
            self.metrics.record(MetricEvent::BreakerOpened);
            tracing::warn!("circuit breaker opened after consecutive blockchain failures");
        } else if state_before != BreakerState::Closed && state_after == BreakerState::Closed {
            self.metrics.record(MetricEvent::BreakerClosed);
            tracing::info!("circuit breaker closed, blockchain calls resumed");
        }

        match outcome {
            Ok(tx_id) => Ok(tx_id),
            Err(BreakerOutcome::Open(GovernorError::BreakerOpen { next_attempt_at_unix })) => {
                Err(AnchorMatchError::BreakerOpen {
                    next_attempt_at: dt_from_unix(next_attempt_at_unix),
                })
            }
            Err(BreakerOutcome::Open(other)) => Err(AnchorMatchError::Internal(other.to_string())),
            Err(BreakerOutcome::Inner(err)) => Err(CoordinatorError::SubmitFailed {
                match_id,
                reason: err.to_string(),
            }
            .into()),
        }
    }

    /// Races `confirm_tx` against `deadline` with bounded retry on
    /// transient failures, then polls `get_signature_status` every
    /// second until a terminal status or the deadline passes.
    async fn confirm_move(
        &self,
        match_id: MatchId,
        tx_id: &TxId,
        deadline: DateTime<Utc>,
        status_callback: Option<&StatusCallback>,
    ) -> Result<TxStatus> {
        let status = self.retry_confirm_tx(tx_id, deadline).await?;
        if let Some(cb) = status_callback {
            cb(match_id, status);
        }
        if status != TxStatus::Pending {
            return Ok(status);
        }
        self.poll_signature_status(match_id, tx_id, deadline, status_callback).await
    }

    async fn retry_confirm_tx(&self, tx_id: &TxId, deadline: DateTime<Utc>) -> Result<TxStatus> {
        let mut backoff = std::time::Duration::from_secs(1);
        let mut last_err: Option<AnchorMatchError> = None;

        for attempt in 0..MAX_CONFIRM_ATTEMPTS {
            let remaining = (deadline - self.clock.timestamp()).to_std().unwrap_or(std::time::Duration::ZERO);
            if remaining.is_zero() {
                return Ok(TxStatus::Timeout);
            }
            match tokio::time::timeout(remaining, self.blockchain.confirm_tx(tx_id)).await {
                Ok(Ok(status)) => return Ok(status),
                Ok(Err(err)) if err.is_retryable() => last_err = Some(err),
                Ok(Err(err)) => return Err(err),
                Err(_elapsed) => return Ok(TxStatus::Timeout),
            }
            if attempt + 1 < MAX_CONFIRM_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(CONFIRM_BACKOFF_CAP);
            }
        }
        Err(last_err.unwrap_or(AnchorMatchError::Transient {
            reason: "confirm_tx retries exhausted".to_string(),
        }))
    }

    async fn poll_signature_status(
        &self,
        match_id: MatchId,
        tx_id: &TxId,
        deadline: DateTime<Utc>,
        status_callback: Option<&StatusCallback>,
    ) -> Result<TxStatus> {
        loop {
            let status = self.blockchain.get_signature_status(tx_id).await?;
            if let Some(cb) = status_callback {
                cb(match_id, status);
            }
            if status != TxStatus::Pending {
                return Ok(status);
            }
            if self.clock.timestamp() >= deadline {
                return Ok(TxStatus::Timeout);
            }
            tokio::time::sleep(SIGNATURE_POLL_INTERVAL).await;
        }
    }

    /// The timeout-alarm handler: sweeps every pending transaction on
    /// `match_id` older than its own deadline, rolling each back and
    /// reporting `Timeout`.
    #[tracing::instrument(skip(self), fields(match_id = %match_id))]
    pub async fn handle_move_timeout_alarm(&self, match_id: MatchId) -> Result<Vec<TxId>> {
        let instance = self.instances.get_or_create(match_id);
        let now = self.clock.timestamp();
        let expired = instance.sweep_timeouts(now).await?;
        for _ in &expired {
            self.metrics.record(MetricEvent::MoveTimeout { match_id });
        }
        if !expired.is_empty() {
            tracing::warn!(%match_id, count = expired.len(), "swept expired pending transactions on alarm");
        }
        Ok(expired)
    }

    /// `reconcile`: compares off-chain and on-chain state and either
    /// clears settled pending entries or pauses the match and reports
    /// the divergent fields as a `Conflict`.
    #[tracing::instrument(skip(self), fields(match_id = %match_id))]
    pub async fn reconcile(&self, match_id: MatchId) -> Result<MatchState> {
        let on_chain = self.blockchain.get_match_state(&match_id).await?;
        let instance = self.instances.get_or_create(match_id);
        let outcome = instance.sync(&on_chain).await?;
        if outcome.is_conflict() {
            self.metrics.record(MetricEvent::ReconciliationConflict {
                match_id,
                fields: outcome.conflict_fields.clone(),
            });
            tracing::error!(%match_id, fields = ?outcome.conflict_fields, "reconciliation conflict, match paused");
            return Err(CoordinatorError::ReconciliationConflict {
                match_id,
                fields: outcome.conflict_fields,
            }
            .into());
        }
        Ok(outcome.state)
    }

    /// `checkpoint`: snapshots, hashes, and uploads a checkpoint
    /// artifact, then anchors its hash on-chain under a derived match
    /// id. Anchor failure is logged and swallowed by the caller
    /// (`submit_move`'s high-value checkpoint trigger treats this
    /// method's own `Err` as fatal only for the upload half).
    #[tracing::instrument(skip(self), fields(match_id = %match_id))]
    pub async fn create_checkpoint(&self, match_id: MatchId, event_index: u64) -> Result<()> {
        let instance = self.instances.get_or_create(match_id);
        let checkpoint = instance
            .checkpoint(event_index)
            .await
            .map_err(|e| CoordinatorError::CheckpointFailed {
                match_id,
                event_index,
                reason: e.to_string(),
            })?;

        let bytes = anchormatch_canon::canonicalize(&checkpoint)
            .map_err(|e| CoordinatorError::CheckpointFailed {
                match_id,
                event_index,
                reason: e.to_string(),
            })?;
        let state_hash = anchormatch_canon::hash(&bytes);
        let path = format!("checkpoints/{match_id}/{event_index}.json");
        self.store
            .put(&path, bytes)
            .await
            .map_err(|e| CoordinatorError::CheckpointFailed {
                match_id,
                event_index,
                reason: e.to_string(),
            })?;
        self.metrics.record(MetricEvent::CheckpointCreated { match_id, event_index });
        tracing::info!(%match_id, event_index, "checkpoint created");

        let derived_id = match_id.checkpoint_id(event_index);
        let wallet = self.governors.wallet_pool.current();
        if let Err(err) = self.blockchain.anchor_match_record(&derived_id, &state_hash, &wallet).await {
            tracing::warn!(%match_id, event_index, error = %err, "checkpoint anchor failed, json retained in store for later re-anchor");
        }
        Ok(())
    }

    /// `finalize`, the nine-step close-out of a match into a signed,
    /// hash-addressed `MatchRecord`.
    #[tracing::instrument(skip(self, chain_of_thought, model_versions), fields(match_id = %match_id))]
    pub async fn finalize(
        &self,
        match_id: MatchId,
        chain_of_thought: Option<HashMap<String, Vec<ReasoningSegment>>>,
        model_versions: Option<HashMap<String, ModelDescriptor>>,
    ) -> Result<MatchRecord> {
        let instance = self.instances.get_or_create(match_id);
        instance.rehydrate().await?;

        // 2. Await any in-flight pending transaction, best effort.
        let pending_snapshot = instance.get_state().await?;
        for (tx_id_raw, _) in pending_snapshot.pending_transactions {
            let tx_id = TxId::new(tx_id_raw);
            let deadline = self.clock.timestamp() + ms_to_chrono(self.tx.tx_timeout_ms);
            match self.confirm_move(match_id, &tx_id, deadline, None).await {
                Ok(TxStatus::Confirmed) => {
                    let _ = instance.confirm_pending(&tx_id).await;
                }
                Ok(_) => {
                    let _ = instance.rollback_pending(&tx_id).await;
                }
                Err(err) => {
                    tracing::warn!(%match_id, %tx_id, error = %err, "best-effort confirmation failed during finalize");
                    let _ = instance.rollback_pending(&tx_id).await;
                }
            }
        }

        // 3. Read final on-chain state.
        let on_chain = self.blockchain.get_match_state(&match_id).await?;
        if on_chain.phase != MatchPhase::Ended {
            return Err(AnchorMatchError::NotFinalized(match_id));
        }

        // 4. Collect the record from the local event collector. A
        // retried finalize call on an already-`Ended` local state hits
        // `WrongPhase` here; fall back to the current snapshot instead
        // of treating that as fatal.
        let local_state = match instance.finalize().await {
            Ok(state) => state,
            Err(AnchorMatchError::WrongPhase { .. }) => instance.get_state().await?,
            Err(err) => return Err(err),
        };
        let moves = instance.move_log().await?;

        // hot_path is a deterministic function of match_id, so it can be
        // assigned before signing instead of being retrofitted afterward —
        // the signed bytes must match what a verifier re-canonicalizes from
        // the stored record, and that record carries storage.hot_url.
        let hot_path = format!("matches/{match_id}.json");

        let mut record = MatchRecord {
            match_id,
            version: "1.0.0".to_string(),
            game_type: local_state.game_type,
            seed: local_state.seed.clone(),
            players: local_state.players.clone(),
            moves,
            phase: MatchPhase::Ended,
            chain_of_thought: chain_of_thought.unwrap_or_default(),
            model_versions: model_versions.unwrap_or_default(),
            storage: Storage { hot_url: Some(hot_path.clone()) },
            signatures: Vec::new(),
        };
        record
            .validate_invariants()
            .map_err(|reason| AnchorMatchError::Validation { reason })?;

        // 6. Canonicalize, sign, re-canonicalize with the signature, hash.
        let unsigned = anchormatch_canon::canonicalize(&record)
            .map_err(|e| AnchorMatchError::Internal(e.to_string()))?;
        if let Some(signer) = &self.signer {
            let signature = signer.sign(&unsigned).await?;
            record.signatures.push(signature);
        }

        // 7. Upload the signed record to hot storage and hash it.
        let final_bytes = anchormatch_canon::canonicalize(&record)
            .map_err(|e| AnchorMatchError::Internal(e.to_string()))?;
        let content_hash = anchormatch_canon::hash(&final_bytes);
        self.store.put(&hot_path, final_bytes).await?;

        // 8. Hand off to the batcher, or end the match directly.
        match &self.batcher {
            Some(batcher) => {
                batcher
                    .add(match_id, content_hash, hot_path)
                    .await
                    .map_err(|e| CoordinatorError::FinalizeFailed {
                        match_id,
                        reason: e.to_string(),
                    })?;
            }
            None => {
                self.blockchain.end_match(&match_id, &content_hash, &hot_path).await?;
            }
        }

        // 9. Discard the off-chain state.
        self.instances.remove(&match_id);
        tracing::info!(%match_id, move_count = record.moves.len(), "match finalized");

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anchormatch_governors::CircuitBreaker;
    use anchormatch_governors::RateLimiter;
    use anchormatch_governors::WalletPool;
    use anchormatch_types::model::{CreateMatchRequest, Player};
    use anchormatch_types::test_helpers::{
        AlwaysAuthVerifier, FixedClock, InMemoryBlockchainClient, InMemoryStore,
        InProcessScheduler, RecordingMetricsSink, StaticSignerProvider,
    };

    use super::*;

    fn sample_move(player_id: &str, nonce: u64) -> Move {
        Move {
            player_id: player_id.to_string(),
            move_type: "place".to_string(),
            payload: serde_json::json!({"cell": nonce}),
            nonce,
        }
    }

    fn create_req(match_id: MatchId) -> CreateMatchRequest {
        CreateMatchRequest {
            match_id,
            game_name: "tic-tac-toe".to_string(),
            game_type: 1,
            seed: "42".to_string(),
            high_value: false,
        }
    }

    /// Every fixture wires the same doubles with its own tx config, so
    /// individual tests only vary what they need (rate limiter size,
    /// breaker threshold, tx_timeout_ms).
    struct Harness {
        coordinator: MatchCoordinator,
        blockchain: Arc<InMemoryBlockchainClient>,
        store: Arc<InMemoryStore>,
        metrics: Arc<RecordingMetricsSink>,
        instances: Arc<InstanceRegistry>,
    }

    fn build_harness(tx: TxConfig, max_requests: u32, failure_threshold: u32) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let store = Arc::new(InMemoryStore::new());
        let blockchain = Arc::new(InMemoryBlockchainClient::new());
        let metrics = Arc::new(RecordingMetricsSink::new());
        let auth = Arc::new(AlwaysAuthVerifier::new("user-1"));
        let scheduler = Arc::new(InProcessScheduler::new());
        let instances = Arc::new(InstanceRegistry::new(
            store.clone(),
            scheduler.clone(),
            clock.clone(),
            auth.clone(),
        ));

        let wallet_pool = WalletPool::new(vec!["wallet-a".to_string()], 1000).unwrap();
        let rate_limiter = RateLimiter::in_process(max_requests, 60, clock.clone());
        let circuit_breaker = CircuitBreaker::new(failure_threshold, 60_000, 1, clock.clone());
        let governors = Governors::new(wallet_pool, rate_limiter, circuit_breaker);

        let signer: Arc<dyn SignerProvider> = Arc::new(StaticSignerProvider::new([9u8; 32], 0));

        let coordinator = MatchCoordinator::new(
            instances.clone(),
            blockchain.clone() as Arc<dyn BlockchainClient>,
            store.clone() as Arc<dyn Store>,
            clock,
            metrics.clone() as Arc<dyn MetricsSink>,
            governors,
            None,
            Some(signer),
            tx,
        );

        Harness {
            coordinator,
            blockchain,
            store: store as Arc<InMemoryStore>,
            metrics,
            instances,
        }
    }

    /// Creates the off-chain instance and puts the on-chain side of
    /// `match_id` into `Playing` by calling the blockchain double's own
    /// `submit_move` once as setup — its in-memory implementation has
    /// the side effect of forcing on-chain phase to `Playing`, which is
    /// exactly the precondition `submit_move`'s preflight check needs.
    async fn seed_playing_match(h: &Harness, match_id: MatchId) {
        h.blockchain.create_match(create_req(match_id)).await.unwrap();

        let instance = h.instances.get_or_create(match_id);
        let mut state = instance.create(create_req(match_id)).await.unwrap();
        state.players = vec![Player::new("pk-a", "human"), Player::new("pk-b", "human")];
        state.player_count = 2;
        state.phase = MatchPhase::Playing;
        {
            let mut guard = instance.state.write().await;
            *guard = Some(state);
        }

        let seed_wallet = WalletHandle {
            pubkey: "seed-wallet".to_string(),
            index: 0,
        };
        h.blockchain
            .submit_move(&match_id, &sample_move("pk-a", 0), &seed_wallet)
            .await
            .unwrap();
        // That call also bumped the on-chain move_count to 1; bring the
        // off-chain copy in line so the first real submit_move below
        // doesn't immediately disagree with it at the next reconcile.
        let mut guard = instance.state.write().await;
        if let Some(s) = guard.as_mut() {
            s.move_count = 1;
        }
    }

    #[tokio::test]
    async fn submit_move_confirms_and_advances_state() {
        let tx = TxConfig {
            tx_timeout_ms: 30_000,
            sync_interval_moves: 1000,
            checkpoint_interval_moves: 20,
        };
        let h = build_harness(tx, 10, 5);
        let match_id = MatchId::new();
        seed_playing_match(&h, match_id).await;

        let mv = sample_move("pk-b", 1);
        let confirmed = h
            .coordinator
            .submit_move(match_id, mv, "user-1", "bearer", None, None)
            .await
            .unwrap();

        assert_eq!(confirmed.move_count, 2);
        assert!(!confirmed.has_pending());

        let events = h.metrics.events();
        assert!(events.iter().any(|e| matches!(e, MetricEvent::MoveSubmitted { .. })));
        assert!(events.iter().any(|e| matches!(e, MetricEvent::MoveConfirmed { .. })));
    }

    #[tokio::test]
    async fn submit_move_rejected_when_rate_limited() {
        let tx = TxConfig {
            tx_timeout_ms: 30_000,
            sync_interval_moves: 1000,
            checkpoint_interval_moves: 20,
        };
        let h = build_harness(tx, 1, 5);
        let match_id = MatchId::new();
        seed_playing_match(&h, match_id).await;

        h.coordinator
            .submit_move(match_id, sample_move("pk-a", 1), "user-1", "bearer", None, None)
            .await
            .unwrap();

        let err = h
            .coordinator
            .submit_move(match_id, sample_move("pk-b", 2), "user-1", "bearer", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorMatchError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn submit_move_rejected_when_breaker_open() {
        let tx = TxConfig {
            tx_timeout_ms: 30_000,
            sync_interval_moves: 1000,
            checkpoint_interval_moves: 20,
        };
        let h = build_harness(tx, 10, 1);
        let match_id = MatchId::new();
        seed_playing_match(&h, match_id).await;

        h.blockchain.fail_next_n_calls(1);
        let first = h
            .coordinator
            .submit_move(match_id, sample_move("pk-a", 1), "user-1", "bearer", None, None)
            .await;
        assert!(first.is_err());

        let second = h
            .coordinator
            .submit_move(match_id, sample_move("pk-b", 2), "user-1", "bearer", None, None)
            .await
            .unwrap_err();
        assert!(matches!(second, AnchorMatchError::BreakerOpen { .. }));

        let events = h.metrics.events();
        assert!(events.iter().any(|e| matches!(e, MetricEvent::BreakerOpened)));
    }

    #[tokio::test]
    async fn submit_move_rolls_back_on_immediate_timeout() {
        let tx = TxConfig {
            tx_timeout_ms: 0,
            sync_interval_moves: 1000,
            checkpoint_interval_moves: 20,
        };
        let h = build_harness(tx, 10, 5);
        let match_id = MatchId::new();
        seed_playing_match(&h, match_id).await;

        let err = h
            .coordinator
            .submit_move(match_id, sample_move("pk-a", 1), "user-1", "bearer", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorMatchError::Transient { .. }));

        let instance = h.instances.get_or_create(match_id);
        let state = instance.get_state().await.unwrap();
        assert!(!state.has_pending(), "rollback must clear the pending entry on timeout");
        assert_eq!(state.move_count, 1, "the rolled-back move must not count");
    }

    #[tokio::test]
    async fn reconcile_pauses_the_match_on_divergence() {
        let tx = TxConfig::default();
        let h = build_harness(tx, 10, 5);
        let match_id = MatchId::new();
        h.blockchain.create_match(create_req(match_id)).await.unwrap();

        let instance = h.instances.get_or_create(match_id);
        let mut state = instance.create(create_req(match_id)).await.unwrap();
        state.players = vec![Player::new("pk-a", "human"), Player::new("pk-b", "human")];
        state.player_count = 2;
        state.phase = MatchPhase::Playing;
        state.move_count = 7;
        {
            let mut guard = instance.state.write().await;
            *guard = Some(state);
        }

        let err = h.coordinator.reconcile(match_id).await.unwrap_err();
        assert!(matches!(err, AnchorMatchError::Conflict { .. }));

        let state = instance.get_state().await.unwrap();
        assert_eq!(state.phase, MatchPhase::Paused);
    }

    #[tokio::test]
    async fn create_checkpoint_persists_an_artifact_in_the_store() {
        let tx = TxConfig::default();
        let h = build_harness(tx, 10, 5);
        let match_id = MatchId::new();
        seed_playing_match(&h, match_id).await;

        h.coordinator.create_checkpoint(match_id, 20).await.unwrap();

        let listed = h.store.list(&format!("checkpoints/{match_id}/")).await.unwrap();
        assert_eq!(listed.len(), 1);

        let events = h.metrics.events();
        assert!(events.iter().any(|e| matches!(e, MetricEvent::CheckpointCreated { .. })));
    }

    #[tokio::test]
    async fn finalize_produces_a_valid_signed_record() {
        let tx = TxConfig::default();
        let h = build_harness(tx, 10, 5);
        let match_id = MatchId::new();
        seed_playing_match(&h, match_id).await;

        h.coordinator
            .submit_move(match_id, sample_move("pk-b", 1), "user-1", "bearer", None, None)
            .await
            .unwrap();

        h.blockchain.end_match(&match_id, "placeholder-hash", "placeholder-url").await.unwrap();

        let record = h.coordinator.finalize(match_id, None, None).await.unwrap();
        assert!(record.validate_invariants().is_ok());
        assert_eq!(record.phase, MatchPhase::Ended);
        assert_eq!(record.moves.len(), 1);
        assert_eq!(record.signatures.len(), 1);
        assert!(record.storage.hot_url.is_some());

        assert!(h.instances.get(&match_id).is_none());

        let bytes = h
            .store
            .get(record.storage.hot_url.as_deref().unwrap())
            .await
            .unwrap();
        assert!(bytes.is_some());

        // The signature must verify against the record as actually
        // stored (hot_url populated), not just against some in-memory
        // snapshot taken before storage was assigned.
        let stored: MatchRecord = serde_json::from_slice(&bytes.unwrap()).unwrap();
        assert_eq!(stored.storage.hot_url, record.storage.hot_url);
        let unsigned = anchormatch_canon::canonicalize(&stored.without_signatures()).unwrap();
        for sig in &stored.signatures {
            let ok = anchormatch_canon::verify(&unsigned, &sig.signature, &sig.signer).unwrap();
            assert!(ok, "signature from {} must verify against the stored, hot_url-bearing record", sig.signer);
        }
    }
}
