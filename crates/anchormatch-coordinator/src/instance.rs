//! The durable per-match actor: the single-writer runtime that owns one
//! match's `MatchState`, persists every mutation before acknowledging
//! it, and fans state updates out to subscribers.
//!
//! Follows a phase-gated-lock idiom (generalized from a single boolean
//! phase flag to the five-state `MatchPhase::accepts_mutation` gate)
//! composed with an `Arc<RwLock<_>>`-owned-state plus
//! broadcast-subscriber shape. [`MatchInstance`] does not hold a
//! `std::sync::Mutex` around its state — callers serialize through
//! `tokio::sync::RwLock`, so "single writer" is an invariant of how the
//! lock is used (every mutating method takes the write half), not of a
//! separate actor mailbox.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use anchormatch_types::error::{AnchorMatchError, Result};
use anchormatch_types::ids::{MatchId, TxId};
use anchormatch_types::model::{
    Checkpoint, CheckpointRef, CreateMatchRequest, MatchPhase, MatchState, Move, MoveEntry,
    OnChainMatchState, PendingTransaction, Player,
};
use anchormatch_types::ports::{AlarmHandle, AlarmKey, AuthVerifier, Clock, Scheduler, Store};

use crate::error::InstanceError;

/// Capacity of each match's broadcast channel. A slow subscriber that
/// falls this far behind starts missing updates (`RecvError::Lagged`)
/// rather than backpressuring the writer; callers that need every
/// update should resubscribe after a lag and call `get_state()`.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// One state-change notification, matching the `{"type": "state_update",
/// ...}` shape callers subscribe to over the operation-routing surface.
#[derive(Debug, Clone, Serialize)]
pub struct StateUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub match_state: MatchState,
}

/// The result of reconciling off-chain state against a freshly read
/// on-chain snapshot.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub state: MatchState,
    pub conflict_fields: Vec<String>,
}

impl SyncOutcome {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        !self.conflict_fields.is_empty()
    }
}

/// One live match's state, behind a lock, with its own subscriber fan-out.
///
/// There is exactly one of these per `match_id` while the match is
/// live; [`InstanceRegistry`] is what makes that true.
pub struct MatchInstance {
    match_id: MatchId,
    store: Arc<dyn Store>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    auth: Arc<dyn AuthVerifier>,
    /// `pub(crate)` rather than private so sibling-module tests (and
    /// `coordinator`'s own test setup) can drive a match directly into
    /// a phase the public API has no transition for yet, the same way
    /// this module's own tests do.
    pub(crate) state: RwLock<Option<MatchState>>,
    /// Confirmed-move log, separate from `state`: the event collector
    /// `finalize` reads to build a `MatchRecord`. A move is appended
    /// here once its transaction confirms, never on the optimistic
    /// apply in `submit_move`, so a rolled-back move never appears.
    moves: RwLock<Vec<MoveEntry>>,
    updates: broadcast::Sender<StateUpdate>,
    move_alarm: StdMutex<Option<AlarmHandle>>,
}

impl MatchInstance {
    #[must_use]
    pub fn new(
        match_id: MatchId,
        store: Arc<dyn Store>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn AuthVerifier>,
    ) -> Self {
        let (updates, _rx) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        Self {
            match_id,
            store,
            scheduler,
            clock,
            auth,
            state: RwLock::new(None),
            moves: RwLock::new(Vec::new()),
            updates,
            move_alarm: StdMutex::new(None),
        }
    }

    fn storage_key(&self) -> String {
        format!("match:{}", self.match_id)
    }

    fn moves_key(&self) -> String {
        format!("match:{}:moves", self.match_id)
    }

    /// Subscribe to this match's state-update stream. Each mutating
    /// operation below broadcasts exactly once, after persisting.
    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.updates.subscribe()
    }

    /// Load this match's state from the `Store` if it isn't already
    /// resident. A no-op once `create()` or a prior `rehydrate()` has
    /// populated the in-memory state, so it is safe to call on every
    /// operation after a process restart.
    pub async fn rehydrate(&self) -> Result<bool> {
        {
            let guard = self.state.read().await;
            if guard.is_some() {
                return Ok(true);
            }
        }
        let Some(bytes) = self.store.get(&self.storage_key()).await? else {
            return Ok(false);
        };
        let loaded: MatchState = serde_json::from_slice(&bytes)?;
        let mut guard = self.state.write().await;
        if guard.is_none() {
            *guard = Some(loaded);
        }
        Ok(true)
    }

    /// `match.create`: initializes a fresh `Created`-phase state and
    /// persists it before returning.
    pub async fn create(&self, req: CreateMatchRequest) -> Result<MatchState> {
        let mut state = MatchState::new(req.match_id, req.game_type, req.seed, self.clock.timestamp());
        state.high_value = req.high_value;
        {
            let mut guard = self.state.write().await;
            *guard = Some(state.clone());
        }
        self.persist_and_broadcast(&state).await?;
        Ok(state)
    }

    /// `match.join`: adds a player while the match is `Created` or
    /// `Waiting`, moving it to `Waiting` on the first join.
    #[tracing::instrument(skip(self, player_pubkey), fields(match_id = %self.match_id))]
    pub async fn join(&self, player_pubkey: &str) -> Result<MatchState> {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or(InstanceError::NotFound(self.match_id))?;

        if !matches!(state.phase, MatchPhase::Created | MatchPhase::Waiting) {
            return Err(InstanceError::WrongPhase {
                match_id: self.match_id,
                expected: "created or waiting".to_string(),
                actual: state.phase.to_string(),
            }
            .into());
        }
        if state.players.iter().any(|p| p.pubkey == player_pubkey) {
            return Err(InstanceError::PlayerAlreadyJoined {
                match_id: self.match_id,
                pubkey: player_pubkey.to_string(),
            }
            .into());
        }

        state.players.push(Player::new(player_pubkey, "human"));
        state.player_count = u32::try_from(state.players.len()).unwrap_or(u32::MAX);
        if state.phase == MatchPhase::Created {
            state.phase = MatchPhase::Waiting;
        }
        let snapshot = state.clone();
        drop(guard);

        self.persist_and_broadcast(&snapshot).await?;
        Ok(snapshot)
    }

    /// `match.submit_move`: the local, single-writer half of move
    /// submission. Called by the coordinator *after* a tx has
    /// already been accepted by `BlockchainClient::submit_move` — the
    /// `tx_id` here is that transaction's id, used as the
    /// `pending_transactions` key.
    ///
    /// Authenticates `bearer` and requires it to resolve to
    /// `user_id`, requires `Playing` phase, rejects a second
    /// concurrent pending entry, and requires the move's `player_id` to
    /// already be a match participant. On success,
    /// advances `move_count`/`current_player`, snapshots the
    /// pre-mutation state into the new `PendingTransaction` for exact
    /// rollback, and arms a timeout alarm for `tx_timeout` out.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, mv, bearer), fields(match_id = %self.match_id))]
    pub async fn submit_move(
        &self,
        mv: Move,
        tx_id: &TxId,
        user_id: &str,
        bearer: &str,
        tx_timeout: ChronoDuration,
    ) -> Result<MatchState> {
        let authed = self.auth.verify_token(bearer).await?;
        if authed.0 != user_id {
            return Err(InstanceError::UserMismatch {
                token_user: authed.to_string(),
                operation_user: user_id.to_string(),
            }
            .into());
        }

        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or(InstanceError::NotFound(self.match_id))?;

        if state.phase != MatchPhase::Playing {
            return Err(InstanceError::WrongPhase {
                match_id: self.match_id,
                expected: "playing".to_string(),
                actual: state.phase.to_string(),
            }
            .into());
        }
        if state.has_pending() {
            return Err(InstanceError::AlreadyPending(self.match_id).into());
        }
        if mv.move_type.trim().is_empty() {
            return Err(InstanceError::InvalidMove {
                match_id: self.match_id,
                reason: "move type is empty".to_string(),
            }
            .into());
        }
        if !state.players.iter().any(|p| p.pubkey == mv.player_id) {
            return Err(InstanceError::InvalidMove {
                match_id: self.match_id,
                reason: format!("player {} is not a participant in this match", mv.player_id),
            }
            .into());
        }

        let state_before = state.clone();
        let now = self.clock.timestamp();
        let deadline = now + tx_timeout;
        state.move_count += 1;
        state.current_player = state.next_player();
        state.pending_transactions.insert(
            tx_id.to_string(),
            PendingTransaction {
                mv,
                submission_time: now,
                state_before,
                timeout_deadline: deadline,
            },
        );
        let snapshot = state.clone();
        drop(guard);

        self.persist_and_broadcast(&snapshot).await?;
        self.arm_move_alarm(deadline);
        tracing::debug!(match_id = %self.match_id, %tx_id, "pending transaction registered");
        Ok(snapshot)
    }

    /// Drop a confirmed transaction's pending entry. Idempotent: a
    /// `tx_id` that is no longer pending (already confirmed, already
    /// rolled back by a timeout sweep) is not an error.
    pub async fn confirm_pending(&self, tx_id: &TxId) -> Result<MatchState> {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or(InstanceError::NotFound(self.match_id))?;
        let confirmed = state.pending_transactions.remove(&tx_id.0);
        let has_more = state.has_pending();
        let snapshot = state.clone();
        drop(guard);

        if let Some(pending) = confirmed {
            self.append_move_entry(pending.mv, pending.submission_time).await?;
        }
        self.persist_and_broadcast(&snapshot).await?;
        if !has_more {
            self.cancel_move_alarm();
        }
        Ok(snapshot)
    }

    /// Append a confirmed move to the event collector, persisting the
    /// updated log. Called only from `confirm_pending`, so a timed-out
    /// or rolled-back move never shows up in a finalized `MatchRecord`.
    async fn append_move_entry(&self, mv: Move, confirmed_at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.moves.write().await;
        let index = guard.len() as u64;
        guard.push(MoveEntry {
            index,
            player_id: mv.player_id,
            move_type: mv.move_type,
            payload: mv.payload,
            timestamp: confirmed_at,
            nonce: mv.nonce,
        });
        let bytes = serde_json::to_vec(&*guard)?;
        drop(guard);
        self.store.put(&self.moves_key(), bytes).await
    }

    /// The full confirmed-move log for this match, used by `finalize`
    /// to build a `MatchRecord`. Lazily rehydrates from the `Store` if
    /// this instance has not yet loaded it in-process.
    pub async fn move_log(&self) -> Result<Vec<MoveEntry>> {
        {
            let guard = self.moves.read().await;
            if !guard.is_empty() {
                return Ok(guard.clone());
            }
        }
        let Some(bytes) = self.store.get(&self.moves_key()).await? else {
            return Ok(Vec::new());
        };
        let loaded: Vec<MoveEntry> = serde_json::from_slice(&bytes)?;
        Ok(loaded)
    }

    /// Restore the exact pre-submission snapshot for `tx_id` — rollback
    /// must be bitwise equal to the state before the move was applied.
    /// Idempotent against a `tx_id` that already isn't pending —
    /// returns the current state unchanged.
    pub async fn rollback_pending(&self, tx_id: &TxId) -> Result<MatchState> {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or(InstanceError::NotFound(self.match_id))?;

        let snapshot = if let Some(pending) = state.pending_transactions.remove(&tx_id.0) {
            *state = pending.state_before;
            state.clone()
        } else {
            state.clone()
        };
        drop(guard);

        self.persist_and_broadcast(&snapshot).await?;
        self.cancel_move_alarm();
        Ok(snapshot)
    }

    /// Sweep every pending entry whose deadline has passed as of
    /// `now`, restoring each one's `state_before`. Returns the tx ids
    /// rolled back.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<TxId>> {
        let mut guard = self.state.write().await;
        let Some(state) = guard.as_mut() else {
            return Ok(Vec::new());
        };

        let expired: Vec<String> = state
            .pending_transactions
            .iter()
            .filter(|(_, p)| p.timeout_deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        for key in &expired {
            if let Some(pending) = state.pending_transactions.remove(key) {
                *state = pending.state_before;
            }
        }
        let snapshot = state.clone();
        drop(guard);

        self.persist_and_broadcast(&snapshot).await?;
        self.cancel_move_alarm();
        Ok(expired.into_iter().map(TxId::new).collect())
    }

    /// `match.sync`: compares `move_count`, `phase`, `current_player`,
    /// and `seed` against a freshly read on-chain
    /// snapshot. Any disagreement pauses the match (stops accepting
    /// further mutation) and adopts the on-chain values as
    /// authoritative; callers surface `conflict_fields` as a
    /// `Conflict` error and raise an operator alert. When the two
    /// sides agree, any pending transaction is necessarily already
    /// reflected on-chain and is cleared.
    #[tracing::instrument(skip(self, on_chain), fields(match_id = %self.match_id))]
    pub async fn sync(&self, on_chain: &OnChainMatchState) -> Result<SyncOutcome> {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or(InstanceError::NotFound(self.match_id))?;

        let mut mismatches = Vec::new();
        if state.move_count != on_chain.move_count {
            mismatches.push("move_count".to_string());
        }
        if state.phase != on_chain.phase {
            mismatches.push("phase".to_string());
        }
        if state.current_player != on_chain.current_player {
            mismatches.push("current_player".to_string());
        }
        if state.seed != on_chain.seed {
            mismatches.push("seed".to_string());
        }

        if !mismatches.is_empty() {
            state.phase = MatchPhase::Paused;
            state.current_player = on_chain.current_player;
            state.move_count = on_chain.move_count;
            state.player_count = on_chain.player_count;
            state.seed.clone_from(&on_chain.seed);
            let snapshot = state.clone();
            drop(guard);

            self.persist_and_broadcast(&snapshot).await?;
            self.cancel_move_alarm();
            tracing::warn!(match_id = %self.match_id, fields = ?mismatches, "state diverged from chain, match paused");
            return Ok(SyncOutcome {
                state: snapshot,
                conflict_fields: mismatches,
            });
        }

        let had_pending = state.has_pending();
        state.pending_transactions.clear();
        let snapshot = state.clone();
        drop(guard);

        if had_pending {
            self.persist_and_broadcast(&snapshot).await?;
            self.cancel_move_alarm();
        }
        Ok(SyncOutcome {
            state: snapshot,
            conflict_fields: Vec::new(),
        })
    }

    /// Bring a paused match back under normal operation after an
    /// operator has resolved the underlying reconciliation conflict.
    /// `Paused` stays readable but rejects every mutation except this.
    #[tracing::instrument(skip(self), fields(match_id = %self.match_id))]
    pub async fn resume(&self) -> Result<MatchState> {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or(InstanceError::NotFound(self.match_id))?;
        if state.phase == MatchPhase::Paused {
            state.phase = if state.move_count == 0 {
                MatchPhase::Waiting
            } else {
                MatchPhase::Playing
            };
        }
        let snapshot = state.clone();
        drop(guard);
        self.persist_and_broadcast(&snapshot).await?;
        tracing::info!(match_id = %self.match_id, phase = %snapshot.phase, "match resumed from pause");
        Ok(snapshot)
    }

    /// `match.checkpoint`: snapshots the current state into a
    /// `Checkpoint` artifact and records its hash as
    /// `last_checkpoint`. Uploading the artifact and optionally
    /// anchoring it on-chain are the coordinator's job, since only it
    /// holds the `Store` path convention and `BlockchainClient`.
    #[tracing::instrument(skip(self), fields(match_id = %self.match_id))]
    pub async fn checkpoint(&self, event_index: u64) -> Result<Checkpoint> {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or(InstanceError::NotFound(self.match_id))?;

        let cp = Checkpoint {
            match_id: self.match_id,
            event_index,
            state_snapshot: state.clone(),
            timestamp: self.clock.timestamp(),
        };
        let cp_bytes = anchormatch_canon::canonicalize(&cp)
            .map_err(|e| AnchorMatchError::Internal(e.to_string()))?;
        let state_hash = anchormatch_canon::hash(&cp_bytes);
        state.last_checkpoint = Some(CheckpointRef {
            event_index,
            state_hash,
            timestamp: cp.timestamp,
        });
        let snapshot = state.clone();
        drop(guard);

        self.persist_and_broadcast(&snapshot).await?;
        tracing::debug!(match_id = %self.match_id, event_index, "checkpoint scheduled for upload");
        Ok(cp)
    }

    /// `match.finalize`, local half: marks the match `Ended`. The
    /// coordinator still has to await any pending transaction and
    /// collect the `MatchRecord` itself; this just performs the phase
    /// transition once that has happened.
    #[tracing::instrument(skip(self), fields(match_id = %self.match_id))]
    pub async fn finalize(&self) -> Result<MatchState> {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or(InstanceError::NotFound(self.match_id))?;
        if state.phase != MatchPhase::Playing && state.phase != MatchPhase::Waiting {
            return Err(InstanceError::WrongPhase {
                match_id: self.match_id,
                expected: "playing or waiting".to_string(),
                actual: state.phase.to_string(),
            }
            .into());
        }
        state.phase = MatchPhase::Ended;
        state.ended_at = Some(self.clock.timestamp());
        let snapshot = state.clone();
        drop(guard);

        self.persist_and_broadcast(&snapshot).await?;
        tracing::info!(match_id = %self.match_id, move_count = snapshot.move_count, "match instance finalized");
        Ok(snapshot)
    }

    /// Overwrites the held state verbatim, bypassing every phase check.
    /// Lets integration tests (which, unlike this module's own unit
    /// tests, cannot reach the `pub(crate)` `state` field directly)
    /// drive an instance straight into an arbitrary phase/move_count
    /// without replaying every intermediate transition.
    #[cfg(any(test, feature = "test-helpers"))]
    pub async fn force_state(&self, state: MatchState) {
        let mut guard = self.state.write().await;
        *guard = Some(state);
    }

    /// `match.get_state`: readable in every phase, including `Paused`.
    pub async fn get_state(&self) -> Result<MatchState> {
        self.state
            .read()
            .await
            .clone()
            .ok_or_else(|| InstanceError::NotFound(self.match_id).into())
    }

    async fn persist_and_broadcast(&self, state: &MatchState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.store.put(&self.storage_key(), bytes).await?;
        // `send` errors only when there are zero receivers; tokio's
        // broadcast channel drops stale subscribers on its own, so a
        // lagging or absent subscriber never affects this write.
        let _ = self.updates.send(StateUpdate {
            kind: "state_update",
            match_state: state.clone(),
        });
        Ok(())
    }

    fn arm_move_alarm(&self, deadline: DateTime<Utc>) {
        let handle = self
            .scheduler
            .schedule_at(deadline, AlarmKey::MoveTimeout(self.match_id));
        let mut guard = self.move_alarm.lock().expect("move_alarm mutex poisoned");
        if let Some(old) = guard.replace(handle) {
            self.scheduler.cancel(old);
        }
    }

    fn cancel_move_alarm(&self) {
        let mut guard = self.move_alarm.lock().expect("move_alarm mutex poisoned");
        if let Some(handle) = guard.take() {
            self.scheduler.cancel(handle);
        }
    }
}

/// Process-wide registry handing out the single live [`MatchInstance`]
/// for a given `match_id`, creating one lazily on first use. This is
/// what makes "at most one live instance per match" true in-process.
pub struct InstanceRegistry {
    store: Arc<dyn Store>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    auth: Arc<dyn AuthVerifier>,
    instances: DashMap<MatchId, Arc<MatchInstance>>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn AuthVerifier>,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
            auth,
            instances: DashMap::new(),
        }
    }

    /// Return the live instance for `match_id`, constructing one (with
    /// no state loaded yet) if this is the first time it's been
    /// touched in this process.
    #[must_use]
    pub fn get_or_create(&self, match_id: MatchId) -> Arc<MatchInstance> {
        self.instances
            .entry(match_id)
            .or_insert_with(|| {
                Arc::new(MatchInstance::new(
                    match_id,
                    self.store.clone(),
                    self.scheduler.clone(),
                    self.clock.clone(),
                    self.auth.clone(),
                ))
            })
            .clone()
    }

    #[must_use]
    pub fn get(&self, match_id: &MatchId) -> Option<Arc<MatchInstance>> {
        self.instances.get(match_id).map(|e| e.clone())
    }

    pub fn remove(&self, match_id: &MatchId) {
        self.instances.remove(match_id);
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.instances.len()
    }
}
