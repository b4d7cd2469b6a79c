//! Batch accumulation, Merkle-manifest construction, and on-chain
//! anchoring.
//!
//! Shaped after the prior-generation ingress crate's pending-order
//! buffer (accumulate-then-seal with a sealed-flag guard) composed with
//! its batch sealer's domain-hash manifest — generalized from a single
//! in-memory buffer into one that persists its state to a `Store` key
//! on every mutation, so a coordinator restart can recover in-flight
//! batches instead of losing them.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;

use anchormatch_canon::MerkleTree;
use anchormatch_types::config::BatchConfig;
use anchormatch_types::ids::{BatchId, MatchId};
use anchormatch_types::model::{BatchManagerState, BatchManifest, MerkleProof, MetricEvent, PendingBatchEntry};
use anchormatch_types::ports::{
    AlarmHandle, AlarmKey, BlockchainClient, Clock, MetricsSink, Scheduler, SignerProvider, Store,
};

use crate::error::BatchError;

const STATE_KEY: &str = "batch_manager_state";
const MANIFEST_VERSION: &str = "1";

/// The single scheduled key this manager owns: one flush timer, not
/// one per batch, so re-arming always targets the same logical alarm.
fn flush_alarm_key() -> AlarmKey {
    AlarmKey::BatchFlush(BatchId::new(
        chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid sentinel date"),
        0,
    ))
}

/// Accumulates flushed match records into batches, builds their Merkle
/// manifests, and anchors the batch root on-chain.
///
/// Internally single-writer: every mutating operation takes the async
/// `flush_lock` so `add`/`flush`/`anchor` never interleave against the
/// same pending sequence, the same discipline the ingress crate's
/// pending buffer enforced with its sealed-flag check.
pub struct BatchManager {
    config: BatchConfig,
    store: Arc<dyn Store>,
    blockchain: Arc<dyn BlockchainClient>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    signer: Option<Arc<dyn SignerProvider>>,
    metrics: Arc<dyn MetricsSink>,
    state: AsyncMutex<BatchManagerState>,
    alarm_handle: Mutex<Option<AlarmHandle>>,
}

impl BatchManager {
    #[must_use]
    pub fn new(
        config: BatchConfig,
        store: Arc<dyn Store>,
        blockchain: Arc<dyn BlockchainClient>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        signer: Option<Arc<dyn SignerProvider>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            store,
            blockchain,
            scheduler,
            clock,
            signer,
            metrics,
            state: AsyncMutex::new(BatchManagerState::default()),
            alarm_handle: Mutex::new(None),
        }
    }

    /// Restore pending state from the well-known `Store` key, discarding
    /// entries older than `max_wait_ms`, and re-arm the flush timer if
    /// anything survived.
    ///
    /// # Errors
    /// Returns `BatchError::StatePersistFailed` if the store read fails
    /// outright (a missing key is not an error — it means a fresh start).
    pub async fn recover(&self) -> Result<(), BatchError> {
        let Some(bytes) =
            self.store.get(STATE_KEY).await.map_err(|e| BatchError::StatePersistFailed {
                reason: e.to_string(),
            })?
        else {
            return Ok(());
        };

        let mut restored: BatchManagerState =
            serde_json::from_slice(&bytes).map_err(|e| BatchError::StatePersistFailed {
                reason: e.to_string(),
            })?;

        let now = self.clock.timestamp();
        let max_wait = chrono::Duration::milliseconds(i64::try_from(self.config.max_wait_ms).unwrap_or(i64::MAX));
        restored
            .pending_matches
            .retain(|entry| now - entry.enqueued_at <= max_wait);

        let has_pending = !restored.pending_matches.is_empty();
        *self.state.lock().await = restored;

        if has_pending {
            self.arm_flush_timer();
        }
        Ok(())
    }

    /// Append a flushed match to the pending sequence, persisting the
    /// updated state. Flushes immediately if the batch has reached
    /// `batch_size`, or unconditionally once it reaches the hard cap
    /// `max_batch_size` (even if `batch_size` is misconfigured above
    /// it); otherwise ensures the flush timer is armed.
    ///
    /// # Errors
    /// Returns `BatchError::StatePersistFailed` if the updated pending
    /// state cannot be persisted, or whatever `flush` returns if this
    /// push crosses a size threshold.
    pub async fn add(&self, match_id: MatchId, match_hash: String, hot_url: String) -> Result<(), BatchError> {
        let should_flush = {
            let mut state = self.state.lock().await;
            state.pending_matches.push(PendingBatchEntry {
                match_id,
                match_hash,
                hot_url,
                enqueued_at: self.clock.timestamp(),
            });
            state.timestamp = Some(self.clock.timestamp());
            self.persist_locked(&state).await?;
            let len = state.pending_matches.len();
            if len >= self.config.max_batch_size {
                tracing::warn!(
                    len,
                    max_batch_size = self.config.max_batch_size,
                    "pending batch reached its hard cap, forcing flush"
                );
            }
            len >= self.config.batch_size || len >= self.config.max_batch_size
        };

        if should_flush {
            self.flush().await?;
        } else {
            self.arm_flush_timer();
        }
        Ok(())
    }

    /// Snapshot the pending sequence, build its Merkle tree, and upload
    /// the resulting manifest. Idempotent: a no-op when nothing is
    /// pending.
    ///
    /// # Errors
    /// Returns `BatchError::UploadFailed` if the manifest cannot be
    /// written to the store. On failure the pending sequence is left
    /// untouched and the flush timer is rearmed so a later flush can
    /// retry.
    pub async fn flush(&self) -> Result<Option<BatchManifest>, BatchError> {
        let mut state = self.state.lock().await;
        if state.pending_matches.is_empty() {
            return Ok(None);
        }

        let snapshot = state.pending_matches.clone();
        let hashes: Vec<String> = snapshot.iter().map(|e| e.match_hash.clone()).collect();
        let tree = MerkleTree::build(&hashes).map_err(|e| BatchError::UploadFailed {
            batch_id: "pending".to_string(),
            reason: e.to_string(),
        })?;

        let sequence = state.batch_counter + 1;
        let batch_id = BatchId::new(self.clock.timestamp().date_naive(), sequence);

        let mut manifest = BatchManifest {
            version: MANIFEST_VERSION.to_string(),
            batch_id: batch_id.clone(),
            merkle_root: tree.root(),
            match_count: u32::try_from(snapshot.len()).unwrap_or(u32::MAX),
            match_ids: snapshot.iter().map(|e| e.match_id).collect(),
            match_hashes: hashes,
            created_at: self.clock.timestamp(),
            anchored_at: None,
            anchor_tx_id: None,
            signature: None,
        };

        if let Some(signer) = &self.signer {
            let bytes = anchormatch_canon::canonicalize(&manifest).map_err(|e| BatchError::SignFailed {
                batch_id: batch_id.to_string(),
                reason: e.to_string(),
            })?;
            let signature = signer.sign(&bytes).await.map_err(|e| BatchError::SignFailed {
                batch_id: batch_id.to_string(),
                reason: e.to_string(),
            })?;
            manifest.signature = Some(signature);
        }

        let path = format!("manifests/{batch_id}.json");
        let serialized = serde_json::to_vec_pretty(&manifest).map_err(|e| BatchError::UploadFailed {
            batch_id: batch_id.to_string(),
            reason: e.to_string(),
        })?;

        if let Err(err) = self.store.put(&path, serialized).await {
            self.arm_flush_timer();
            return Err(BatchError::UploadFailed {
                batch_id: batch_id.to_string(),
                reason: err.to_string(),
            });
        }

        state.pending_matches.clear();
        state.batch_counter = sequence;
        state.timestamp = Some(self.clock.timestamp());
        self.persist_locked(&state).await?;

        self.metrics.record(MetricEvent::BatchFlushed {
            batch_id: batch_id.clone(),
            count: manifest.match_count as usize,
        });

        Ok(Some(manifest))
    }

    /// Anchor a previously flushed manifest's Merkle root on-chain,
    /// writing the resulting tx id and timestamp back into the manifest.
    ///
    /// Anchor failure does not roll back the manifest upload: the batch
    /// remains valid in the store and can be re-anchored later.
    ///
    /// # Errors
    /// Returns `BatchError::AnchorFailed` if the chain call fails, or
    /// `BatchError::UploadFailed` if the updated manifest cannot be
    /// re-uploaded.
    pub async fn anchor(
        &self,
        mut manifest: BatchManifest,
        wallet: &anchormatch_types::model::WalletHandle,
    ) -> Result<BatchManifest, BatchError> {
        let root_bytes = decode_root(&manifest.merkle_root).ok_or_else(|| BatchError::MalformedManifest {
            batch_id: manifest.batch_id.to_string(),
            reason: "merkle root is not 32 bytes of hex".to_string(),
        })?;

        let first = manifest.match_ids.first().copied().ok_or_else(|| BatchError::MalformedManifest {
            batch_id: manifest.batch_id.to_string(),
            reason: "manifest has no match ids".to_string(),
        })?;
        let last = manifest.match_ids.last().copied().unwrap_or(first);

        let tx_id = self
            .blockchain
            .anchor_batch(&manifest.batch_id, root_bytes, manifest.match_count, &first, &last, wallet)
            .await
            .map_err(|e| BatchError::AnchorFailed {
                batch_id: manifest.batch_id.to_string(),
                reason: e.to_string(),
            })?;

        manifest.anchored_at = Some(self.clock.timestamp());
        manifest.anchor_tx_id = Some(tx_id.to_string());

        let path = format!("manifests/{}.json", manifest.batch_id);
        let serialized = serde_json::to_vec_pretty(&manifest).map_err(|e| BatchError::UploadFailed {
            batch_id: manifest.batch_id.to_string(),
            reason: e.to_string(),
        })?;
        self.store.put(&path, serialized).await.map_err(|e| BatchError::UploadFailed {
            batch_id: manifest.batch_id.to_string(),
            reason: e.to_string(),
        })?;

        self.metrics.record(MetricEvent::BatchAnchored {
            batch_id: manifest.batch_id.clone(),
        });

        Ok(manifest)
    }

    /// Locate the batch that anchored `match_id`, loading and validating
    /// its manifest.
    ///
    /// # Errors
    /// Returns `BatchError::BatchNotFound` if no batch anchors this
    /// match, or `BatchError::MalformedManifest` if the stored manifest
    /// cannot be parsed.
    pub async fn find_batch_for_match(&self, match_id: &MatchId) -> Result<BatchManifest, BatchError> {
        let batch_id = self
            .blockchain
            .find_batch_for_match(match_id)
            .await
            .map_err(|e| BatchError::MalformedManifest {
                batch_id: match_id.to_string(),
                reason: format!("chain lookup failed: {e}"),
            })?
            .ok_or_else(|| BatchError::BatchNotFound {
                match_id: match_id.to_string(),
            })?;

        let path = format!("manifests/{batch_id}.json");
        let bytes = self
            .store
            .get(&path)
            .await
            .map_err(|e| BatchError::MalformedManifest {
                batch_id: batch_id.to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| BatchError::BatchNotFound {
                match_id: match_id.to_string(),
            })?;

        serde_json::from_slice(&bytes).map_err(|e| BatchError::MalformedManifest {
            batch_id: batch_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Rebuild the manifest's Merkle tree and emit the inclusion proof
    /// for `match_id`/`match_hash`.
    ///
    /// # Errors
    /// Returns `BatchError::MalformedManifest` if `match_hash` does not
    /// appear in the manifest's hash list, or if the tree cannot be
    /// rebuilt.
    pub fn generate_proof(
        &self,
        match_id: MatchId,
        match_hash: &str,
        manifest: &BatchManifest,
    ) -> Result<MerkleProof, BatchError> {
        let tree = MerkleTree::build(&manifest.match_hashes).map_err(|e| BatchError::MalformedManifest {
            batch_id: manifest.batch_id.to_string(),
            reason: e.to_string(),
        })?;

        let index = manifest
            .match_hashes
            .iter()
            .position(|h| h == match_hash)
            .ok_or_else(|| BatchError::MalformedManifest {
                batch_id: manifest.batch_id.to_string(),
                reason: format!("match hash {match_hash} not present in manifest"),
            })?;

        tree.generate_proof(match_id, match_hash, index)
            .map_err(|e| BatchError::MalformedManifest {
                batch_id: manifest.batch_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// Cancel the flush timer and force a final flush, regardless of
    /// whether `batch_size` has been reached.
    ///
    /// # Errors
    /// Returns whatever `flush` returns.
    pub async fn shutdown(&self) -> Result<Option<BatchManifest>, BatchError> {
        if let Some(handle) = self.alarm_handle.lock().unwrap().take() {
            self.scheduler.cancel(handle);
        }
        self.flush().await
    }

    async fn persist_locked(&self, state: &BatchManagerState) -> Result<(), BatchError> {
        let serialized = serde_json::to_vec(state).map_err(|e| BatchError::StatePersistFailed {
            reason: e.to_string(),
        })?;
        self.store
            .put(STATE_KEY, serialized)
            .await
            .map_err(|e| BatchError::StatePersistFailed { reason: e.to_string() })
    }

    fn arm_flush_timer(&self) {
        let mut handle_slot = self.alarm_handle.lock().unwrap();
        if let Some(handle) = handle_slot.take() {
            self.scheduler.cancel(handle);
        }
        let deadline = self.clock.timestamp()
            + chrono::Duration::milliseconds(i64::try_from(self.config.flush_interval_ms).unwrap_or(i64::MAX));
        *handle_slot = Some(self.scheduler.schedule_at(deadline, flush_alarm_key()));
    }
}

fn decode_root(hex_str: &str) -> Option<[u8; 32]> {
    hex::decode(hex_str).ok()?.try_into().ok()
}
