//! [`Verifier::verify`] — the four independent checks of a finalized record:
//! hash, Merkle inclusion, signature chain, replay.
//!
//! Grounded on the composition-of-independent-gates style in the
//! prior-generation ingress crate's `RiskKernel::validate` (a fixed
//! sequence of checks run over one input), generalized from "reject on
//! first failing gate" to "run every gate regardless of the others and
//! collect every disagreement into one report." Nothing in this module
//! returns `Err`: a verification failure is data, not a fault.

use std::sync::Arc;

use anchormatch_batcher::BatchManager;
use anchormatch_canon::MerkleTree;
use anchormatch_types::ids::MatchId;
use anchormatch_types::model::{MatchRecord, VerificationReport};
use anchormatch_types::ports::{BlockchainClient, GameEngine};

/// Verifies finalized [`MatchRecord`]s against what the chain and batch
/// manager record about them. Holds no mutable state of its own; every
/// call to [`verify`](Verifier::verify) is independent of the others.
pub struct Verifier {
    batcher: Arc<BatchManager>,
    blockchain: Arc<dyn BlockchainClient>,
    game_engine: Arc<dyn GameEngine>,
}

impl Verifier {
    #[must_use]
    pub fn new(
        batcher: Arc<BatchManager>,
        blockchain: Arc<dyn BlockchainClient>,
        game_engine: Arc<dyn GameEngine>,
    ) -> Self {
        Self {
            batcher,
            blockchain,
            game_engine,
        }
    }

    /// Run all four layers against `record` and return the combined
    /// report. Every layer executes even if an earlier one failed.
    pub async fn verify(&self, match_id: MatchId, record: &MatchRecord) -> VerificationReport {
        let mut report = VerificationReport {
            is_valid: true,
            ..VerificationReport::default()
        };

        let record_hash = match anchormatch_canon::canonicalize(record) {
            Ok(bytes) => Some(anchormatch_canon::hash(&bytes)),
            Err(e) => {
                report.add_error(format!("failed to canonicalize record for hashing: {e}"));
                None
            }
        };

        // Steps 1 and 2 share one lookup: the only port-exposed path back
        // to a previously-anchored match's content hash is the manifest
        // the batcher wrote at finalization, not a direct chain accessor.
        match self.batcher.find_batch_for_match(&match_id).await {
            Ok(manifest) => {
                let anchored_hash = manifest
                    .match_ids
                    .iter()
                    .position(|id| *id == match_id)
                    .and_then(|idx| manifest.match_hashes.get(idx).cloned());

                self.verify_hash(&mut report, record_hash.as_deref(), anchored_hash.as_deref());
                self.verify_merkle(&mut report, &match_id, anchored_hash.as_deref(), &manifest.match_hashes, &manifest.merkle_root);
            }
            Err(e) => {
                report.add_error(format!("no anchored batch hash available for match {match_id}: {e}"));
                report.add_warning(format!("skipping Merkle inclusion check: {e}"));
            }
        }

        self.verify_signatures(&mut report, record).await;
        self.verify_replay(&mut report, &match_id, record).await;

        report
    }

    fn verify_hash(&self, report: &mut VerificationReport, record_hash: Option<&str>, anchored_hash: Option<&str>) {
        match (record_hash, anchored_hash) {
            (Some(computed), Some(anchored)) if computed == anchored => {}
            (Some(computed), Some(anchored)) => {
                report.add_error(format!("record hash {computed} does not match anchored hash {anchored}"));
            }
            (Some(_), None) => {
                report.add_error("match has no on-chain hash to compare against".to_string());
            }
            (None, _) => {} // already reported by the canonicalization failure above
        }
    }

    fn verify_merkle(
        &self,
        report: &mut VerificationReport,
        match_id: &MatchId,
        anchored_hash: Option<&str>,
        match_hashes: &[String],
        merkle_root: &str,
    ) {
        let Some(anchored_hash) = anchored_hash else {
            report.add_warning("skipping Merkle inclusion check: match hash not present in manifest".to_string());
            return;
        };

        let tree = match MerkleTree::build(match_hashes) {
            Ok(t) => t,
            Err(e) => {
                report.add_error(format!("could not rebuild manifest's Merkle tree: {e}"));
                return;
            }
        };

        let Some(index) = match_hashes.iter().position(|h| h == anchored_hash) else {
            report.add_error("anchored hash not found at any leaf of the manifest's Merkle tree".to_string());
            return;
        };

        let proof = match tree.generate_proof(*match_id, anchored_hash, index) {
            Ok(p) => p,
            Err(e) => {
                report.add_error(format!("failed to build Merkle inclusion proof: {e}"));
                return;
            }
        };

        match tree.verify_proof(&proof) {
            Ok(true) => {
                report.merkle_ok = tree.root() == merkle_root;
                if !report.merkle_ok {
                    report.add_error("manifest's merkle_root does not match the rebuilt tree's root".to_string());
                }
            }
            Ok(false) => {
                report.add_error("Merkle inclusion proof does not fold up to the manifest's root".to_string());
            }
            Err(e) => {
                report.add_error(format!("failed to verify Merkle inclusion proof: {e}"));
            }
        }
    }

    async fn verify_signatures(&self, report: &mut VerificationReport, record: &MatchRecord) {
        if record.signatures.is_empty() {
            report.add_error("record carries no signatures to verify".to_string());
            return;
        }

        let unsigned = match anchormatch_canon::canonicalize(&record.without_signatures()) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.add_error(format!("failed to canonicalize record for signature verification: {e}"));
                return;
            }
        };

        let mut all_ok = true;
        for sig in &record.signatures {
            match self.blockchain.is_authorized_signer(&sig.signer).await {
                Ok(true) => {}
                Ok(false) => {
                    all_ok = false;
                    report.add_error(format!("signer {} is not in the authorized-signer registry", sig.signer));
                }
                Err(e) => {
                    all_ok = false;
                    report.add_error(format!("failed to check signer authorization for {}: {e}", sig.signer));
                }
            }

            match anchormatch_canon::verify(&unsigned, &sig.signature, &sig.signer) {
                Ok(true) => {}
                Ok(false) => {
                    all_ok = false;
                    report.add_error(format!("signature from {} does not verify", sig.signer));
                }
                Err(e) => {
                    all_ok = false;
                    report.add_error(format!("malformed signature from {}: {e}", sig.signer));
                }
            }
        }

        report.signatures_ok = all_ok;
    }

    async fn verify_replay(&self, report: &mut VerificationReport, match_id: &MatchId, record: &MatchRecord) {
        if let Err(reason) = record.validate_invariants() {
            report.add_error(format!("record violates its own invariants: {reason}"));
        }

        let on_chain = match self.blockchain.get_match_state(match_id).await {
            Ok(state) => state,
            Err(e) => {
                report.add_error(format!("failed to fetch on-chain match state for replay comparison: {e}"));
                return;
            }
        };

        if record.players.len() as u32 != on_chain.player_count {
            report.add_error(format!(
                "recorded player count {} does not match on-chain count {}",
                record.players.len(),
                on_chain.player_count
            ));
        }
        if record.seed != on_chain.seed {
            report.add_error(format!("recorded seed {} does not match on-chain seed {}", record.seed, on_chain.seed));
        }
        if record.moves.len() as u64 != on_chain.move_count {
            report.add_error(format!(
                "recorded move count {} does not match on-chain move count {}",
                record.moves.len(),
                on_chain.move_count
            ));
        }

        match self.game_engine.replay(record.game_type, &record.seed, &record.moves).await {
            Ok(terminal) => {
                let matches_recorded = terminal.move_count == record.moves.len() as u64;
                let matches_on_chain = terminal.move_count == on_chain.move_count;
                report.replay_ok = matches_recorded && matches_on_chain;
                if !report.replay_ok {
                    report.add_error(format!(
                        "replayed terminal state move_count {} disagrees with recorded ({}) or on-chain ({}) move count",
                        terminal.move_count,
                        record.moves.len(),
                        on_chain.move_count
                    ));
                }
            }
            Err(e) => {
                report.add_error(format!("game engine replay failed: {e}"));
            }
        }
    }
}
