//! Wallet pool rotation.
//!
//! Generalizes the escrow manager's `AtomicU64 NONCE_COUNTER` idiom from
//! the prior-generation ingress crate: a single atomic counter, bumped
//! on every transaction, with rotation to the next signing identity
//! computed from the counter crossing a threshold rather than handed
//! out as a raw nonce. The pool holds no private key material itself —
//! only public identities; actual signing always goes through
//! `SignerProvider`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anchormatch_types::model::WalletHandle;

use crate::error::GovernorError;

/// Ordered set of signing identities with atomic round-robin rotation.
pub struct WalletPool {
    pubkeys: Vec<String>,
    rotation_threshold: u64,
    current_index: AtomicUsize,
    tx_count: AtomicU64,
}

impl WalletPool {
    /// # Errors
    /// Returns `GovernorError::EmptyWalletPool` if `pubkeys` is empty.
    pub fn new(pubkeys: Vec<String>, rotation_threshold: u64) -> Result<Self, GovernorError> {
        if pubkeys.is_empty() {
            return Err(GovernorError::EmptyWalletPool);
        }
        Ok(Self {
            pubkeys,
            rotation_threshold,
            current_index: AtomicUsize::new(0),
            tx_count: AtomicU64::new(0),
        })
    }

    /// The currently active wallet. Never fails: construction guarantees
    /// at least one pubkey, and the index is always taken modulo the
    /// pool's length.
    #[must_use]
    pub fn current(&self) -> WalletHandle {
        let index = self.current_index.load(Ordering::Acquire);
        WalletHandle {
            pubkey: self.pubkeys[index].clone(),
            index,
        }
    }

    /// Record a transaction against the active wallet, rotating to the
    /// next one when the per-wallet transaction count crosses
    /// `rotation_threshold`. Safe under concurrent callers: the counter
    /// and index both move atomically, so a rotation observed by one
    /// caller is observed consistently by all.
    pub fn record_tx(&self) {
        let prior = self.tx_count.fetch_add(1, Ordering::AcqRel) + 1;
        if prior >= self.rotation_threshold {
            self.tx_count.store(0, Ordering::Release);
            self.current_index
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idx| {
                    Some((idx + 1) % self.pubkeys.len())
                })
                .expect("fetch_update closure always returns Some");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pubkeys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pubkeys.is_empty()
    }
}
