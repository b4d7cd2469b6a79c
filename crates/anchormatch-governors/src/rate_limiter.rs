//! Per-`user_id` fixed-window rate limiting.
//!
//! Adapted from the prior-generation order rate limiter's sliding
//! window into a simpler fixed-window counter,
//! and split across two backend shapes sharing one contract: an
//! in-process `DashMap` (never fails) and a distributed backend backed
//! by the blob `Store` port (fails open on any backend error, logging
//! the failure rather than blocking the caller — DoS protection must
//! never itself become a denial of service).

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use anchormatch_types::ids::UserId;
use anchormatch_types::ports::{Clock, Store};

/// Result of a rate limit check. Never an error: both backends resolve
/// to a decision, the distributed one failing open when its backend is
/// unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at_unix: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WindowState {
    window_start_unix: i64,
    count: u32,
}

enum Backend {
    InProcess(DashMap<UserId, WindowState>),
    Distributed(Arc<dyn Store>),
}

pub struct RateLimiter {
    max_requests: u32,
    window_seconds: u64,
    clock: Arc<dyn Clock>,
    backend: Backend,
}

impl RateLimiter {
    /// Single-coordinator in-process limiter. Never fails.
    #[must_use]
    pub fn in_process(max_requests: u32, window_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window_seconds,
            clock,
            backend: Backend::InProcess(DashMap::new()),
        }
    }

    /// Multi-coordinator limiter backed by a shared `Store`. Fails open
    /// (logs and allows) if the store errors.
    #[must_use]
    pub fn distributed(
        max_requests: u32,
        window_seconds: u64,
        clock: Arc<dyn Clock>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            max_requests,
            window_seconds,
            clock,
            backend: Backend::Distributed(store),
        }
    }

    /// Check and record one request for `user_id` against the current
    /// window, advancing it if the window has rolled over.
    pub async fn check(&self, user_id: &UserId) -> RateLimitDecision {
        let now_unix = self.clock.timestamp().timestamp();
        match &self.backend {
            Backend::InProcess(map) => self.check_in_process(map, user_id, now_unix),
            Backend::Distributed(store) => self.check_distributed(store, user_id, now_unix).await,
        }
    }

    fn check_in_process(
        &self,
        map: &DashMap<UserId, WindowState>,
        user_id: &UserId,
        now_unix: i64,
    ) -> RateLimitDecision {
        let window_seconds = i64::try_from(self.window_seconds).unwrap_or(i64::MAX);
        let mut entry = map.entry(user_id.clone()).or_insert(WindowState {
            window_start_unix: now_unix,
            count: 0,
        });

        if now_unix - entry.window_start_unix >= window_seconds {
            entry.window_start_unix = now_unix;
            entry.count = 0;
        }

        let reset_at_unix = entry.window_start_unix + window_seconds;
        if entry.count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at_unix,
            };
        }

        entry.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - entry.count,
            reset_at_unix,
        }
    }

    async fn check_distributed(
        &self,
        store: &Arc<dyn Store>,
        user_id: &UserId,
        now_unix: i64,
    ) -> RateLimitDecision {
        let path = format!("rate-limits/{user_id}");
        let window_seconds = i64::try_from(self.window_seconds).unwrap_or(i64::MAX);

        let loaded = match store.get(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%user_id, error = %err, "rate limiter store read failed, failing open");
                return RateLimitDecision {
                    allowed: true,
                    remaining: self.max_requests,
                    reset_at_unix: now_unix + window_seconds,
                };
            }
        };

        let mut state = loaded
            .and_then(|bytes| serde_json::from_slice::<WindowState>(&bytes).ok())
            .unwrap_or(WindowState {
                window_start_unix: now_unix,
                count: 0,
            });

        if now_unix - state.window_start_unix >= window_seconds {
            state.window_start_unix = now_unix;
            state.count = 0;
        }

        let reset_at_unix = state.window_start_unix + window_seconds;
        if state.count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at_unix,
            };
        }

        state.count += 1;
        let decision = RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - state.count,
            reset_at_unix,
        };

        let Ok(serialized) = serde_json::to_vec(&state) else {
            return decision;
        };
        if let Err(err) = store.put(&path, serialized).await {
            tracing::warn!(%user_id, error = %err, "rate limiter store write failed, decision already granted");
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchormatch_types::test_helpers::{InMemoryStore, SteppableClock};
    use chrono::Utc;

    fn user() -> UserId {
        UserId::new("player-1")
    }

    #[tokio::test]
    async fn allows_requests_within_the_window() {
        let clock = Arc::new(SteppableClock::new(Utc::now()));
        let limiter = RateLimiter::in_process(3, 60, clock);
        let u = user();
        for _ in 0..3 {
            assert!(limiter.check(&u).await.allowed);
        }
        assert!(!limiter.check(&u).await.allowed);
    }

    #[tokio::test]
    async fn window_resets_after_elapsing() {
        let clock = Arc::new(SteppableClock::new(Utc::now()));
        let limiter = RateLimiter::in_process(1, 10, clock.clone());
        let u = user();
        assert!(limiter.check(&u).await.allowed);
        assert!(!limiter.check(&u).await.allowed);
        clock.advance(chrono::Duration::seconds(11));
        assert!(limiter.check(&u).await.allowed);
    }

    #[tokio::test]
    async fn independent_users_have_independent_windows() {
        let clock = Arc::new(SteppableClock::new(Utc::now()));
        let limiter = RateLimiter::in_process(1, 60, clock);
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        assert!(limiter.check(&alice).await.allowed);
        assert!(limiter.check(&bob).await.allowed);
        assert!(!limiter.check(&alice).await.allowed);
    }

    #[tokio::test]
    async fn distributed_backend_fails_open_on_store_error() {
        let clock = Arc::new(SteppableClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(AlwaysFailingStore);
        let limiter = RateLimiter::distributed(1, 60, clock, store);
        let decision = limiter.check(&user()).await;
        assert!(decision.allowed, "store failure must fail open, not closed");
    }

    #[tokio::test]
    async fn distributed_backend_enforces_limit_when_store_is_healthy() {
        let clock = Arc::new(SteppableClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::distributed(1, 60, clock, store);
        let u = user();
        assert!(limiter.check(&u).await.allowed);
        assert!(!limiter.check(&u).await.allowed);
    }

    struct AlwaysFailingStore;

    #[async_trait::async_trait]
    impl Store for AlwaysFailingStore {
        async fn put(&self, _path: &str, _bytes: Vec<u8>) -> anchormatch_types::error::Result<()> {
            Err(anchormatch_types::error::AnchorMatchError::Internal("store unreachable".to_string()))
        }
        async fn get(&self, _path: &str) -> anchormatch_types::error::Result<Option<Vec<u8>>> {
            Err(anchormatch_types::error::AnchorMatchError::Internal("store unreachable".to_string()))
        }
        async fn delete(&self, _path: &str) -> anchormatch_types::error::Result<()> {
            Err(anchormatch_types::error::AnchorMatchError::Internal("store unreachable".to_string()))
        }
        async fn list(&self, _prefix: &str) -> anchormatch_types::error::Result<Vec<String>> {
            Err(anchormatch_types::error::AnchorMatchError::Internal("store unreachable".to_string()))
        }
    }
}
