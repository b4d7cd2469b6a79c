//! Outbound-call governors for the match coordination core: wallet
//! pool rotation, per-`user_id` rate limiting, and a circuit breaker
//! guarding blockchain calls.
//!
//! Each governor is a plain value behind fine-grained interior
//! mutability — an `AtomicUsize` index, a sharded map, a `Mutex`-guarded
//! state machine — never a process-wide static. `Governors` composes
//! all three behind `Arc` for the coordinator to share across matches.

pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod wallet_pool;

pub use circuit_breaker::{BreakerOutcome, BreakerState, CircuitBreaker};
pub use error::GovernorError;
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use wallet_pool::WalletPool;

use std::sync::Arc;

/// Root composition of the three governors, owned once per coordinator
/// and shared via `Arc`.
#[derive(Clone)]
pub struct Governors {
    pub wallet_pool: Arc<WalletPool>,
    pub rate_limiter: Arc<RateLimiter>,
    pub circuit_breaker: Arc<CircuitBreaker>,
}

impl Governors {
    #[must_use]
    pub fn new(wallet_pool: WalletPool, rate_limiter: RateLimiter, circuit_breaker: CircuitBreaker) -> Self {
        Self {
            wallet_pool: Arc::new(wallet_pool),
            rate_limiter: Arc::new(rate_limiter),
            circuit_breaker: Arc::new(circuit_breaker),
        }
    }
}
