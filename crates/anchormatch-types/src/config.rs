//! Environment-sourced configuration for the match coordination core.
//!
//! One `serde`-deserializable struct per concern, each with a `Default`
//! matching the documented defaults exactly, following the
//! `NodeConfig`/`NetworkConfig` split the wider workspace already uses
//! for its own node configuration.

use serde::{Deserialize, Serialize};

use crate::constants;

/// Per-transaction timing: confirmation timeout and reconciliation cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxConfig {
    /// `TX_TIMEOUT_MS` — how long a submitted move's transaction has to confirm.
    pub tx_timeout_ms: u64,
    /// `SYNC_INTERVAL_MOVES` — moves between on-chain/off-chain reconciliation.
    pub sync_interval_moves: u64,
    /// `CHECKPOINT_INTERVAL_MOVES` — moves between checkpoints for high-value matches.
    pub checkpoint_interval_moves: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            tx_timeout_ms: constants::DEFAULT_TX_TIMEOUT_MS,
            sync_interval_moves: constants::DEFAULT_SYNC_INTERVAL_MOVES,
            checkpoint_interval_moves: constants::CHECKPOINT_INTERVAL_MOVES,
        }
    }
}

impl TxConfig {
    #[must_use]
    pub fn tx_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tx_timeout_ms)
    }
}

/// Batch-manager accumulation and flush timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// `BATCH_SIZE` — target size triggering an automatic flush.
    pub batch_size: usize,
    /// `BATCH_MAX` — hard cap on pending entries.
    pub max_batch_size: usize,
    /// `BATCH_FLUSH_INTERVAL_MS` — timer-driven flush period.
    pub flush_interval_ms: u64,
    /// `BATCH_MAX_WAIT_MS` — stale-entry ceiling applied on restart recovery.
    pub max_wait_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: constants::DEFAULT_BATCH_SIZE,
            max_batch_size: constants::DEFAULT_BATCH_MAX,
            flush_interval_ms: constants::DEFAULT_BATCH_FLUSH_INTERVAL_MS,
            max_wait_ms: constants::DEFAULT_BATCH_MAX_WAIT_MS,
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn max_wait(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.max_wait_ms as i64)
    }
}

/// Wallet pool sizing. `WALLET_POOL_KEYS` is supplied by the caller (it
/// names signer identities, not a count), so only the rotation threshold
/// lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletPoolConfig {
    /// `WALLET_ROTATION_THRESHOLD` — transactions before rotating wallets.
    pub rotation_threshold: u64,
}

impl Default for WalletPoolConfig {
    fn default() -> Self {
        Self {
            rotation_threshold: constants::DEFAULT_WALLET_ROTATION_THRESHOLD,
        }
    }
}

/// Fixed-window rate limiting, partitioned by `user_id`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// `RATE_LIMIT_MAX` — requests allowed per window.
    pub max_requests: u32,
    /// `RATE_LIMIT_WINDOW_SEC` — window length in seconds.
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: constants::DEFAULT_RATE_LIMIT_MAX,
            window_seconds: constants::DEFAULT_RATE_LIMIT_WINDOW_SEC,
        }
    }
}

/// Circuit-breaker thresholds guarding outbound blockchain calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// `BREAKER_FAILURE_THRESHOLD` — consecutive failures before opening.
    pub failure_threshold: u32,
    /// `BREAKER_TIMEOUT_MS` — open-state duration before probing resumes.
    pub timeout_ms: u64,
    /// `BREAKER_SUCCESS_THRESHOLD` — consecutive probe successes to close.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: constants::DEFAULT_BREAKER_FAILURE_THRESHOLD,
            timeout_ms: constants::DEFAULT_BREAKER_TIMEOUT_MS,
            success_threshold: constants::DEFAULT_BREAKER_SUCCESS_THRESHOLD,
        }
    }
}

impl BreakerConfig {
    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration aggregate for the core, composed of the five
/// sub-configs and loaded either from `Default` (tests) or `from_env()`
/// (production callers).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub tx: TxConfig,
    pub batch: BatchConfig,
    pub wallet_pool: WalletPoolConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
}

impl CoreConfig {
    /// Read the documented environment variables, falling back to each
    /// sub-config's `Default` for anything unset or unparsable. This is
    /// the only place the core looks at the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            tx: TxConfig {
                tx_timeout_ms: env_u64("TX_TIMEOUT_MS", constants::DEFAULT_TX_TIMEOUT_MS),
                sync_interval_moves: env_u64(
                    "SYNC_INTERVAL_MOVES",
                    constants::DEFAULT_SYNC_INTERVAL_MOVES,
                ),
                checkpoint_interval_moves: env_u64(
                    "CHECKPOINT_INTERVAL_MOVES",
                    constants::CHECKPOINT_INTERVAL_MOVES,
                ),
            },
            batch: BatchConfig {
                batch_size: env_usize("BATCH_SIZE", constants::DEFAULT_BATCH_SIZE),
                max_batch_size: env_usize("BATCH_MAX", constants::DEFAULT_BATCH_MAX),
                flush_interval_ms: env_u64(
                    "BATCH_FLUSH_INTERVAL_MS",
                    constants::DEFAULT_BATCH_FLUSH_INTERVAL_MS,
                ),
                max_wait_ms: env_u64("BATCH_MAX_WAIT_MS", constants::DEFAULT_BATCH_MAX_WAIT_MS),
            },
            wallet_pool: WalletPoolConfig {
                rotation_threshold: env_u64(
                    "WALLET_ROTATION_THRESHOLD",
                    constants::DEFAULT_WALLET_ROTATION_THRESHOLD,
                ),
            },
            rate_limit: RateLimitConfig {
                max_requests: env_u32("RATE_LIMIT_MAX", constants::DEFAULT_RATE_LIMIT_MAX),
                window_seconds: env_u64(
                    "RATE_LIMIT_WINDOW_SEC",
                    constants::DEFAULT_RATE_LIMIT_WINDOW_SEC,
                ),
            },
            breaker: BreakerConfig {
                failure_threshold: env_u32(
                    "BREAKER_FAILURE_THRESHOLD",
                    constants::DEFAULT_BREAKER_FAILURE_THRESHOLD,
                ),
                timeout_ms: env_u64("BREAKER_TIMEOUT_MS", constants::DEFAULT_BREAKER_TIMEOUT_MS),
                success_threshold: env_u32(
                    "BREAKER_SUCCESS_THRESHOLD",
                    constants::DEFAULT_BREAKER_SUCCESS_THRESHOLD,
                ),
            },
        }
    }

    /// Parse a comma-separated `WALLET_POOL_KEYS` environment variable into
    /// a list of raw key material strings. The wallet pool's own
    /// constructor (in `anchormatch-governors`) turns these into signer
    /// handles; this function only does the env-var parsing.
    #[must_use]
    pub fn wallet_pool_keys_from_env() -> Vec<String> {
        std::env::var("WALLET_POOL_KEYS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
