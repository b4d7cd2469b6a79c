//! System-wide constants for the match coordination core.
//!
//! Every value here is a baked-in default; a `CoreConfig` loaded via
//! `from_env()` may override any of them at runtime.

/// Per-transaction confirmation timeout, milliseconds. `TX_TIMEOUT_MS`.
pub const DEFAULT_TX_TIMEOUT_MS: u64 = 30_000;

/// Moves between on-chain/off-chain reconciliation. `SYNC_INTERVAL_MOVES`.
pub const DEFAULT_SYNC_INTERVAL_MOVES: u64 = 10;

/// Moves between checkpoints for high-value matches. `CHECKPOINT_INTERVAL_MOVES`.
pub const CHECKPOINT_INTERVAL_MOVES: u64 = 20;

/// Target batch size before an automatic flush. `BATCH_SIZE`.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Hard cap on pending batch entries. `BATCH_MAX`.
pub const DEFAULT_BATCH_MAX: usize = 1000;

/// Flush timer period, milliseconds. `BATCH_FLUSH_INTERVAL_MS`.
pub const DEFAULT_BATCH_FLUSH_INTERVAL_MS: u64 = 60_000;

/// Ceiling on a pending entry's age before it is discarded on restart
/// recovery. `BATCH_MAX_WAIT_MS`.
pub const DEFAULT_BATCH_MAX_WAIT_MS: u64 = 300_000;

/// Transaction count before the wallet pool rotates to the next identity.
/// `WALLET_ROTATION_THRESHOLD`.
pub const DEFAULT_WALLET_ROTATION_THRESHOLD: u64 = 1000;

/// Requests allowed per rate-limit window. `RATE_LIMIT_MAX`.
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 100;

/// Rate-limit window, seconds. `RATE_LIMIT_WINDOW_SEC`.
pub const DEFAULT_RATE_LIMIT_WINDOW_SEC: u64 = 60;

/// Consecutive failures before the circuit breaker opens.
/// `BREAKER_FAILURE_THRESHOLD`.
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Breaker open-state duration before probing resumes, milliseconds.
/// `BREAKER_TIMEOUT_MS`.
pub const DEFAULT_BREAKER_TIMEOUT_MS: u64 = 60_000;

/// Consecutive probe successes required to close the breaker.
/// `BREAKER_SUCCESS_THRESHOLD`.
pub const DEFAULT_BREAKER_SUCCESS_THRESHOLD: u32 = 2;

/// Maximum confirmation-retry attempts for a single `submit_move`.
pub const MAX_CONFIRM_RETRIES: u32 = 3;

/// Exponential-backoff cap between confirmation retries, milliseconds.
pub const CONFIRM_BACKOFF_CAP_MS: u64 = 10_000;

/// Poll period while waiting for `get_signature_status` to settle, seconds.
pub const SIGNATURE_POLL_INTERVAL_SECS: u64 = 1;

/// Version string, reported in `BatchManifest.version` and the
/// `MatchRecord` canonical schema.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core name, used in log context and test fixtures.
pub const CORE_NAME: &str = "AnchorMatch";
