//! Data model, port traits, error taxonomy, and configuration shared by
//! every crate in the match coordination core. Nothing in this crate
//! talks to the network, a clock, or a filesystem directly — it defines
//! the shapes and the seams, and leaves the talking to adapters behind
//! the port traits in [`ports`].

pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod model;
pub mod ports;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::CoreConfig;
pub use error::{AnchorMatchError, ErrorCategory, Result};
pub use ids::{BatchId, MatchId, TxId, UserId};
pub use metrics::TracingMetricsSink;
