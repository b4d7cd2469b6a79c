//! A `tracing`-backed default [`MetricsSink`](crate::ports::MetricsSink).
//!
//! Callers who already ship `tracing` events to a log pipeline and don't
//! want to stand up a separate metrics backend can use this instead of
//! writing their own sink: every [`MetricEvent`] becomes one structured
//! `tracing` event at a severity matching its urgency, and counters are
//! kept in a handful of atomics so `snapshot()` stays cheap to call from
//! a health-check endpoint. Confirmation latencies are logged per-event
//! but not retained in memory — a log-scraping backend is expected to
//! bucket those itself, so `snapshot().confirmation_latencies_ms` is
//! always empty here.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::{MetricEvent, MetricsSnapshot};
use crate::ports::MetricsSink;

/// Emits every recorded event as a `tracing` event and keeps running
/// totals in atomics for [`MetricsSink::snapshot`].
#[derive(Default)]
pub struct TracingMetricsSink {
    moves_submitted: AtomicU64,
    moves_confirmed: AtomicU64,
    moves_failed: AtomicU64,
    moves_timed_out: AtomicU64,
    reconciliation_conflicts: AtomicU64,
    breaker_opens: AtomicU64,
    rate_limit_rejections: AtomicU64,
    wallet_rotations: AtomicU64,
    batches_flushed: AtomicU64,
    batches_anchored: AtomicU64,
    checkpoints_created: AtomicU64,
}

impl TracingMetricsSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for TracingMetricsSink {
    fn record(&self, event: MetricEvent) {
        match &event {
            MetricEvent::MoveSubmitted { match_id } => {
                self.moves_submitted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%match_id, "metric: move submitted");
            }
            MetricEvent::MoveConfirmed { match_id, latency_ms } => {
                self.moves_confirmed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%match_id, latency_ms, "metric: move confirmed");
            }
            MetricEvent::MoveFailed { match_id, reason } => {
                self.moves_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%match_id, reason = %reason, "metric: move failed");
            }
            MetricEvent::MoveTimeout { match_id } => {
                self.moves_timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%match_id, "metric: move timed out");
            }
            MetricEvent::ReconciliationConflict { match_id, fields } => {
                self.reconciliation_conflicts.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%match_id, fields = ?fields, "metric: reconciliation conflict");
            }
            MetricEvent::BreakerOpened => {
                self.breaker_opens.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("metric: circuit breaker opened");
            }
            MetricEvent::BreakerClosed => {
                tracing::info!("metric: circuit breaker closed");
            }
            MetricEvent::RateLimitRejected { user_id } => {
                self.rate_limit_rejections.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%user_id, "metric: rate limit rejected");
            }
            MetricEvent::WalletRotated { new_index } => {
                self.wallet_rotations.fetch_add(1, Ordering::Relaxed);
                tracing::info!(new_index, "metric: wallet rotated");
            }
            MetricEvent::BatchFlushed { batch_id, count } => {
                self.batches_flushed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%batch_id, count, "metric: batch flushed");
            }
            MetricEvent::BatchAnchored { batch_id } => {
                self.batches_anchored.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%batch_id, "metric: batch anchored");
            }
            MetricEvent::CheckpointCreated { match_id, event_index } => {
                self.checkpoints_created.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%match_id, event_index, "metric: checkpoint created");
            }
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            moves_submitted: self.moves_submitted.load(Ordering::Relaxed),
            moves_confirmed: self.moves_confirmed.load(Ordering::Relaxed),
            moves_failed: self.moves_failed.load(Ordering::Relaxed),
            moves_timed_out: self.moves_timed_out.load(Ordering::Relaxed),
            reconciliation_conflicts: self.reconciliation_conflicts.load(Ordering::Relaxed),
            breaker_opens: self.breaker_opens.load(Ordering::Relaxed),
            rate_limit_rejections: self.rate_limit_rejections.load(Ordering::Relaxed),
            wallet_rotations: self.wallet_rotations.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_anchored: self.batches_anchored.load(Ordering::Relaxed),
            checkpoints_created: self.checkpoints_created.load(Ordering::Relaxed),
            confirmation_latencies_ms: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{BatchId, MatchId, UserId};
    use chrono::NaiveDate;

    #[test]
    fn aggregates_counts_across_event_kinds() {
        let sink = TracingMetricsSink::new();
        let match_id = MatchId::new();
        let date = NaiveDate::from_ymd_opt(2026, 7, 29).unwrap();
        sink.record(MetricEvent::MoveSubmitted { match_id });
        sink.record(MetricEvent::MoveConfirmed { match_id, latency_ms: 42 });
        sink.record(MetricEvent::MoveConfirmed { match_id, latency_ms: 7 });
        sink.record(MetricEvent::MoveFailed { match_id, reason: "rejected".into() });
        sink.record(MetricEvent::BreakerOpened);
        sink.record(MetricEvent::BreakerClosed);
        sink.record(MetricEvent::RateLimitRejected { user_id: UserId::new("u1") });
        sink.record(MetricEvent::WalletRotated { new_index: 3 });
        sink.record(MetricEvent::BatchFlushed { batch_id: BatchId::new(date, 1), count: 5 });
        sink.record(MetricEvent::BatchAnchored { batch_id: BatchId::new(date, 1) });
        sink.record(MetricEvent::CheckpointCreated { match_id, event_index: 10 });

        let snap = sink.snapshot();
        assert_eq!(snap.moves_submitted, 1);
        assert_eq!(snap.moves_confirmed, 2);
        assert_eq!(snap.moves_failed, 1);
        assert_eq!(snap.breaker_opens, 1);
        assert_eq!(snap.rate_limit_rejections, 1);
        assert_eq!(snap.wallet_rotations, 1);
        assert_eq!(snap.batches_flushed, 1);
        assert_eq!(snap.batches_anchored, 1);
        assert_eq!(snap.checkpoints_created, 1);
        assert!(snap.confirmation_latencies_ms.is_empty());
    }

    #[test]
    fn does_not_double_count_reconciliation_conflicts_as_moves() {
        let sink = TracingMetricsSink::new();
        let match_id = MatchId::new();
        sink.record(MetricEvent::ReconciliationConflict {
            match_id,
            fields: vec!["move_count".to_string()],
        });
        let snap = sink.snapshot();
        assert_eq!(snap.reconciliation_conflicts, 1);
        assert_eq!(snap.moves_submitted, 0);
    }
}
