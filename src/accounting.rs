//! Call-accounting port and in-process call statistics.
//!
//! Every network attempt is reported to an injected sink, fire-and-forget:
//! recording failures are swallowed and the core algorithms never depend on
//! the sink succeeding. Production wires a real collaborator; tests use
//! [`MemorySink`] to observe attempts or [`NoopSink`] to ignore them.

use crate::model::CallAttempt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Receiver for per-attempt instrumentation records.
pub trait CallSink: Send + Sync {
    fn record_call(&self, attempt: &CallAttempt);
}

/// Discards everything. Default when no collaborator is wired.
pub struct NoopSink;

impl CallSink for NoopSink {
    fn record_call(&self, _attempt: &CallAttempt) {}
}

/// Buffers attempts in memory. Test double.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<CallAttempt>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<CallAttempt> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CallSink for MemorySink {
    fn record_call(&self, attempt: &CallAttempt) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(attempt.clone());
    }
}

/// Lock-free counters shared across concurrent work units.
#[derive(Debug, Default)]
pub struct CallStats {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallStatsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retries: u64,
    pub success_rate: f64,
}

impl CallStats {
    pub(crate) fn record_started(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CallStatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        CallStatsSnapshot {
            total,
            successful,
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            success_rate: if total > 0 {
                successful as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttemptOutcome, CallAttempt};

    fn attempt(n: u32) -> CallAttempt {
        CallAttempt {
            request_id: "req-1".into(),
            segment_id: Some("segment_0".into()),
            api_type: "official",
            attempt: n,
            started_at: crate::model::now(),
            duration_ms: 12,
            outcome: AttemptOutcome::Failed,
            token_usage: 0,
            error: Some("boom".into()),
        }
    }

    #[test]
    fn test_memory_sink_buffers_attempts() {
        let sink = MemorySink::new();
        sink.record_call(&attempt(0));
        sink.record_call(&attempt(1));
        let recorded = sink.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].attempt, 1);
    }

    #[test]
    fn test_stats_snapshot_and_success_rate() {
        let stats = CallStats::default();
        assert_eq!(stats.snapshot().success_rate, 0.0);

        stats.record_started();
        stats.record_started();
        stats.record_success();
        stats.record_failure();
        stats.record_retry();

        let snap = stats.snapshot();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.successful, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.success_rate, 50.0);
    }
}
