//! Ledger counters.

use std::sync::atomic::{AtomicU64, Ordering};

use caja_common::CajaError;
use serde::Serialize;

/// Ledger metrics.
#[derive(Debug, Default)]
pub struct LedgerMetrics {
    pub sessions_opened: AtomicU64,
    pub sessions_closed: AtomicU64,
    /// Sessions closed with a non-zero difference.
    pub sessions_closed_with_difference: AtomicU64,
    pub movements_recorded: AtomicU64,
    pub movements_reversed: AtomicU64,
    pub rejected_validation: AtomicU64,
    pub rejected_state: AtomicU64,
    pub rejected_conflict: AtomicU64,
    pub rejected_permission: AtomicU64,
    pub lock_timeouts: AtomicU64,
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self, with_difference: bool) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        if with_difference {
            self.sessions_closed_with_difference
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn movement_recorded(&self) {
        self.movements_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn movement_reversed(&self) {
        self.movements_reversed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected operation by error kind.
    pub fn rejected(&self, error: &CajaError) {
        let counter = match error {
            CajaError::Validation { .. } => &self.rejected_validation,
            CajaError::State(_) => &self.rejected_state,
            CajaError::Conflict(_) => &self.rejected_conflict,
            CajaError::Permission { .. } => &self.rejected_permission,
            CajaError::Busy { .. } => &self.lock_timeouts,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_closed_with_difference: self
                .sessions_closed_with_difference
                .load(Ordering::Relaxed),
            movements_recorded: self.movements_recorded.load(Ordering::Relaxed),
            movements_reversed: self.movements_reversed.load(Ordering::Relaxed),
            rejected_validation: self.rejected_validation.load(Ordering::Relaxed),
            rejected_state: self.rejected_state.load(Ordering::Relaxed),
            rejected_conflict: self.rejected_conflict.load(Ordering::Relaxed),
            rejected_permission: self.rejected_permission.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of ledger metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_closed_with_difference: u64,
    pub movements_recorded: u64,
    pub movements_reversed: u64,
    pub rejected_validation: u64,
    pub rejected_state: u64,
    pub rejected_conflict: u64,
    pub rejected_permission: u64,
    pub lock_timeouts: u64,
}

impl MetricsSnapshot {
    /// Total rejected operations.
    pub fn rejected_total(&self) -> u64 {
        self.rejected_validation
            + self.rejected_state
            + self.rejected_conflict
            + self.rejected_permission
            + self.lock_timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_by_kind() {
        let metrics = LedgerMetrics::new();
        metrics.rejected(&CajaError::validation("bad", "amount"));
        metrics.rejected(&CajaError::State("closed".into()));
        metrics.rejected(&CajaError::Busy { retry_after_ms: 10 });
        metrics.rejected(&CajaError::Storage("io".into()));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rejected_validation, 1);
        assert_eq!(snapshot.rejected_state, 1);
        assert_eq!(snapshot.lock_timeouts, 1);
        assert_eq!(snapshot.rejected_total(), 3);
    }

    #[test]
    fn test_session_counters() {
        let metrics = LedgerMetrics::new();
        metrics.session_opened();
        metrics.session_closed(true);
        metrics.session_closed(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_opened, 1);
        assert_eq!(snapshot.sessions_closed, 2);
        assert_eq!(snapshot.sessions_closed_with_difference, 1);
    }
}
