//! Simulation metrics.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::Serialize;

/// Outcome of one till's shift.
#[derive(Debug, Clone, Serialize)]
pub struct ShiftSummary {
    pub register_id: String,
    pub cashier: String,
    pub session_id: String,
    pub opening: Decimal,
    pub system_amount: Decimal,
    pub counted_amount: Decimal,
    pub difference: Decimal,
    pub movements: usize,
    pub integrity_clean: bool,
}

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Ledger operations attempted.
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Operations refused because the session was held too long.
    pub busy_operations: u64,
    pub shifts: Vec<ShiftSummary>,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            busy_operations: 0,
            shifts: Vec::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a successful ledger operation.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.total_operations += 1;
        self.successful_operations += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record a failed ledger operation.
    pub fn record_failure(&mut self, busy: bool) {
        self.total_operations += 1;
        self.failed_operations += 1;
        if busy {
            self.busy_operations += 1;
        }
    }

    pub fn record_shift(&mut self, summary: ShiftSummary) {
        self.shifts.push(summary);
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * 99 / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.successful_operations as f64 / self.total_operations as f64
    }

    /// Sum of closing differences across shifts.
    pub fn net_difference(&self) -> Decimal {
        self.shifts.iter().map(|s| s.difference).sum()
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_success(100);
        metrics.record_success(200);
        metrics.record_success(150);
        metrics.record_failure(true);

        assert_eq!(metrics.total_operations, 4);
        assert_eq!(metrics.successful_operations, 3);
        assert_eq!(metrics.busy_operations, 1);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.success_rate(), 0.75);
    }

    #[test]
    fn test_net_difference() {
        let mut metrics = SimulationMetrics::new();
        for difference in [dec!(-2.50), dec!(1.00)] {
            metrics.record_shift(ShiftSummary {
                register_id: "CAJA_01".into(),
                cashier: "Lucía Fernández".into(),
                session_id: String::new(),
                opening: dec!(0),
                system_amount: dec!(0),
                counted_amount: dec!(0),
                difference,
                movements: 0,
                integrity_clean: true,
            });
        }
        assert_eq!(metrics.net_difference(), dec!(-1.50));
    }
}
