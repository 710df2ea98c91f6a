//! Ledger integrity verification.

use std::collections::HashMap;

use caja_common::{MovementId, SessionId};
use serde::{Deserialize, Serialize};

use crate::balance::{cash_balance, effective_balance, total_balance};
use crate::digest::closing_digest;
use crate::movement::Movement;
use crate::session::RegisterSession;

/// A single broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum IntegrityViolation {
    /// Movement stored under another session.
    ForeignMovement { movement_id: MovementId },
    /// Non-positive magnitude.
    NonPositiveAmount { movement_id: MovementId },
    /// Sequence numbers are not 1..=n.
    SequenceGap { expected: u64, found: u64 },
    /// Reversed movement without a matching reversal posting.
    MissingReversal { movement_id: MovementId },
    /// Reversal posting whose original is absent or not linked back.
    DanglingReversal { movement_id: MovementId },
    /// Reversal posting does not mirror the original.
    MismatchedReversal { movement_id: MovementId },
    /// A reversal posting was itself reversed.
    ReversedReversal { movement_id: MovementId },
    /// Folding every posting disagrees with folding the effective ones.
    BalanceMismatch,
    /// Stored system amount differs from the recomputed cash fold.
    SystemAmountMismatch,
    /// difference != counted - system.
    DifferenceMismatch,
    /// Movement set changed after close.
    DigestMismatch,
}

/// Result of checking one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub session_id: SessionId,
    pub checked_movements: usize,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check a session and its postings. `movements` must be in sequence order.
pub fn verify(session: &RegisterSession, movements: &[Movement]) -> IntegrityReport {
    let mut violations = Vec::new();
    let by_id: HashMap<MovementId, &Movement> = movements.iter().map(|m| (m.id, m)).collect();

    for (idx, m) in movements.iter().enumerate() {
        let expected = idx as u64 + 1;
        if m.sequence != expected {
            violations.push(IntegrityViolation::SequenceGap {
                expected,
                found: m.sequence,
            });
        }
        if m.session_id != session.id {
            violations.push(IntegrityViolation::ForeignMovement { movement_id: m.id });
        }
        if m.amount <= rust_decimal::Decimal::ZERO {
            violations.push(IntegrityViolation::NonPositiveAmount { movement_id: m.id });
        }

        if let Some(original_id) = m.reversed_of {
            if !m.is_active() {
                violations.push(IntegrityViolation::ReversedReversal { movement_id: m.id });
            }
            match by_id.get(&original_id) {
                Some(original) if original.reversed_by == Some(m.id) => {
                    if original.amount != m.amount || original.sign != m.sign.opposite() {
                        violations
                            .push(IntegrityViolation::MismatchedReversal { movement_id: m.id });
                    }
                }
                _ => violations.push(IntegrityViolation::DanglingReversal { movement_id: m.id }),
            }
        }

        if !m.is_active() && !m.is_reversal() {
            let linked = m
                .reversed_by
                .and_then(|id| by_id.get(&id))
                .map_or(false, |r| r.reversed_of == Some(m.id));
            if !linked {
                violations.push(IntegrityViolation::MissingReversal { movement_id: m.id });
            }
        }
    }

    if total_balance(movements) != effective_balance(movements) {
        violations.push(IntegrityViolation::BalanceMismatch);
    }

    if !session.is_open() {
        let cash = cash_balance(movements);
        if session.system_amount != Some(cash) {
            violations.push(IntegrityViolation::SystemAmountMismatch);
        }

        let expected_difference = session
            .counted_amount
            .zip(session.system_amount)
            .map(|(counted, system)| counted - system);
        if expected_difference.is_none() || session.difference != expected_difference {
            violations.push(IntegrityViolation::DifferenceMismatch);
        }

        if session.closing_digest.as_deref() != Some(closing_digest(session.id, movements).as_str()) {
            violations.push(IntegrityViolation::DigestMismatch);
        }
    }

    IntegrityReport {
        session_id: session.id,
        checked_movements: movements.len(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::Origin;
    use crate::session::Closing;
    use caja_common::{EmployeeId, RegisterId, Sign};
    use rust_decimal_macros::dec;

    fn fixture() -> (RegisterSession, Vec<Movement>) {
        let session = RegisterSession::open(
            RegisterId::new("CAJA_01"),
            EmployeeId::new("ana"),
            dec!(100.00),
        );
        let opening = Movement::new(
            session.id,
            1,
            dec!(100.00),
            Sign::Inflow,
            Origin::Apertura,
            EmployeeId::new("ana"),
        )
        .with_payment(None, true);
        let mut sale = Movement::new(
            session.id,
            2,
            dec!(40.00),
            Sign::Inflow,
            Origin::Venta,
            EmployeeId::new("ana"),
        )
        .with_payment(None, true);
        let reversal = sale.reversal(3, "error", EmployeeId::new("ana")).unwrap();
        sale.mark_reversed(reversal.id).unwrap();

        (session, vec![opening, sale, reversal])
    }

    #[test]
    fn test_clean_open_session() {
        let (session, movements) = fixture();
        let report = verify(&session, &movements);
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.checked_movements, 3);
    }

    #[test]
    fn test_clean_closed_session() {
        let (mut session, movements) = fixture();
        session
            .close(Closing {
                counted_amount: dec!(100.00),
                system_amount: cash_balance(&movements),
                digest: closing_digest(session.id, &movements),
                employee_id: EmployeeId::new("ana"),
                notes: None,
            })
            .unwrap();

        assert!(verify(&session, &movements).is_clean());
    }

    #[test]
    fn test_detects_unlinked_reversal() {
        let (session, mut movements) = fixture();
        movements[1].reversed_by = None;

        let report = verify(&session, &movements);
        assert!(report
            .violations
            .contains(&IntegrityViolation::MissingReversal { movement_id: movements[1].id }));
        assert!(report
            .violations
            .contains(&IntegrityViolation::DanglingReversal { movement_id: movements[2].id }));
    }

    #[test]
    fn test_detects_tampering_after_close() {
        let (mut session, mut movements) = fixture();
        session
            .close(Closing {
                counted_amount: dec!(100.00),
                system_amount: cash_balance(&movements),
                digest: closing_digest(session.id, &movements),
                employee_id: EmployeeId::new("ana"),
                notes: None,
            })
            .unwrap();

        movements[0].amount = dec!(90.00);
        let report = verify(&session, &movements);
        assert!(report.violations.contains(&IntegrityViolation::SystemAmountMismatch));
        assert!(report.violations.contains(&IntegrityViolation::DigestMismatch));
    }
}
