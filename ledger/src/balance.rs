//! Balance derivation for register sessions.
//!
//! Balances are never stored. Every figure is a fold over the session's
//! postings, so two calls over the same movements always agree.

use caja_common::{now, SessionId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::movement::Movement;
use crate::session::RegisterSession;

/// Balances of a session at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub session_id: SessionId,
    /// Signed sum of every posting.
    pub total: Decimal,
    /// Signed sum of cash-affecting postings.
    pub cash: Decimal,
    /// What the till should hold: `cash` while open, the count once closed.
    pub current: Decimal,
    /// Postings folded.
    pub movement_count: usize,
    pub computed_at: Timestamp,
}

impl Balances {
    /// Fold the session's movements.
    pub fn compute(session: &RegisterSession, movements: &[Movement]) -> Self {
        let cash = cash_balance(movements);
        let current = match session.counted_amount {
            Some(counted) if !session.is_open() => counted,
            _ => cash,
        };

        Self {
            session_id: session.id,
            total: total_balance(movements),
            cash,
            current,
            movement_count: movements.len(),
            computed_at: now(),
        }
    }
}

/// Signed sum over the ledger.
///
/// A reversed movement stays in the fold next to its reversal posting; the
/// pair nets to zero, so the balance equals the sum of postings that were
/// never reversed.
pub fn total_balance(movements: &[Movement]) -> Decimal {
    movements.iter().map(Movement::signed_amount).sum()
}

/// Same as [`total_balance`], restricted to cash.
pub fn cash_balance(movements: &[Movement]) -> Decimal {
    movements
        .iter()
        .filter(|m| m.affects_cash)
        .map(Movement::signed_amount)
        .sum()
}

/// Sum of the movements still in effect: active, and not a reversal posting.
///
/// Equal to [`total_balance`] whenever every reversal is linked to its
/// original; integrity checks compare the two.
pub fn effective_balance(movements: &[Movement]) -> Decimal {
    movements
        .iter()
        .filter(|m| m.is_active() && !m.is_reversal())
        .map(Movement::signed_amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::Origin;
    use caja_common::{EmployeeId, RegisterId, Sign};
    use rust_decimal_macros::dec;

    fn posting(session: &RegisterSession, seq: u64, amount: Decimal, sign: Sign, cash: bool) -> Movement {
        Movement::new(
            session.id,
            seq,
            amount,
            sign,
            Origin::Venta,
            EmployeeId::new("ana"),
        )
        .with_payment(None, cash)
    }

    fn session() -> RegisterSession {
        RegisterSession::open(RegisterId::new("CAJA_01"), EmployeeId::new("ana"), dec!(1000.00))
    }

    #[test]
    fn test_total_and_cash() {
        let s = session();
        let movements = vec![
            posting(&s, 1, dec!(1000.00), Sign::Inflow, true),
            posting(&s, 2, dec!(250.00), Sign::Inflow, true),
            posting(&s, 3, dec!(80.00), Sign::Inflow, false),
            posting(&s, 4, dec!(100.00), Sign::Outflow, true),
        ];

        let balances = Balances::compute(&s, &movements);
        assert_eq!(balances.total, dec!(1230.00));
        assert_eq!(balances.cash, dec!(1150.00));
        assert_eq!(balances.current, dec!(1150.00));
        assert_eq!(balances.movement_count, 4);
    }

    #[test]
    fn test_reversal_pair_nets_to_zero() {
        let s = session();
        let mut sale = posting(&s, 1, dec!(250.00), Sign::Inflow, true);
        let reversal = sale.reversal(2, "error", EmployeeId::new("jefe")).unwrap();
        sale.mark_reversed(reversal.id).unwrap();

        let movements = vec![sale, reversal];
        assert_eq!(total_balance(&movements), Decimal::ZERO);
        assert_eq!(cash_balance(&movements), Decimal::ZERO);
        assert_eq!(effective_balance(&movements), Decimal::ZERO);
    }

    #[test]
    fn test_current_uses_count_once_closed() {
        let mut s = session();
        let movements = vec![posting(&s, 1, dec!(1000.00), Sign::Inflow, true)];
        s.close(crate::session::Closing {
            counted_amount: dec!(990.00),
            system_amount: dec!(1000.00),
            digest: String::new(),
            employee_id: EmployeeId::new("ana"),
            notes: None,
        })
        .unwrap();

        let balances = Balances::compute(&s, &movements);
        assert_eq!(balances.cash, dec!(1000.00));
        assert_eq!(balances.current, dec!(990.00));
    }

    #[test]
    fn test_empty_ledger() {
        let s = session();
        let balances = Balances::compute(&s, &[]);
        assert_eq!(balances.total, Decimal::ZERO);
        assert_eq!(balances.cash, Decimal::ZERO);
    }
}
