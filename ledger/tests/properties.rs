//! Balance properties over random movement sequences.

use std::sync::Arc;

use caja_common::{EmployeeId, PaymentTypeId, RegisterId, Sign};
use caja_ledger::{
    CloseSessionRequest, LedgerConfig, LedgerEngine, OpenSessionRequest, RecordMovementRequest,
    ReverseMovementRequest, StaticAccessGate,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
enum Op {
    Record { cents: i64, inflow: bool, cash: bool },
    /// Reverse the n-th still-active recorded movement (modulo their count).
    Reverse(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1i64..10_000_000, any::<bool>(), any::<bool>())
            .prop_map(|(cents, inflow, cash)| Op::Record { cents, inflow, cash }),
        1 => any::<usize>().prop_map(Op::Reverse),
    ]
}

fn engine() -> LedgerEngine {
    let gate = StaticAccessGate::new();
    gate.grant_manager(EmployeeId::new("gerente"));
    LedgerEngine::in_memory(LedgerConfig::default(), Arc::new(gate))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// The cash balance equals the signed sum of the cash postings that were
    /// never reversed, and the close freezes exactly that figure.
    #[test]
    fn balance_matches_unreversed_postings(
        opening_cents in 0i64..1_000_000,
        ops in prop::collection::vec(op(), 0..40)
    ) {
        tokio_test::block_on(async {
            let engine = engine();
            let gerente = EmployeeId::new("gerente");
            let opening = Decimal::new(opening_cents, 2);

            let session = engine
                .open_session(OpenSessionRequest {
                    register_id: RegisterId::new("CAJA_PROP"),
                    employee_id: gerente.clone(),
                    opening_amount: opening,
                })
                .await
                .unwrap();

            // (movement, signed amount, affects cash) of postings still in effect.
            let mut live = Vec::new();
            let mut expected_total = opening;
            let mut expected_cash = opening;

            for op in ops {
                match op {
                    Op::Record { cents, inflow, cash } => {
                        let sign = if inflow { Sign::Inflow } else { Sign::Outflow };
                        let payment = if cash { PaymentTypeId(1) } else { PaymentTypeId(2) };
                        let movement = engine
                            .record_movement(
                                RecordMovementRequest::new(
                                    session.id,
                                    Decimal::new(cents, 2),
                                    sign,
                                    "MANUAL",
                                    gerente.clone(),
                                )
                                .with_payment_type(payment),
                            )
                            .await
                            .unwrap();

                        expected_total += movement.signed_amount();
                        if cash {
                            expected_cash += movement.signed_amount();
                        }
                        live.push((movement.id, movement.signed_amount(), cash));
                    }
                    Op::Reverse(n) if !live.is_empty() => {
                        let (id, signed, cash) = live.remove(n % live.len());
                        engine
                            .reverse_movement(ReverseMovementRequest {
                                movement_id: id,
                                reason: "prop".to_string(),
                                employee_id: gerente.clone(),
                            })
                            .await
                            .unwrap();

                        expected_total -= signed;
                        if cash {
                            expected_cash -= signed;
                        }
                    }
                    Op::Reverse(_) => {}
                }
            }

            let balances = engine.get_balances(session.id).await.unwrap();
            assert_eq!(balances.total, expected_total);
            assert_eq!(balances.cash, expected_cash);
            assert!(engine.verify_integrity(session.id).await.unwrap().is_clean());

            // Counts are never negative; clamp so the close
            // is always accepted.
            let counted = if expected_cash < Decimal::ZERO { Decimal::ZERO } else { expected_cash };
            let closed = engine
                .close_session(CloseSessionRequest {
                    session_id: session.id,
                    counted_amount: counted,
                    employee_id: gerente,
                    notes: None,
                })
                .await
                .unwrap();

            assert_eq!(closed.system_amount, Some(expected_cash));
            assert_eq!(closed.difference, Some(counted - expected_cash));
            assert!(engine.verify_integrity(session.id).await.unwrap().is_clean());
        });
    }
}
