//! End-to-end register shifts against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use caja_common::{CajaError, EmployeeId, PaymentTypeId, RegisterId, Sign};
use caja_ledger::{
    CapabilitySet, CloseSessionRequest, LedgerConfig, LedgerEngine, MovementStatus,
    OpenSessionRequest, RecordMovementRequest, RegisterSession, ReverseMovementRequest,
    StaticAccessGate,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const EFECTIVO: PaymentTypeId = PaymentTypeId(1);

fn cajero() -> EmployeeId {
    EmployeeId::new("cajero")
}

fn engine_with(lock_timeout: Duration) -> Arc<LedgerEngine> {
    let gate = StaticAccessGate::new();
    gate.grant_employee(
        cajero(),
        CapabilitySet::employee_default().with(caja_ledger::Capability::CashMovements),
        None,
    );
    gate.grant_employee(EmployeeId::new("repositor"), CapabilitySet::employee_default(), None);

    let config = LedgerConfig {
        lock_timeout,
        ..LedgerConfig::default()
    };
    Arc::new(LedgerEngine::in_memory(config, Arc::new(gate)))
}

fn engine() -> Arc<LedgerEngine> {
    engine_with(Duration::from_secs(5))
}

async fn open(engine: &LedgerEngine, register: &str, amount: Decimal) -> RegisterSession {
    engine
        .open_session(OpenSessionRequest {
            register_id: RegisterId::new(register),
            employee_id: cajero(),
            opening_amount: amount,
        })
        .await
        .unwrap()
}

fn cash(session: &RegisterSession, amount: Decimal, sign: Sign, origin: &str) -> RecordMovementRequest {
    RecordMovementRequest::new(session.id, amount, sign, origin, cajero()).with_payment_type(EFECTIVO)
}

#[tokio::test]
async fn reference_shift_balances_and_closes_even() {
    let engine = engine();
    let session = open(&engine, "CAJA_01", dec!(1000.00)).await;

    engine
        .record_movement(cash(&session, dec!(250.00), Sign::Inflow, "VENTA"))
        .await
        .unwrap();
    engine
        .record_movement(cash(&session, dec!(100.00), Sign::Outflow, "DEVOLUCION"))
        .await
        .unwrap();

    let balances = engine.get_balances(session.id).await.unwrap();
    assert_eq!(balances.cash, dec!(1150.00));
    assert_eq!(balances.total, dec!(1150.00));

    let closed = engine
        .close_session(CloseSessionRequest {
            session_id: session.id,
            counted_amount: dec!(1150.00),
            employee_id: cajero(),
            notes: None,
        })
        .await
        .unwrap();

    assert_eq!(closed.system_amount, Some(dec!(1150.00)));
    assert_eq!(closed.difference, Some(Decimal::ZERO));
    assert_eq!(engine.metrics().snapshot().sessions_closed_with_difference, 0);
}

#[tokio::test]
async fn lowercase_origin_is_rejected_without_a_row() {
    let engine = engine();
    let session = open(&engine, "CAJA_01", dec!(10.00)).await;

    let err = engine
        .record_movement(cash(&session, dec!(5.00), Sign::Inflow, "efectivo"))
        .await
        .unwrap_err();

    assert!(matches!(err, CajaError::Validation { .. }));
    assert_eq!(err.field(), Some("origin"));
    assert_eq!(engine.list_movements(session.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn non_positive_amounts_are_rejected_for_both_signs() {
    let engine = engine();
    let session = open(&engine, "CAJA_01", dec!(0)).await;

    for sign in [Sign::Inflow, Sign::Outflow] {
        for amount in [dec!(0), dec!(-1.00)] {
            let err = engine
                .record_movement(cash(&session, amount, sign, "MANUAL"))
                .await
                .unwrap_err();
            assert!(matches!(err, CajaError::Validation { .. }));
        }
    }

    assert!(engine.list_movements(session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn closed_session_accepts_nothing() {
    let engine = engine();
    let session = open(&engine, "CAJA_01", dec!(500.00)).await;
    engine
        .close_session(CloseSessionRequest {
            session_id: session.id,
            counted_amount: dec!(500.00),
            employee_id: cajero(),
            notes: None,
        })
        .await
        .unwrap();

    let err = engine
        .record_movement(cash(&session, dec!(1.00), Sign::Inflow, "VENTA"))
        .await
        .unwrap_err();
    assert!(matches!(err, CajaError::State(_)));
    assert_eq!(err.error_code(), "STATE_ERROR");
}

#[tokio::test]
async fn double_reversal_is_rejected() {
    let engine = engine();
    let session = open(&engine, "CAJA_01", dec!(100.00)).await;
    let sale = engine
        .record_movement(cash(&session, dec!(40.00), Sign::Inflow, "VENTA"))
        .await
        .unwrap();

    let reverse = |reason: &str| ReverseMovementRequest {
        movement_id: sale.id,
        reason: reason.to_string(),
        employee_id: cajero(),
    };

    engine.reverse_movement(reverse("error de tipeo")).await.unwrap();
    let err = engine.reverse_movement(reverse("de nuevo")).await.unwrap_err();
    assert!(matches!(err, CajaError::State(_)));

    let movements = engine.list_movements(session.id).await.unwrap();
    assert_eq!(movements.len(), 3);
    assert_eq!(
        movements
            .iter()
            .filter(|m| m.status == MovementStatus::Reversed)
            .count(),
        1
    );
    assert_eq!(engine.get_balances(session.id).await.unwrap().cash, dec!(100.00));
    assert!(engine.verify_integrity(session.id).await.unwrap().is_clean());
}

#[tokio::test]
async fn second_open_on_same_register_conflicts() {
    let engine = engine();
    let first = open(&engine, "CAJA_01", dec!(100.00)).await;

    let err = engine
        .open_session(OpenSessionRequest {
            register_id: RegisterId::new("CAJA_01"),
            employee_id: cajero(),
            opening_amount: dec!(200.00),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CajaError::Conflict(_)));

    let current = engine
        .current_session(&RegisterId::new("CAJA_01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.id, first.id);
}

#[tokio::test]
async fn permission_denied_leaves_no_trace() {
    let engine = engine();
    let session = open(&engine, "CAJA_01", dec!(100.00)).await;

    let request = RecordMovementRequest::new(
        session.id,
        dec!(10.00),
        Sign::Outflow,
        "MANUAL",
        EmployeeId::new("repositor"),
    );
    let err = engine.record_movement(request).await.unwrap_err();
    assert!(matches!(err, CajaError::Permission { .. }));

    let err = engine
        .close_session(CloseSessionRequest {
            session_id: session.id,
            counted_amount: dec!(0),
            employee_id: EmployeeId::new("repositor"),
            notes: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CajaError::Permission { .. }));

    assert_eq!(engine.list_movements(session.id).await.unwrap().len(), 1);
    assert!(engine.get_session(session.id).await.unwrap().is_open());
    assert_eq!(engine.metrics().snapshot().rejected_permission, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_keep_a_gap_free_ledger() {
    let engine = engine();
    let session = open(&engine, "CAJA_01", dec!(0)).await;

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let request = cash(
                &session,
                Decimal::new(100 + i, 2),
                if i % 3 == 0 { Sign::Outflow } else { Sign::Inflow },
                "VENTA",
            );
            tokio::spawn(async move { engine.record_movement(request).await })
        })
        .collect();

    let mut expected = Decimal::ZERO;
    for task in tasks {
        let movement = task.await.unwrap().unwrap();
        expected += movement.signed_amount();
    }

    let movements = engine.list_movements(session.id).await.unwrap();
    assert_eq!(movements.len(), 32);
    for (idx, m) in movements.iter().enumerate() {
        assert_eq!(m.sequence, idx as u64 + 1);
    }
    assert_eq!(engine.get_balances(session.id).await.unwrap().cash, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_yield_one_session() {
    let engine = engine();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .open_session(OpenSessionRequest {
                        register_id: RegisterId::new("CAJA_07"),
                        employee_id: cajero(),
                        opening_amount: dec!(10.00),
                    })
                    .await
            })
        })
        .collect();

    let mut opened = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => opened += 1,
            Err(err) => assert!(matches!(err, CajaError::Conflict(_)), "{:?}", err),
        }
    }

    assert_eq!(opened, 1);
    assert_eq!(
        engine
            .sessions_for_register(&RegisterId::new("CAJA_07"))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_racing_records_never_loses_a_posting() {
    let engine = engine();
    let session = open(&engine, "CAJA_01", dec!(100.00)).await;

    let writers: Vec<_> = (0..16)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let request = cash(&session, dec!(1.00), Sign::Inflow, "VENTA");
            tokio::spawn(async move { engine.record_movement(request).await })
        })
        .collect();

    let closer = {
        let engine = Arc::clone(&engine);
        let session_id = session.id;
        tokio::spawn(async move {
            engine
                .close_session(CloseSessionRequest {
                    session_id,
                    counted_amount: dec!(100.00),
                    employee_id: cajero(),
                    notes: None,
                })
                .await
        })
    };

    for writer in writers {
        if let Err(err) = writer.await.unwrap() {
            assert!(matches!(err, CajaError::State(_)), "{:?}", err);
        }
    }
    let closed = closer.await.unwrap().unwrap();

    // Whatever made it in before the close is exactly what the close saw.
    let movements = engine.list_movements(session.id).await.unwrap();
    let cash_total: Decimal = movements.iter().map(|m| m.signed_amount()).sum();
    assert_eq!(closed.system_amount, Some(cash_total));
    assert!(engine.verify_integrity(session.id).await.unwrap().is_clean());
}

#[tokio::test]
async fn registers_are_independent() {
    let engine = engine_with(Duration::from_millis(30));
    let first = open(&engine, "CAJA_01", dec!(0)).await;
    let second = open(&engine, "CAJA_02", dec!(75.50)).await;

    engine
        .record_movement(cash(&first, dec!(20.00), Sign::Inflow, "VENTA"))
        .await
        .unwrap();

    assert_eq!(engine.get_balances(first.id).await.unwrap().cash, dec!(20.00));
    assert_eq!(engine.get_balances(second.id).await.unwrap().cash, dec!(75.50));
}
