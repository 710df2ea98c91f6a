//! Full session history: lifecycle events merged with postings.

use caja_common::{EmployeeId, RegisterId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::movement::Movement;
use crate::session::RegisterSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CajaEventKind {
    Apertura,
    Cierre,
}

/// Opening or closing of a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CajaEvent {
    pub kind: CajaEventKind,
    pub at: Timestamp,
    pub employee_id: EmployeeId,
    /// Opening float, or the physical count at close.
    pub amount: Decimal,
    pub description: String,
    pub register_id: RegisterId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HistoryEntry {
    Event(CajaEvent),
    Movement(Movement),
}

impl HistoryEntry {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            HistoryEntry::Event(event) => event.at,
            HistoryEntry::Movement(movement) => movement.created_at,
        }
    }
}

/// Build the chronological history of a session.
///
/// The opening event sorts before any posting and the closing event after
/// every posting, even when timestamps tie.
pub fn build_history(session: &RegisterSession, movements: &[Movement]) -> Vec<HistoryEntry> {
    let mut entries = Vec::with_capacity(movements.len() + 2);

    entries.push(HistoryEntry::Event(CajaEvent {
        kind: CajaEventKind::Apertura,
        at: session.opened_at,
        employee_id: session.opened_by.clone(),
        amount: session.opening_amount,
        description: format!("Apertura de caja {}", session.register_id),
        register_id: session.register_id.clone(),
    }));

    let mut ordered: Vec<&Movement> = movements.iter().collect();
    ordered.sort_by_key(|m| (m.created_at, m.sequence));
    entries.extend(ordered.into_iter().cloned().map(HistoryEntry::Movement));

    if let (Some(closed_at), Some(closed_by)) = (session.closed_at, session.closed_by.clone()) {
        let mut description = format!("Cierre de caja {}", session.register_id);
        if let Some(difference) = session.difference {
            if !difference.is_zero() {
                description.push_str(&format!(" (diferencia {})", difference));
            }
        }

        entries.push(HistoryEntry::Event(CajaEvent {
            kind: CajaEventKind::Cierre,
            at: closed_at,
            employee_id: closed_by,
            amount: session.counted_amount.unwrap_or_default(),
            description,
            register_id: session.register_id.clone(),
        }));
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::Origin;
    use crate::session::Closing;
    use caja_common::Sign;
    use rust_decimal_macros::dec;

    #[test]
    fn test_history_brackets_movements() {
        let mut session = RegisterSession::open(
            RegisterId::new("CAJA_01"),
            EmployeeId::new("ana"),
            dec!(1000.00),
        );
        let sale = Movement::new(
            session.id,
            1,
            dec!(250.00),
            Sign::Inflow,
            Origin::Venta,
            EmployeeId::new("ana"),
        );

        session
            .close(Closing {
                counted_amount: dec!(1240.00),
                system_amount: dec!(1250.00),
                digest: String::new(),
                employee_id: EmployeeId::new("jefe"),
                notes: None,
            })
            .unwrap();

        let history = build_history(&session, &[sale]);
        assert_eq!(history.len(), 3);
        assert!(matches!(
            &history[0],
            HistoryEntry::Event(e) if e.kind == CajaEventKind::Apertura
        ));
        assert!(matches!(&history[1], HistoryEntry::Movement(_)));
        match &history[2] {
            HistoryEntry::Event(e) => {
                assert_eq!(e.kind, CajaEventKind::Cierre);
                assert_eq!(e.amount, dec!(1240.00));
                assert!(e.description.contains("-10"));
            }
            other => panic!("expected closing event, got {:?}", other),
        }
    }

    #[test]
    fn test_open_session_has_no_closing_event() {
        let session = RegisterSession::open(
            RegisterId::new("CAJA_01"),
            EmployeeId::new("ana"),
            dec!(0),
        );
        assert_eq!(build_history(&session, &[]).len(), 1);
    }
}
