//! Simulated register till.
//!
//! The till tracks the physical drawer independently of the ledger so the
//! closing count is a real observation, not a ledger read.

use rust_decimal::Decimal;

use caja_common::{EmployeeId, MovementId, RegisterId, SessionId};
use caja_ledger::{EmployeeProfile, EmployeeRef, Movement};

/// A posting the till has seen accepted.
#[derive(Debug, Clone)]
pub struct PostedMovement {
    pub id: MovementId,
    pub signed: Decimal,
    pub cash: bool,
    pub reversed: bool,
}

/// A simulated register and the cashier working it.
pub struct SimulatedTill {
    pub register_id: RegisterId,
    pub cashier: EmployeeRef,
    session: Option<SessionId>,
    opening: Decimal,
    drawer: Decimal,
    posted: Vec<PostedMovement>,
}

impl SimulatedTill {
    pub fn new(register_id: RegisterId, cashier: EmployeeRef) -> Self {
        Self {
            register_id,
            cashier,
            session: None,
            opening: Decimal::ZERO,
            drawer: Decimal::ZERO,
            posted: Vec::new(),
        }
    }

    pub fn cashier_id(&self) -> &EmployeeId {
        &self.cashier.id
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn opening(&self) -> Decimal {
        self.opening
    }

    /// Cash physically in the drawer.
    pub fn drawer(&self) -> Decimal {
        self.drawer
    }

    pub fn posted_count(&self) -> usize {
        self.posted.len()
    }

    /// Start a shift with `float` in the drawer.
    pub fn opened(&mut self, session: SessionId, float: Decimal) {
        self.session = Some(session);
        self.opening = float;
        self.drawer = float;
        self.posted.clear();
    }

    /// Apply an accepted movement to the drawer.
    pub fn posted(&mut self, movement: &Movement) {
        if movement.affects_cash {
            self.drawer += movement.signed_amount();
        }
        self.posted.push(PostedMovement {
            id: movement.id,
            signed: movement.signed_amount(),
            cash: movement.affects_cash,
            reversed: false,
        });
    }

    /// Most recent posting that can still be reversed.
    pub fn last_reversible(&self) -> Option<MovementId> {
        self.posted.iter().rev().find(|p| !p.reversed).map(|p| p.id)
    }

    /// Undo a posting in the drawer after its reversal was accepted.
    pub fn reversed(&mut self, original: MovementId) {
        if let Some(p) = self.posted.iter_mut().find(|p| p.id == original) {
            p.reversed = true;
            if p.cash {
                self.drawer -= p.signed;
            }
        }
    }

    /// Shift closed; the till is idle again.
    pub fn closed(&mut self) {
        self.session = None;
    }
}

/// Till factory for creating test registers.
pub struct TillFactory;

impl TillFactory {
    /// Create N simulated tills.
    pub fn create_tills(count: usize) -> Vec<SimulatedTill> {
        let cashiers = [
            ("lfernandez", "Lucía", "Fernández"),
            ("mgomez", "Martín", "Gómez"),
            ("sdiaz", "Sofía", "Díaz"),
            ("jperez", "Julián", "Pérez"),
            ("vromero", "Valentina", "Romero"),
            ("tsosa", "Tomás", "Sosa"),
        ];

        (0..count)
            .map(|i| {
                let register_id = RegisterId::new(format!("CAJA_{:02}", i + 1));
                let cashier = match cashiers.get(i) {
                    Some((username, first, last)) => EmployeeRef::new(
                        EmployeeId::new(*username),
                        Some(EmployeeProfile {
                            first_name: first.to_string(),
                            last_name: last.to_string(),
                        }),
                    ),
                    None => EmployeeRef::new(EmployeeId::new(format!("cajero{}", i + 1)), None),
                };
                SimulatedTill::new(register_id, cashier)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caja_common::Sign;
    use caja_ledger::Origin;
    use rust_decimal_macros::dec;

    #[test]
    fn test_drawer_follows_cash_postings() {
        let mut till = TillFactory::create_tills(1).pop().unwrap();
        let session = SessionId::new();
        till.opened(session, dec!(100.00));

        let sale = Movement::new(
            session,
            2,
            dec!(30.00),
            Sign::Inflow,
            Origin::Venta,
            till.cashier_id().clone(),
        )
        .with_payment(None, true);
        let card = Movement::new(
            session,
            3,
            dec!(50.00),
            Sign::Inflow,
            Origin::Venta,
            till.cashier_id().clone(),
        );

        till.posted(&sale);
        till.posted(&card);
        assert_eq!(till.drawer(), dec!(130.00));
        assert_eq!(till.last_reversible(), Some(card.id));

        till.reversed(sale.id);
        assert_eq!(till.drawer(), dec!(100.00));
    }

    #[test]
    fn test_factory_names() {
        let tills = TillFactory::create_tills(8);
        assert_eq!(tills[0].register_id.as_str(), "CAJA_01");
        assert_eq!(tills[0].cashier.display_name(), "Lucía Fernández");
        assert_eq!(tills[7].cashier.display_name(), "cajero8");
    }
}
