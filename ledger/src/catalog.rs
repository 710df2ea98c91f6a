//! Reference data the ledger points at but does not own.

use std::collections::HashMap;

use caja_common::{CajaError, EmployeeId, MovementTypeId, PaymentTypeId, Result};
use serde::{Deserialize, Serialize};

/// Payment type (tipo de pago).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentType {
    pub id: PaymentTypeId,
    /// Display name as entered by the business.
    pub name: String,
}

impl PaymentType {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: PaymentTypeId(id),
            name: name.into(),
        }
    }

    /// Name trimmed and upper-cased.
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_uppercase()
    }

    /// Whether this payment type moves physical cash.
    pub fn is_cash(&self, cash_name: &str) -> bool {
        self.normalized_name() == cash_name.trim().to_uppercase()
    }
}

/// Movement type (tipo de movimiento).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementType {
    pub id: MovementTypeId,
    pub name: String,
}

impl MovementType {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: MovementTypeId(id),
            name: name.into(),
        }
    }
}

/// Payment and movement types, loaded once at start-up.
#[derive(Debug, Clone)]
pub struct Catalog {
    cash_name: String,
    payment_types: HashMap<PaymentTypeId, PaymentType>,
    movement_types: HashMap<MovementTypeId, MovementType>,
}

impl Catalog {
    /// Empty catalog; `cash_name` identifies the cash payment type.
    pub fn new(cash_name: impl Into<String>) -> Self {
        Self {
            cash_name: cash_name.into(),
            payment_types: HashMap::new(),
            movement_types: HashMap::new(),
        }
    }

    /// The payment and movement types a fresh install ships with.
    pub fn with_defaults(cash_name: impl Into<String>) -> Self {
        let cash_name = cash_name.into();
        Self::new(cash_name.clone())
            .with_payment_type(PaymentType::new(1, cash_name))
            .with_payment_type(PaymentType::new(2, "Tarjeta"))
            .with_payment_type(PaymentType::new(3, "Transferencia"))
            .with_movement_type(MovementType::new(1, "Ingreso"))
            .with_movement_type(MovementType::new(2, "Egreso"))
    }

    pub fn with_payment_type(mut self, payment_type: PaymentType) -> Self {
        self.payment_types.insert(payment_type.id, payment_type);
        self
    }

    pub fn with_movement_type(mut self, movement_type: MovementType) -> Self {
        self.movement_types.insert(movement_type.id, movement_type);
        self
    }

    pub fn cash_name(&self) -> &str {
        &self.cash_name
    }

    pub fn payment_type(&self, id: PaymentTypeId) -> Option<&PaymentType> {
        self.payment_types.get(&id)
    }

    pub fn movement_type(&self, id: MovementTypeId) -> Option<&MovementType> {
        self.movement_types.get(&id)
    }

    pub fn payment_types(&self) -> impl Iterator<Item = &PaymentType> {
        self.payment_types.values()
    }

    pub fn movement_types(&self) -> impl Iterator<Item = &MovementType> {
        self.movement_types.values()
    }

    /// The payment type whose name normalizes to the cash name.
    pub fn cash_payment_type(&self) -> Option<&PaymentType> {
        let mut candidates: Vec<&PaymentType> = self
            .payment_types
            .values()
            .filter(|p| p.is_cash(&self.cash_name))
            .collect();
        candidates.sort_by_key(|p| p.id.0);
        candidates.into_iter().next()
    }

    /// Resolve an optional payment reference into `affects_cash`.
    ///
    /// Unknown ids are a validation error; no payment type means non-cash.
    pub fn resolve_payment(&self, id: Option<PaymentTypeId>) -> Result<bool> {
        match id {
            None => Ok(false),
            Some(id) => self
                .payment_type(id)
                .map(|p| p.is_cash(&self.cash_name))
                .ok_or_else(|| {
                    CajaError::validation(format!("unknown payment type {}", id), "payment_type_id")
                }),
        }
    }

    /// Check an optional movement type reference exists.
    pub fn resolve_movement_type(&self, id: Option<MovementTypeId>) -> Result<()> {
        match id {
            Some(id) if self.movement_type(id).is_none() => Err(CajaError::validation(
                format!("unknown movement type {}", id),
                "movement_type_id",
            )),
            _ => Ok(()),
        }
    }
}

/// Optional employee profile joined in by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub first_name: String,
    pub last_name: String,
}

/// An employee reference with its profile already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRef {
    pub id: EmployeeId,
    pub profile: Option<EmployeeProfile>,
}

impl EmployeeRef {
    pub fn new(id: EmployeeId, profile: Option<EmployeeProfile>) -> Self {
        Self { id, profile }
    }

    /// "First Last" when a profile is attached, otherwise the username.
    pub fn display_name(&self) -> String {
        match &self.profile {
            Some(profile) => {
                let full = format!("{} {}", profile.first_name.trim(), profile.last_name.trim());
                let full = full.trim();
                if full.is_empty() {
                    self.id.to_string()
                } else {
                    full.to_string()
                }
            }
            None => self.id.to_string(),
        }
    }
}
