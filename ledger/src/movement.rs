//! Movement (movimiento de caja) types for the append-only register ledger.

use std::fmt;
use std::str::FromStr;

use caja_common::{
    local_date_time, now, CajaError, EmployeeId, MovementId, MovementTypeId, PaymentTypeId,
    Result, SessionId, Sign, Timestamp,
};
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a movement was posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// Sale collected at the register.
    Venta,
    /// Purchase paid from the register.
    Compra,
    /// Customer refund.
    Devolucion,
    /// Opening float.
    Apertura,
    /// Closing withdrawal.
    Cierre,
    /// Manual income/expense entered by staff.
    Manual,
    /// Manual correction.
    AjusteManual,
}

impl Origin {
    /// Every accepted origin tag.
    pub const ALL: [Origin; 7] = [
        Origin::Venta,
        Origin::Compra,
        Origin::Devolucion,
        Origin::Apertura,
        Origin::Cierre,
        Origin::Manual,
        Origin::AjusteManual,
    ];

    /// Canonical tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Venta => "VENTA",
            Origin::Compra => "COMPRA",
            Origin::Devolucion => "DEVOLUCION",
            Origin::Apertura => "APERTURA",
            Origin::Cierre => "CIERRE",
            Origin::Manual => "MANUAL",
            Origin::AjusteManual => "AJUSTE_MANUAL",
        }
    }

    /// Parse a tag, normalizing case. Unknown tags are a validation error.
    pub fn parse(tag: &str) -> Result<Self> {
        let normalized = tag.trim().to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|origin| origin.as_str() == normalized)
            .ok_or_else(|| CajaError::validation(format!("origen inválido: {}", tag), "origin"))
    }
}

impl FromStr for Origin {
    type Err = CajaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction marker (`tipo`) shown in the till history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "INGRESO")]
    Income,
    #[serde(rename = "EGRESO")]
    Expense,
    #[serde(rename = "AJUSTE")]
    Adjustment,
    #[serde(rename = "REVERSO")]
    Reversal,
    #[serde(rename = "APERTURA")]
    Opening,
    #[serde(rename = "CIERRE")]
    Closing,
}

impl MovementKind {
    /// Marker for a regular posting with the given origin and sign.
    pub fn for_posting(origin: Origin, sign: Sign) -> Self {
        match origin {
            Origin::Apertura => MovementKind::Opening,
            Origin::Cierre => MovementKind::Closing,
            Origin::Manual | Origin::AjusteManual => MovementKind::Adjustment,
            _ => match sign {
                Sign::Inflow => MovementKind::Income,
                Sign::Outflow => MovementKind::Expense,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Income => "INGRESO",
            MovementKind::Expense => "EGRESO",
            MovementKind::Adjustment => "AJUSTE",
            MovementKind::Reversal => "REVERSO",
            MovementKind::Opening => "APERTURA",
            MovementKind::Closing => "CIERRE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "INGRESO" => Ok(MovementKind::Income),
            "EGRESO" => Ok(MovementKind::Expense),
            "AJUSTE" => Ok(MovementKind::Adjustment),
            "REVERSO" => Ok(MovementKind::Reversal),
            "APERTURA" => Ok(MovementKind::Opening),
            "CIERRE" => Ok(MovementKind::Closing),
            other => Err(CajaError::Storage(format!("unknown movement kind: {}", other))),
        }
    }
}

/// Movement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    /// Posted and not reversed.
    Active,
    /// Offset by a later reversal posting.
    Reversed,
}

impl MovementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementStatus::Active => "active",
            MovementStatus::Reversed => "reversed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(MovementStatus::Active),
            "reversed" => Ok(MovementStatus::Reversed),
            other => Err(CajaError::Storage(format!("unknown movement status: {}", other))),
        }
    }
}

/// Pointer to the business document that caused a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Document kind, e.g. `venta` or `compra`.
    pub ref_type: String,
    /// Document identifier in its own table.
    pub ref_id: i64,
}

impl DocumentRef {
    pub fn new(ref_type: impl Into<String>, ref_id: i64) -> Self {
        Self {
            ref_type: ref_type.into(),
            ref_id,
        }
    }
}

/// A single signed posting against a register session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// Unique movement ID.
    pub id: MovementId,
    /// Owning session.
    pub session_id: SessionId,
    /// Position within the session (1-based, gap-free).
    pub sequence: u64,
    /// Local business date of the movement.
    pub date: NaiveDate,
    /// Local wall-clock time of the movement.
    pub time: NaiveTime,
    /// When the row was created.
    pub created_at: Timestamp,
    /// Positive magnitude.
    pub amount: Decimal,
    /// Direction of the posting.
    pub sign: Sign,
    pub description: String,
    /// Employee who handled the money.
    pub employee_id: EmployeeId,
    /// Account that entered the movement.
    pub created_by: EmployeeId,
    pub payment_type_id: Option<PaymentTypeId>,
    pub movement_type_id: Option<MovementTypeId>,
    /// Whether the posting moves physical cash (payment type is cash).
    pub affects_cash: bool,
    /// Direction marker.
    pub kind: MovementKind,
    pub origin: Origin,
    /// Originating document, if any.
    pub document: Option<DocumentRef>,
    pub status: MovementStatus,
    /// Movement this posting reverses.
    pub reversed_of: Option<MovementId>,
    /// Posting that reversed this movement.
    pub reversed_by: Option<MovementId>,
}

impl Movement {
    /// Create an active posting. Amount validation is the caller's job.
    pub fn new(
        session_id: SessionId,
        sequence: u64,
        amount: Decimal,
        sign: Sign,
        origin: Origin,
        employee_id: EmployeeId,
    ) -> Self {
        let created_at = now();
        let (date, time) = local_date_time(created_at);

        Self {
            id: MovementId::new(),
            session_id,
            sequence,
            date,
            time,
            created_at,
            amount,
            sign,
            description: String::new(),
            created_by: employee_id.clone(),
            employee_id,
            payment_type_id: None,
            movement_type_id: None,
            affects_cash: false,
            kind: MovementKind::for_posting(origin, sign),
            origin,
            document: None,
            status: MovementStatus::Active,
            reversed_of: None,
            reversed_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach the payment type and whether it is cash.
    pub fn with_payment(mut self, payment_type_id: Option<PaymentTypeId>, affects_cash: bool) -> Self {
        self.payment_type_id = payment_type_id;
        self.affects_cash = affects_cash;
        self
    }

    pub fn with_movement_type(mut self, movement_type_id: Option<MovementTypeId>) -> Self {
        self.movement_type_id = movement_type_id;
        self
    }

    pub fn with_document(mut self, document: Option<DocumentRef>) -> Self {
        self.document = document;
        self
    }

    pub fn with_created_by(mut self, created_by: EmployeeId) -> Self {
        self.created_by = created_by;
        self
    }

    /// Amount with its sign applied.
    pub fn signed_amount(&self) -> Decimal {
        self.sign.apply(self.amount)
    }

    pub fn is_active(&self) -> bool {
        self.status == MovementStatus::Active
    }

    /// True for postings created by a reversal.
    pub fn is_reversal(&self) -> bool {
        self.reversed_of.is_some()
    }

    /// Build the offsetting posting for this movement.
    ///
    /// The result carries the same magnitude, payment type and origin with the
    /// opposite sign. `self` is not modified; see [`Movement::mark_reversed`].
    pub fn reversal(
        &self,
        sequence: u64,
        reason: &str,
        employee_id: EmployeeId,
    ) -> Result<Movement> {
        if !self.is_active() {
            return Err(CajaError::State(format!(
                "movement {} is already reversed",
                self.id
            )));
        }
        if self.is_reversal() {
            return Err(CajaError::State(format!(
                "movement {} is a reversal posting and cannot be reversed",
                self.id
            )));
        }

        let mut reversal = Movement::new(
            self.session_id,
            sequence,
            self.amount,
            self.sign.opposite(),
            self.origin,
            employee_id,
        )
        .with_description(format!("Reverso de #{}: {}", self.sequence, reason.trim()))
        .with_payment(self.payment_type_id, self.affects_cash)
        .with_movement_type(self.movement_type_id)
        .with_document(self.document.clone());

        reversal.kind = MovementKind::Reversal;
        reversal.reversed_of = Some(self.id);
        Ok(reversal)
    }

    /// Flag this movement as reversed by `reversal_id`.
    pub fn mark_reversed(&mut self, reversal_id: MovementId) -> Result<()> {
        if !self.is_active() {
            return Err(CajaError::State(format!(
                "movement {} is already reversed",
                self.id
            )));
        }
        self.status = MovementStatus::Reversed;
        self.reversed_by = Some(reversal_id);
        Ok(())
    }
}
