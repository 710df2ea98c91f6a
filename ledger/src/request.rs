//! Request contracts submitted by the presentation layer.

use caja_common::{EmployeeId, MovementId, MovementTypeId, PaymentTypeId, RegisterId, SessionId, Sign};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::movement::DocumentRef;

/// Open a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    pub register_id: RegisterId,
    pub employee_id: EmployeeId,
    /// Opening float, `>= 0`.
    pub opening_amount: Decimal,
}

/// Append a posting to an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovementRequest {
    pub session_id: SessionId,
    /// Positive magnitude.
    pub amount: Decimal,
    pub sign: Sign,
    /// Origin tag as typed by the caller; normalized and checked by the engine.
    pub origin: String,
    #[serde(default)]
    pub payment_type_id: Option<PaymentTypeId>,
    #[serde(default)]
    pub movement_type_id: Option<MovementTypeId>,
    pub employee_id: EmployeeId,
    /// Account that keyed the posting when it differs from `employee_id`.
    #[serde(default)]
    pub created_by: Option<EmployeeId>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub document: Option<DocumentRef>,
}

impl RecordMovementRequest {
    pub fn new(
        session_id: SessionId,
        amount: Decimal,
        sign: Sign,
        origin: impl Into<String>,
        employee_id: EmployeeId,
    ) -> Self {
        Self {
            session_id,
            amount,
            sign,
            origin: origin.into(),
            payment_type_id: None,
            movement_type_id: None,
            employee_id,
            created_by: None,
            description: String::new(),
            document: None,
        }
    }

    pub fn with_payment_type(mut self, id: PaymentTypeId) -> Self {
        self.payment_type_id = Some(id);
        self
    }

    pub fn with_movement_type(mut self, id: MovementTypeId) -> Self {
        self.movement_type_id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_created_by(mut self, created_by: EmployeeId) -> Self {
        self.created_by = Some(created_by);
        self
    }
}

/// Reverse an active posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseMovementRequest {
    pub movement_id: MovementId,
    pub reason: String,
    pub employee_id: EmployeeId,
}

/// Close an open session against a physical count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub session_id: SessionId,
    /// Physical count, `>= 0`.
    pub counted_amount: Decimal,
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub notes: Option<String>,
}
