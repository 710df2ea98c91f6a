//! Register session (caja) definitions.

use caja_common::{now, CajaError, EmployeeId, RegisterId, Result, SessionId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Register is open and accepts movements.
    Open,
    /// Register was counted and closed; the ledger is frozen.
    Closed,
}

impl SessionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Open)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[SessionStatus] {
        match self {
            SessionStatus::Open => &[SessionStatus::Closed],
            SessionStatus::Closed => &[],
        }
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(SessionStatus::Open),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(CajaError::Storage(format!("unknown session status: {}", other))),
        }
    }
}

/// Figures captured when a session is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closing {
    /// Physical cash count.
    pub counted_amount: Decimal,
    /// Cash balance according to the ledger.
    pub system_amount: Decimal,
    /// SHA-256 fingerprint of the frozen movement set.
    pub digest: String,
    pub employee_id: EmployeeId,
    pub notes: Option<String>,
}

/// One open-to-close working period of a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Physical register.
    pub register_id: RegisterId,
    /// Employee who opened the register.
    pub opened_by: EmployeeId,
    pub opened_at: Timestamp,
    /// Opening float.
    pub opening_amount: Decimal,
    pub closed_by: Option<EmployeeId>,
    pub closed_at: Option<Timestamp>,
    pub status: SessionStatus,
    /// Physical count at close.
    pub counted_amount: Option<Decimal>,
    /// Ledger cash balance at close.
    pub system_amount: Option<Decimal>,
    /// counted - system.
    pub difference: Option<Decimal>,
    pub notes: String,
    pub closing_digest: Option<String>,
}

impl RegisterSession {
    /// Start a new open session.
    pub fn open(register_id: RegisterId, opened_by: EmployeeId, opening_amount: Decimal) -> Self {
        Self {
            id: SessionId::new(),
            register_id,
            opened_by,
            opened_at: now(),
            opening_amount,
            closed_by: None,
            closed_at: None,
            status: SessionStatus::Open,
            counted_amount: None,
            system_amount: None,
            difference: None,
            notes: String::new(),
            closing_digest: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Fail with a state error unless the session accepts movements.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CajaError::State(format!(
                "session {} of register {} is closed",
                self.id, self.register_id
            )))
        }
    }

    /// Apply the closing figures. The session is left untouched on error.
    pub fn close(&mut self, closing: Closing) -> Result<()> {
        if !self.status.can_transition_to(SessionStatus::Closed) {
            return Err(CajaError::State(format!(
                "session {} is already closed",
                self.id
            )));
        }

        self.difference = Some(closing.counted_amount - closing.system_amount);
        self.counted_amount = Some(closing.counted_amount);
        self.system_amount = Some(closing.system_amount);
        self.closing_digest = Some(closing.digest);
        self.closed_by = Some(closing.employee_id);
        self.closed_at = Some(now());
        if let Some(notes) = closing.notes {
            self.notes = notes;
        }
        self.status = SessionStatus::Closed;
        Ok(())
    }
}
