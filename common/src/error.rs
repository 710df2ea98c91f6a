//! Error types for caja ledger operations.

use thiserror::Error;

use crate::EmployeeId;

/// Main error type for caja ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CajaError {
    /// Malformed input (non-positive amount, unknown origin tag, ...).
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Operation not valid for the current lifecycle state.
    #[error("Invalid state: {0}")]
    State(String),

    /// Uniqueness violation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller lacks the capability required by the operation.
    #[error("Permission denied: {employee} lacks {capability}")]
    Permission {
        employee: EmployeeId,
        capability: String,
    },

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Another operation holds the session; nothing was changed.
    #[error("Resource busy, retry after {retry_after_ms}ms")]
    Busy { retry_after_ms: u64 },

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CajaError {
    /// Validation error with the offending field attached.
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        CajaError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CajaError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Retryable contention with the default back-off.
    pub fn busy() -> Self {
        CajaError::Busy {
            retry_after_ms: crate::constants::busy_retry_after().num_milliseconds() as u64,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CajaError::Busy { .. } | CajaError::Storage(_))
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            CajaError::Busy { retry_after_ms } => Some(*retry_after_ms),
            CajaError::Storage(_) => Some(500),
            _ => None,
        }
    }

    /// Stable error code for the presentation layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            CajaError::Validation { .. } => "VALIDATION_ERROR",
            CajaError::State(_) => "STATE_ERROR",
            CajaError::Conflict(_) => "CONFLICT_ERROR",
            CajaError::Permission { .. } => "PERMISSION_ERROR",
            CajaError::NotFound { .. } => "NOT_FOUND",
            CajaError::Busy { .. } => "BUSY",
            CajaError::Storage(_) => "STORAGE_ERROR",
            CajaError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Field that caused a validation failure, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            CajaError::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for caja ledger operations.
pub type Result<T> = std::result::Result<T, CajaError>;
