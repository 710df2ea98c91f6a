//! Caja Ledger Engine
//!
//! Register sessions and their append-only movement ledger: opening and
//! closing a till, signed postings, reversals and derived balances.

pub mod access;
pub mod balance;
pub mod catalog;
pub mod config;
pub mod digest;
pub mod engine;
pub mod history;
pub mod integrity;
pub mod lock;
pub mod metrics;
pub mod movement;
pub mod request;
pub mod session;
pub mod store;

pub use access::{AccessGate, Capability, CapabilitySet, Role, StaticAccessGate};
pub use balance::Balances;
pub use catalog::{Catalog, EmployeeProfile, EmployeeRef, MovementType, PaymentType};
pub use config::LedgerConfig;
pub use engine::LedgerEngine;
pub use history::{CajaEvent, CajaEventKind, HistoryEntry};
pub use integrity::{IntegrityReport, IntegrityViolation};
pub use metrics::{LedgerMetrics, MetricsSnapshot};
pub use movement::{DocumentRef, Movement, MovementKind, MovementStatus, Origin};
pub use request::{
    CloseSessionRequest, OpenSessionRequest, RecordMovementRequest, ReverseMovementRequest,
};
pub use session::{RegisterSession, SessionStatus};
pub use store::{InMemoryStore, LedgerStore, PgLedgerStore};
