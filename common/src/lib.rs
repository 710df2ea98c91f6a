//! Caja Common Types
//!
//! Shared types for the cash-register ledger: identifiers, monetary
//! helpers, the error taxonomy and time utilities.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
