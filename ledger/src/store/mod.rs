//! Persistence for sessions and movements.
//!
//! Every write method is one atomic unit of work: either all of its rows land
//! or none do. Stores re-check lifecycle preconditions and the posting count
//! inside that unit, so a write racing a close can never slip into a frozen
//! session, even when several engines share one store.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use caja_common::{MovementId, RegisterId, Result, SessionId};

use crate::movement::Movement;
use crate::session::RegisterSession;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a new open session together with its opening posting.
    ///
    /// Fails with `Conflict` when the register already has an open session.
    async fn insert_session(
        &self,
        session: &RegisterSession,
        opening: Option<&Movement>,
    ) -> Result<()>;

    async fn get_session(&self, id: SessionId) -> Result<Option<RegisterSession>>;

    /// The open session of a register, if any.
    async fn find_open_session(&self, register: &RegisterId) -> Result<Option<RegisterSession>>;

    /// Every session of a register, newest first.
    async fn list_sessions(&self, register: &RegisterId) -> Result<Vec<RegisterSession>>;

    async fn get_movement(&self, id: MovementId) -> Result<Option<Movement>>;

    /// Postings of a session in sequence order.
    async fn list_movements(&self, session: SessionId) -> Result<Vec<Movement>>;

    /// Number of postings of a session.
    async fn movement_count(&self, session: SessionId) -> Result<u64>;

    /// Append an active posting.
    ///
    /// Fails with `State` if the session is closed and `Busy` if the sequence
    /// number is not the next one, meaning another writer got there first.
    async fn append_movement(&self, movement: &Movement) -> Result<()>;

    /// Append `reversal` and flag `original` as reversed by it.
    ///
    /// Fails with `State` if the original is no longer active or its session
    /// is closed, and `Busy` if the reversal's sequence number is stale.
    async fn post_reversal(&self, original: MovementId, reversal: &Movement) -> Result<()>;

    /// Store the closing figures of `session`, computed over
    /// `expected_movements` postings.
    ///
    /// Fails with `State` unless the stored session is still open, and `Busy`
    /// if the session holds a different number of postings by now.
    async fn close_session(&self, session: &RegisterSession, expected_movements: u64) -> Result<()>;
}
