use std::collections::HashMap;

use async_trait::async_trait;
use caja_common::{CajaError, MovementId, RegisterId, Result, SessionId};
use parking_lot::RwLock;

use super::LedgerStore;
use crate::movement::Movement;
use crate::session::RegisterSession;

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<SessionId, RegisterSession>,
    open_by_register: HashMap<RegisterId, SessionId>,
    movements: HashMap<SessionId, Vec<Movement>>,
    /// Movement id -> (session, index into its vector).
    index: HashMap<MovementId, (SessionId, usize)>,
}

impl State {
    fn open_session(&self, id: SessionId) -> Result<&RegisterSession> {
        let session = self
            .sessions
            .get(&id)
            .ok_or_else(|| CajaError::not_found("session", id))?;
        session.ensure_open()?;
        Ok(session)
    }

    fn push(&mut self, movement: &Movement) -> Result<()> {
        let postings = self.movements.entry(movement.session_id).or_default();
        let expected = postings.len() as u64 + 1;
        if movement.sequence != expected {
            return Err(CajaError::busy());
        }
        self.index
            .insert(movement.id, (movement.session_id, postings.len()));
        postings.push(movement.clone());
        Ok(())
    }
}

/// Process-local store.
///
/// One write lock covers all state, so each write is atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn insert_session(
        &self,
        session: &RegisterSession,
        opening: Option<&Movement>,
    ) -> Result<()> {
        let mut state = self.state.write();

        if let Some(existing) = state.open_by_register.get(&session.register_id) {
            return Err(CajaError::Conflict(format!(
                "register {} already has open session {}",
                session.register_id, existing
            )));
        }

        if let Some(opening) = opening {
            if opening.session_id != session.id || opening.sequence != 1 {
                return Err(CajaError::Conflict(format!(
                    "opening posting {} does not start session {}",
                    opening.id, session.id
                )));
            }
        }

        state.sessions.insert(session.id, session.clone());
        state.movements.insert(session.id, Vec::new());
        if session.is_open() {
            state
                .open_by_register
                .insert(session.register_id.clone(), session.id);
        }
        if let Some(opening) = opening {
            state.push(opening)?;
        }
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<RegisterSession>> {
        Ok(self.state.read().sessions.get(&id).cloned())
    }

    async fn find_open_session(&self, register: &RegisterId) -> Result<Option<RegisterSession>> {
        let state = self.state.read();
        Ok(state
            .open_by_register
            .get(register)
            .and_then(|id| state.sessions.get(id))
            .cloned())
    }

    async fn list_sessions(&self, register: &RegisterId) -> Result<Vec<RegisterSession>> {
        let state = self.state.read();
        let mut sessions: Vec<RegisterSession> = state
            .sessions
            .values()
            .filter(|s| &s.register_id == register)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.opened_at.cmp(&a.opened_at).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn get_movement(&self, id: MovementId) -> Result<Option<Movement>> {
        let state = self.state.read();
        Ok(state
            .index
            .get(&id)
            .and_then(|(session, idx)| state.movements.get(session)?.get(*idx))
            .cloned())
    }

    async fn list_movements(&self, session: SessionId) -> Result<Vec<Movement>> {
        Ok(self
            .state
            .read()
            .movements
            .get(&session)
            .cloned()
            .unwrap_or_default())
    }

    async fn movement_count(&self, session: SessionId) -> Result<u64> {
        Ok(self
            .state
            .read()
            .movements
            .get(&session)
            .map_or(0, |m| m.len() as u64))
    }

    async fn append_movement(&self, movement: &Movement) -> Result<()> {
        let mut state = self.state.write();
        state.open_session(movement.session_id)?;
        state.push(movement)
    }

    async fn post_reversal(&self, original: MovementId, reversal: &Movement) -> Result<()> {
        let mut state = self.state.write();

        let (session_id, idx) = *state
            .index
            .get(&original)
            .ok_or_else(|| CajaError::not_found("movement", original))?;
        state.open_session(session_id)?;

        // Check the original before touching anything so a failed push leaves
        // no half-written pair.
        let target = state
            .movements
            .get(&session_id)
            .and_then(|m| m.get(idx))
            .cloned()
            .ok_or_else(|| CajaError::not_found("movement", original))?;
        let mut flagged = target;
        flagged.mark_reversed(reversal.id)?;

        state.push(reversal)?;
        if let Some(slot) = state.movements.get_mut(&session_id).and_then(|m| m.get_mut(idx)) {
            *slot = flagged;
        }
        Ok(())
    }

    async fn close_session(&self, session: &RegisterSession, expected_movements: u64) -> Result<()> {
        let mut state = self.state.write();
        state.open_session(session.id)?;

        let stored = state.movements.get(&session.id).map_or(0, |m| m.len() as u64);
        if stored != expected_movements {
            return Err(CajaError::busy());
        }

        state.open_by_register.remove(&session.register_id);
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }
}
