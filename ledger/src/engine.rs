//! Core ledger engine implementation.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use caja_common::{
    validate_amount, CajaError, EmployeeId, MovementId, RegisterId, Result, SessionId, Sign,
};

use crate::access::{AccessGate, Capability};
use crate::balance::{cash_balance, Balances};
use crate::catalog::Catalog;
use crate::config::LedgerConfig;
use crate::digest::closing_digest;
use crate::history::{build_history, HistoryEntry};
use crate::integrity::{verify, IntegrityReport};
use crate::lock::KeyedLocks;
use crate::metrics::LedgerMetrics;
use crate::movement::{Movement, Origin};
use crate::request::{
    CloseSessionRequest, OpenSessionRequest, RecordMovementRequest, ReverseMovementRequest,
};
use crate::session::{Closing, RegisterSession};
use crate::store::{InMemoryStore, LedgerStore};

/// The ledger engine owns the session lifecycle and the movement ledger.
///
/// Every state-changing operation runs under an exclusive per-session lock
/// (per-register for opening), bounded by `lock_timeout`.
pub struct LedgerEngine {
    config: LedgerConfig,
    catalog: Arc<Catalog>,
    store: Arc<dyn LedgerStore>,
    gate: Arc<dyn AccessGate>,
    session_locks: KeyedLocks<SessionId>,
    register_locks: KeyedLocks<RegisterId>,
    metrics: Arc<LedgerMetrics>,
}

impl LedgerEngine {
    /// Create a new ledger engine.
    pub fn new(
        config: LedgerConfig,
        catalog: Catalog,
        store: Arc<dyn LedgerStore>,
        gate: Arc<dyn AccessGate>,
    ) -> Self {
        Self {
            session_locks: KeyedLocks::new(config.lock_timeout),
            register_locks: KeyedLocks::new(config.lock_timeout),
            catalog: Arc::new(catalog),
            config,
            store,
            gate,
            metrics: Arc::new(LedgerMetrics::new()),
        }
    }

    /// Engine over an [`InMemoryStore`] and the default catalog.
    pub fn in_memory(config: LedgerConfig, gate: Arc<dyn AccessGate>) -> Self {
        let catalog = Catalog::with_defaults(config.cash_payment_type.clone());
        Self::new(config, catalog, Arc::new(InMemoryStore::new()), gate)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn metrics(&self) -> Arc<LedgerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Open a register.
    ///
    /// A positive opening amount is posted as an `APERTURA` cash movement so
    /// the balance fold starts from the float.
    #[instrument(skip(self, request), fields(register_id = %request.register_id, amount = %request.opening_amount))]
    pub async fn open_session(&self, request: OpenSessionRequest) -> Result<RegisterSession> {
        let result = self.try_open_session(request).await;
        self.observe(result)
    }

    async fn try_open_session(&self, request: OpenSessionRequest) -> Result<RegisterSession> {
        if !request.register_id.is_valid() {
            return Err(CajaError::validation(
                format!("invalid register id: {:?}", request.register_id.as_str()),
                "register_id",
            ));
        }
        validate_employee(&request.employee_id, "employee_id")?;
        let opening_amount = validate_amount(
            request.opening_amount,
            &self.config.currency,
            "opening_amount",
            true,
        )?;

        let _guard = self.register_locks.acquire(&request.register_id).await?;

        if let Some(open) = self.store.find_open_session(&request.register_id).await? {
            return Err(CajaError::Conflict(format!(
                "register {} already has open session {}",
                request.register_id, open.id
            )));
        }

        let session = RegisterSession::open(
            request.register_id,
            request.employee_id.clone(),
            opening_amount,
        );

        let opening = (opening_amount > Decimal::ZERO).then(|| {
            Movement::new(
                session.id,
                1,
                opening_amount,
                Sign::Inflow,
                Origin::Apertura,
                request.employee_id,
            )
            .with_description("Apertura de caja")
            .with_payment(self.catalog.cash_payment_type().map(|p| p.id), true)
        });

        self.store.insert_session(&session, opening.as_ref()).await?;
        self.metrics.session_opened();

        info!(
            session_id = %session.id,
            register_id = %session.register_id,
            opened_by = %session.opened_by,
            "Register opened"
        );

        Ok(session)
    }

    /// Append a movement to an open session.
    #[instrument(skip(self, request), fields(session_id = %request.session_id, amount = %request.amount, sign = %request.sign))]
    pub async fn record_movement(&self, request: RecordMovementRequest) -> Result<Movement> {
        let result = self.try_record_movement(request).await;
        self.observe(result)
    }

    async fn try_record_movement(&self, request: RecordMovementRequest) -> Result<Movement> {
        let origin = Origin::parse(&request.origin)?;
        let amount = validate_amount(request.amount, &self.config.currency, "amount", false)?;
        let affects_cash = self.catalog.resolve_payment(request.payment_type_id)?;
        self.catalog.resolve_movement_type(request.movement_type_id)?;
        validate_employee(&request.employee_id, "employee_id")?;
        if let Some(created_by) = &request.created_by {
            validate_employee(created_by, "created_by")?;
        }

        let session = self.load_session(request.session_id).await?;
        self.authorize(&request.employee_id, &session.register_id)
            .await?;

        let _guard = self.session_locks.acquire(&session.id).await?;
        self.load_session(session.id).await?.ensure_open()?;

        // Another engine on the same store may take this number first; the
        // store then answers `Busy`.
        let sequence = self.store.movement_count(session.id).await? + 1;
        let created_by = request
            .created_by
            .unwrap_or_else(|| request.employee_id.clone());
        let movement = Movement::new(
            session.id,
            sequence,
            amount,
            request.sign,
            origin,
            request.employee_id,
        )
        .with_description(request.description.trim())
        .with_payment(request.payment_type_id, affects_cash)
        .with_movement_type(request.movement_type_id)
        .with_document(request.document)
        .with_created_by(created_by);

        self.store.append_movement(&movement).await?;
        self.metrics.movement_recorded();

        info!(
            session_id = %movement.session_id,
            movement_id = %movement.id,
            sequence = movement.sequence,
            origin = %movement.origin,
            signed_amount = %movement.signed_amount(),
            affects_cash = movement.affects_cash,
            "Movement recorded"
        );

        Ok(movement)
    }

    /// Reverse an active movement. Returns the new offsetting posting.
    #[instrument(skip(self, request), fields(movement_id = %request.movement_id))]
    pub async fn reverse_movement(&self, request: ReverseMovementRequest) -> Result<Movement> {
        let result = self.try_reverse_movement(request).await;
        self.observe(result)
    }

    async fn try_reverse_movement(&self, request: ReverseMovementRequest) -> Result<Movement> {
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(CajaError::validation("a reversal needs a reason", "reason"));
        }
        validate_employee(&request.employee_id, "employee_id")?;

        let original = self.load_movement(request.movement_id).await?;
        let session = self.load_session(original.session_id).await?;
        self.authorize(&request.employee_id, &session.register_id)
            .await?;

        let _guard = self.session_locks.acquire(&session.id).await?;
        self.load_session(session.id).await?.ensure_open()?;
        let original = self.load_movement(original.id).await?;

        let sequence = self.store.movement_count(session.id).await? + 1;
        let reversal = original.reversal(sequence, reason, request.employee_id)?;

        self.store.post_reversal(original.id, &reversal).await?;
        self.metrics.movement_reversed();

        info!(
            session_id = %session.id,
            original = %original.id,
            reversal = %reversal.id,
            amount = %reversal.signed_amount(),
            reason,
            "Movement reversed"
        );

        Ok(reversal)
    }

    /// Close an open session against a physical count.
    #[instrument(skip(self, request), fields(session_id = %request.session_id, counted = %request.counted_amount))]
    pub async fn close_session(&self, request: CloseSessionRequest) -> Result<RegisterSession> {
        let result = self.try_close_session(request).await;
        self.observe(result)
    }

    async fn try_close_session(&self, request: CloseSessionRequest) -> Result<RegisterSession> {
        let counted_amount = validate_amount(
            request.counted_amount,
            &self.config.currency,
            "counted_amount",
            true,
        )?;
        validate_employee(&request.employee_id, "employee_id")?;

        let session = self.load_session(request.session_id).await?;
        self.authorize(&request.employee_id, &session.register_id)
            .await?;

        let guard = self.session_locks.acquire(&session.id).await?;
        let mut session = self.load_session(session.id).await?;
        session.ensure_open()?;

        let movements = self.store.list_movements(session.id).await?;
        let system_amount = cash_balance(&movements);
        let digest = closing_digest(session.id, &movements);

        session.close(Closing {
            counted_amount,
            system_amount,
            digest,
            employee_id: request.employee_id,
            notes: request
                .notes
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        })?;

        self.store
            .close_session(&session, movements.len() as u64)
            .await?;
        drop(guard);
        self.session_locks.prune();

        let difference = session.difference.unwrap_or_default();
        self.metrics.session_closed(!difference.is_zero());

        if !difference.is_zero() && self.config.warn_on_close_difference {
            warn!(
                session_id = %session.id,
                register_id = %session.register_id,
                counted = %counted_amount,
                system = %system_amount,
                difference = %difference,
                "Register closed with a difference"
            );
        } else {
            info!(
                session_id = %session.id,
                register_id = %session.register_id,
                counted = %counted_amount,
                movements = movements.len(),
                "Register closed"
            );
        }

        Ok(session)
    }

    /// Total, cash and current balances of a session.
    pub async fn get_balances(&self, session_id: SessionId) -> Result<Balances> {
        let session = self.load_session(session_id).await?;
        let movements = self.store.list_movements(session_id).await?;
        Ok(Balances::compute(&session, &movements))
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<RegisterSession> {
        self.load_session(session_id).await
    }

    /// The open session of a register, if any.
    pub async fn current_session(&self, register_id: &RegisterId) -> Result<Option<RegisterSession>> {
        self.store.find_open_session(register_id).await
    }

    /// Every session of a register, newest first.
    pub async fn sessions_for_register(
        &self,
        register_id: &RegisterId,
    ) -> Result<Vec<RegisterSession>> {
        self.store.list_sessions(register_id).await
    }

    /// Postings of a session in recording order.
    pub async fn list_movements(&self, session_id: SessionId) -> Result<Vec<Movement>> {
        self.load_session(session_id).await?;
        self.store.list_movements(session_id).await
    }

    pub async fn get_movement(&self, movement_id: MovementId) -> Result<Movement> {
        self.load_movement(movement_id).await
    }

    /// Opening and closing events merged with the postings, oldest first.
    pub async fn history(&self, session_id: SessionId) -> Result<Vec<HistoryEntry>> {
        let session = self.load_session(session_id).await?;
        let movements = self.store.list_movements(session_id).await?;
        Ok(build_history(&session, &movements))
    }

    /// Check reversal links, balances and, for closed sessions, the frozen
    /// closing figures.
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self, session_id: SessionId) -> Result<IntegrityReport> {
        let session = self.load_session(session_id).await?;
        let movements = self.store.list_movements(session_id).await?;
        let report = verify(&session, &movements);

        if report.is_clean() {
            debug!(checked = report.checked_movements, "Ledger verified");
        } else {
            warn!(
                violations = report.violations.len(),
                "Ledger integrity violations found"
            );
        }

        Ok(report)
    }

    async fn load_session(&self, id: SessionId) -> Result<RegisterSession> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| CajaError::not_found("session", id))
    }

    async fn load_movement(&self, id: MovementId) -> Result<Movement> {
        self.store
            .get_movement(id)
            .await?
            .ok_or_else(|| CajaError::not_found("movement", id))
    }

    async fn authorize(&self, employee: &EmployeeId, register: &RegisterId) -> Result<()> {
        if self.gate.can_record_movements(employee, register).await? {
            Ok(())
        } else {
            Err(CajaError::Permission {
                employee: employee.clone(),
                capability: Capability::CashMovements.to_string(),
            })
        }
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.metrics.rejected(err);
            if err.is_retryable() {
                warn!(code = err.error_code(), error = %err, "Operation failed");
            } else {
                debug!(code = err.error_code(), error = %err, "Operation rejected");
            }
        }
        result
    }
}

fn validate_employee(employee: &EmployeeId, field: &str) -> Result<()> {
    if employee.is_valid() {
        Ok(())
    } else {
        Err(CajaError::validation(
            format!("invalid employee id: {:?}", employee.as_str()),
            field,
        ))
    }
}
