//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use caja_common::{CajaError, EmployeeId, MovementId, PaymentTypeId, SessionId, Sign};
use caja_ledger::{
    Capability, CapabilitySet, CloseSessionRequest, LedgerEngine, Movement, OpenSessionRequest,
    RecordMovementRequest, RegisterSession, ReverseMovementRequest, StaticAccessGate,
};

use crate::metrics::{ShiftSummary, SimulationMetrics};
use crate::scenario::{Scenario, ShiftStep, Tender};
use crate::till::{SimulatedTill, TillFactory};

/// Retries after a busy session before giving up.
const MAX_BUSY_RETRIES: u32 = 3;

/// Metered access to the ledger engine.
///
/// Busy rejections are retried after the suggested back-off; every other
/// error is returned as is.
#[derive(Clone)]
struct LedgerClient {
    engine: Arc<LedgerEngine>,
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl LedgerClient {
    async fn observe<T>(&self, started: Instant, result: Result<T, CajaError>) -> Result<T, CajaError> {
        let mut metrics = self.metrics.write().await;
        match &result {
            Ok(_) => metrics.record_success(started.elapsed().as_millis() as u64),
            Err(err) => metrics.record_failure(matches!(err, CajaError::Busy { .. })),
        }
        result
    }

    async fn open(&self, request: OpenSessionRequest) -> Result<RegisterSession, CajaError> {
        let started = Instant::now();
        let result = self.engine.open_session(request).await;
        self.observe(started, result).await
    }

    async fn record(&self, request: RecordMovementRequest) -> Result<Movement, CajaError> {
        let mut attempts = 0;
        loop {
            let started = Instant::now();
            let result = self.engine.record_movement(request.clone()).await;
            match self.observe(started, result).await {
                Err(CajaError::Busy { retry_after_ms }) if attempts < MAX_BUSY_RETRIES => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                }
                other => return other,
            }
        }
    }

    async fn reverse(&self, request: ReverseMovementRequest) -> Result<Movement, CajaError> {
        let mut attempts = 0;
        loop {
            let started = Instant::now();
            let result = self.engine.reverse_movement(request.clone()).await;
            match self.observe(started, result).await {
                Err(CajaError::Busy { retry_after_ms }) if attempts < MAX_BUSY_RETRIES => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                }
                other => return other,
            }
        }
    }

    async fn close(&self, request: CloseSessionRequest) -> Result<RegisterSession, CajaError> {
        let started = Instant::now();
        let result = self.engine.close_session(request).await;
        self.observe(started, result).await
    }
}

/// Payment types used for each tender.
#[derive(Debug, Clone, Copy)]
struct Tenders {
    cash: PaymentTypeId,
    card: PaymentTypeId,
}

impl Tenders {
    fn resolve(engine: &LedgerEngine) -> anyhow::Result<Self> {
        let catalog = engine.catalog();
        let cash = catalog
            .cash_payment_type()
            .map(|p| p.id)
            .ok_or_else(|| anyhow::anyhow!("catalog has no cash payment type"))?;
        let card = catalog
            .payment_types()
            .filter(|p| !p.is_cash(catalog.cash_name()))
            .map(|p| p.id)
            .min_by_key(|id| id.0)
            .ok_or_else(|| anyhow::anyhow!("catalog has no non-cash payment type"))?;
        Ok(Self { cash, card })
    }

    fn for_tender(&self, tender: Tender) -> PaymentTypeId {
        match tender {
            Tender::Cash => self.cash,
            Tender::Card => self.card,
        }
    }
}

/// Controls the simulation.
pub struct SimulationController {
    /// Number of registers.
    register_count: usize,
    /// Base seed; each till derives its own.
    seed: u64,
    engine: Arc<LedgerEngine>,
    gate: Arc<StaticAccessGate>,
    /// Simulated tills.
    tills: Vec<SimulatedTill>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(
        engine: Arc<LedgerEngine>,
        gate: Arc<StaticAccessGate>,
        register_count: usize,
        seed: Option<u64>,
    ) -> Self {
        Self {
            register_count,
            seed: seed.unwrap_or_else(rand::random),
            engine,
            gate,
            tills: Vec::new(),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Create the tills and grant each cashier its own register.
    pub fn initialize(&mut self) -> anyhow::Result<()> {
        if self.register_count == 0 {
            anyhow::bail!("at least one register is required");
        }

        info!("Initializing simulation with {} registers", self.register_count);

        let tills = TillFactory::create_tills(self.register_count);
        for till in &tills {
            self.gate.grant_employee(
                till.cashier_id().clone(),
                CapabilitySet::employee_default().with(Capability::CashMovements),
                Some(vec![till.register_id.clone()]),
            );
            info!(
                register_id = %till.register_id,
                cashier = %till.cashier.display_name(),
                "Till ready"
            );
        }

        self.tills = tills;
        Ok(())
    }

    /// Run one shift of `scenario` on every till concurrently.
    pub async fn run_scenario(&mut self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        let tenders = Tenders::resolve(&self.engine)?;
        let client = LedgerClient {
            engine: Arc::clone(&self.engine),
            metrics: Arc::clone(&self.metrics),
        };

        let shifts = std::mem::take(&mut self.tills)
            .into_iter()
            .enumerate()
            .map(|(i, till)| {
                let runner = ShiftRunner {
                    client: client.clone(),
                    tenders,
                    rng: StdRng::seed_from_u64(self.seed.wrapping_add(i as u64)),
                    steps: scenario.steps.clone(),
                    last_session: None,
                };
                tokio::spawn(runner.run(till))
            });

        for result in join_all(shifts).await {
            let (till, summary) = result??;
            if let Some(summary) = summary {
                self.metrics.write().await.record_shift(summary);
            }
            self.tills.push(till);
        }

        Ok(())
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}

/// Runs one till through the scenario steps.
struct ShiftRunner {
    client: LedgerClient,
    tenders: Tenders,
    rng: StdRng,
    steps: Vec<ShiftStep>,
    last_session: Option<SessionId>,
}

impl ShiftRunner {
    async fn run(
        mut self,
        mut till: SimulatedTill,
    ) -> anyhow::Result<(SimulatedTill, Option<ShiftSummary>)> {
        let steps = std::mem::take(&mut self.steps);
        for step in &steps {
            self.execute_step(&mut till, step).await?;
        }

        let summary = match self.last_session {
            Some(session_id) => Some(self.summarize(&till, session_id).await?),
            None => None,
        };
        Ok((till, summary))
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, till: &mut SimulatedTill, step: &ShiftStep) -> anyhow::Result<()> {
        match step {
            ShiftStep::Open { amount } => {
                let amount: Decimal = amount.parse()?;
                let session = self
                    .client
                    .open(OpenSessionRequest {
                        register_id: till.register_id.clone(),
                        employee_id: till.cashier_id().clone(),
                        opening_amount: amount,
                    })
                    .await?;
                till.opened(session.id, amount);
                self.last_session = Some(session.id);
            }
            ShiftStep::Sale { amount, tender } => {
                let payment = self.tenders.for_tender(*tender);
                self.post(till, amount.parse()?, Sign::Inflow, "VENTA", payment, "Venta")
                    .await;
            }
            ShiftStep::Refund { amount } => {
                let cash = self.tenders.cash;
                self.post(till, amount.parse()?, Sign::Outflow, "DEVOLUCION", cash, "Devolución")
                    .await;
            }
            ShiftStep::Purchase { amount } => {
                let cash = self.tenders.cash;
                self.post(till, amount.parse()?, Sign::Outflow, "COMPRA", cash, "Pago a proveedor")
                    .await;
            }
            ShiftStep::ReverseLast { reason } => match till.last_reversible() {
                Some(movement_id) => {
                    let request = ReverseMovementRequest {
                        movement_id,
                        reason: reason.clone(),
                        employee_id: till.cashier_id().clone(),
                    };
                    match self.client.reverse(request).await {
                        Ok(_) => till.reversed(movement_id),
                        Err(e) => warn!(register_id = %till.register_id, error = %e, "Reversal rejected"),
                    }
                }
                None => warn!(register_id = %till.register_id, "Nothing to reverse"),
            },
            ShiftStep::RandomSales {
                count,
                lanes,
                min_cents,
                max_cents,
                reversal_pct,
            } => {
                let session_id = till
                    .session()
                    .ok_or_else(|| anyhow::anyhow!("{} has no open session", till.register_id))?;
                let lanes = (*lanes).max(1);

                let handles = (0..lanes).map(|lane| {
                    let sales = count / lanes + usize::from(lane < count % lanes);
                    let runner = LaneRunner {
                        client: self.client.clone(),
                        session_id,
                        cashier: till.cashier_id().clone(),
                        tenders: self.tenders,
                        rng: StdRng::seed_from_u64(self.rng.gen()),
                        cents: (*min_cents, (*max_cents).max(*min_cents)),
                        reversal_pct: *reversal_pct,
                    };
                    tokio::spawn(runner.run(sales))
                });

                for outcome in join_all(handles).await {
                    let outcome = outcome?;
                    for movement in &outcome.posted {
                        till.posted(movement);
                    }
                    for id in outcome.reversed {
                        till.reversed(id);
                    }
                }
            }
            ShiftStep::VerifyIntegrity => {
                if let Some(session_id) = self.last_session {
                    let report = self.client.engine.verify_integrity(session_id).await?;
                    if report.is_clean() {
                        info!(register_id = %till.register_id, checked = report.checked_movements, "Ledger verified");
                    } else {
                        warn!(register_id = %till.register_id, violations = ?report.violations, "Ledger integrity violations");
                    }
                }
            }
            ShiftStep::Close {
                max_discrepancy_cents,
            } => {
                let session_id = till
                    .session()
                    .ok_or_else(|| anyhow::anyhow!("{} has no open session", till.register_id))?;

                let miscount = if *max_discrepancy_cents > 0 {
                    Decimal::new(
                        self.rng
                            .gen_range(-*max_discrepancy_cents..=*max_discrepancy_cents),
                        2,
                    )
                } else {
                    Decimal::ZERO
                };
                let counted = (till.drawer() + miscount).max(Decimal::ZERO);

                let closed = self
                    .client
                    .close(CloseSessionRequest {
                        session_id,
                        counted_amount: counted,
                        employee_id: till.cashier_id().clone(),
                        notes: (!miscount.is_zero()).then(|| "recuento manual".to_string()),
                    })
                    .await?;
                till.closed();

                info!(
                    register_id = %till.register_id,
                    cashier = %till.cashier.display_name(),
                    system = %closed.system_amount.unwrap_or_default(),
                    counted = %counted,
                    difference = %closed.difference.unwrap_or_default(),
                    "Shift closed"
                );
            }
        }

        Ok(())
    }

    /// Record a posting; rejections are logged and the shift goes on.
    async fn post(
        &mut self,
        till: &mut SimulatedTill,
        amount: Decimal,
        sign: Sign,
        origin: &str,
        payment: PaymentTypeId,
        description: &str,
    ) {
        let Some(session_id) = till.session() else {
            warn!(register_id = %till.register_id, "No open session");
            return;
        };

        let request = RecordMovementRequest::new(
            session_id,
            amount,
            sign,
            origin,
            till.cashier_id().clone(),
        )
        .with_payment_type(payment)
        .with_description(description);

        match self.client.record(request).await {
            Ok(movement) => till.posted(&movement),
            Err(e) => warn!(register_id = %till.register_id, error = %e, "Movement rejected"),
        }
    }

    async fn summarize(&self, till: &SimulatedTill, session_id: SessionId) -> anyhow::Result<ShiftSummary> {
        let engine = &self.client.engine;
        let session = engine.get_session(session_id).await?;
        let balances = engine.get_balances(session_id).await?;
        let report = engine.verify_integrity(session_id).await?;

        Ok(ShiftSummary {
            register_id: till.register_id.to_string(),
            cashier: till.cashier.display_name(),
            session_id: session_id.to_string(),
            opening: session.opening_amount,
            system_amount: session.system_amount.unwrap_or(balances.cash),
            counted_amount: session.counted_amount.unwrap_or(balances.current),
            difference: session.difference.unwrap_or_default(),
            movements: balances.movement_count,
            integrity_clean: report.is_clean(),
        })
    }
}

/// What one lane managed to post.
struct LaneOutcome {
    posted: Vec<Movement>,
    reversed: Vec<MovementId>,
}

/// One cashier lane recording random sales on a shared session.
struct LaneRunner {
    client: LedgerClient,
    session_id: SessionId,
    cashier: EmployeeId,
    tenders: Tenders,
    rng: StdRng,
    cents: (i64, i64),
    reversal_pct: u32,
}

impl LaneRunner {
    async fn run(mut self, sales: usize) -> LaneOutcome {
        let mut outcome = LaneOutcome {
            posted: Vec::with_capacity(sales),
            reversed: Vec::new(),
        };

        for _ in 0..sales {
            let amount = Decimal::new(self.rng.gen_range(self.cents.0..=self.cents.1), 2);
            let payment = if self.rng.gen_bool(0.6) {
                self.tenders.cash
            } else {
                self.tenders.card
            };

            let request = RecordMovementRequest::new(
                self.session_id,
                amount,
                Sign::Inflow,
                "VENTA",
                self.cashier.clone(),
            )
            .with_payment_type(payment)
            .with_description("Venta");

            let movement = match self.client.record(request).await {
                Ok(movement) => movement,
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "Sale rejected");
                    continue;
                }
            };

            let reverse = self.rng.gen_range(0..100) < self.reversal_pct;
            outcome.posted.push(movement.clone());

            if reverse {
                let request = ReverseMovementRequest {
                    movement_id: movement.id,
                    reason: "anulación en caja".to_string(),
                    employee_id: self.cashier.clone(),
                };
                match self.client.reverse(request).await {
                    Ok(_) => outcome.reversed.push(movement.id),
                    Err(e) => warn!(movement_id = %movement.id, error = %e, "Reversal rejected"),
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caja_ledger::LedgerConfig;

    fn controller(registers: usize) -> SimulationController {
        let gate = Arc::new(StaticAccessGate::new());
        let engine = Arc::new(LedgerEngine::in_memory(
            LedgerConfig::default(),
            gate.clone(),
        ));
        SimulationController::new(engine, gate, registers, Some(7))
    }

    #[tokio::test]
    async fn test_reference_shift_closes_even() {
        let mut controller = controller(2);
        controller.initialize().unwrap();
        controller
            .run_scenario(Scenario::load("reference-shift", 0).unwrap())
            .await
            .unwrap();

        let metrics = controller.metrics().await;
        assert_eq!(metrics.shifts.len(), 2);
        for shift in &metrics.shifts {
            assert_eq!(shift.system_amount, Decimal::new(115000, 2));
            assert!(shift.difference.is_zero());
            assert!(shift.integrity_clean);
        }
        assert_eq!(metrics.failed_operations, 0);
    }

    #[tokio::test]
    async fn test_reversal_audit_nets_out() {
        let mut controller = controller(1);
        controller.initialize().unwrap();
        controller
            .run_scenario(Scenario::load("reversal-audit", 0).unwrap())
            .await
            .unwrap();

        let metrics = controller.metrics().await;
        let shift = &metrics.shifts[0];
        // 500 + 120 + 60 - 60 - 50; the card sale and its reversal stay off the drawer.
        assert_eq!(shift.system_amount, Decimal::new(57000, 2));
        assert!(shift.integrity_clean);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_busy_day_is_consistent() {
        let mut controller = controller(3);
        controller.initialize().unwrap();
        controller
            .run_scenario(Scenario::load("busy-day", 40).unwrap())
            .await
            .unwrap();

        let metrics = controller.metrics().await;
        assert_eq!(metrics.shifts.len(), 3);
        for shift in &metrics.shifts {
            assert!(shift.integrity_clean);
            assert_eq!(shift.difference, shift.counted_amount - shift.system_amount);
        }
    }

    #[test]
    fn test_zero_registers_rejected() {
        assert!(controller(0).initialize().is_err());
    }
}
