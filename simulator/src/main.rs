//! Caja Simulator
//!
//! Runs register shifts against the cash ledger, in memory or on PostgreSQL.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caja_ledger::{
    Catalog, InMemoryStore, LedgerConfig, LedgerEngine, LedgerStore, PgLedgerStore,
    StaticAccessGate,
};

mod controller;
mod metrics;
mod scenario;
mod till;

use controller::SimulationController;
use scenario::Scenario;

/// Caja Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Register shift simulator for the caja ledger")]
struct Args {
    /// Number of simulated registers
    #[arg(short, long, default_value = "3")]
    registers: usize,

    /// Scenario to run (reference-shift, reversal-audit, busy-day)
    #[arg(short, long, default_value = "reference-shift")]
    scenario: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Sales per register in randomized scenarios
    #[arg(long, default_value = "20")]
    sales: usize,

    /// Emit logs and the final report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = LedgerConfig::from_env();
    config.validate()?;

    info!("Starting Caja Simulator");
    info!("Registers: {}", args.registers);

    let cash_name = config.cash_payment_type.clone();
    let (store, catalog): (Arc<dyn LedgerStore>, Catalog) = if config.database_url.is_some() {
        let pg = PgLedgerStore::connect(&config).await?;
        pg.seed_catalog(&Catalog::with_defaults(cash_name.clone()))
            .await?;
        let catalog = pg.load_catalog(&cash_name).await?;
        info!("Using PostgreSQL store");
        let store: Arc<dyn LedgerStore> = Arc::new(pg);
        (store, catalog)
    } else {
        info!("Using in-memory store");
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryStore::new());
        (store, Catalog::with_defaults(cash_name))
    };

    let gate = Arc::new(StaticAccessGate::new());
    let engine = Arc::new(LedgerEngine::new(config, catalog, store, gate.clone()));

    let mut controller =
        SimulationController::new(Arc::clone(&engine), gate, args.registers, args.seed);
    controller.initialize()?;
    info!("Seed: {}", controller.seed());

    let scenario = Scenario::load(&args.scenario, args.sales)?;
    controller.run_scenario(scenario).await?;

    let metrics = controller.metrics().await;
    let ledger = engine.metrics().snapshot();

    if args.json {
        let report = serde_json::json!({
            "seed": controller.seed(),
            "scenario": args.scenario,
            "shifts": metrics.shifts,
            "operations": {
                "total": metrics.total_operations,
                "successful": metrics.successful_operations,
                "failed": metrics.failed_operations,
                "busy": metrics.busy_operations,
                "average_latency_ms": metrics.average_latency_ms(),
                "p99_latency_ms": metrics.p99_latency_ms(),
            },
            "net_difference": metrics.net_difference(),
            "ledger": ledger,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!("Simulation complete");
    for shift in &metrics.shifts {
        info!(
            register_id = %shift.register_id,
            cashier = %shift.cashier,
            system = %shift.system_amount,
            counted = %shift.counted_amount,
            difference = %shift.difference,
            movements = shift.movements,
            integrity_clean = shift.integrity_clean,
            "Shift closed"
        );
    }
    info!("Total operations: {}", metrics.total_operations);
    info!("Successful: {}", metrics.successful_operations);
    info!("Failed: {} ({} busy)", metrics.failed_operations, metrics.busy_operations);
    info!("Success rate: {:.2}%", metrics.success_rate() * 100.0);
    info!("Average latency: {}ms", metrics.average_latency_ms());
    info!("P99 latency: {}ms", metrics.p99_latency_ms());
    info!("Net difference: {}", metrics.net_difference());
    info!(
        "Ledger: {} sessions opened, {} closed ({} with difference), {} movements, {} reversals, {} rejected",
        ledger.sessions_opened,
        ledger.sessions_closed,
        ledger.sessions_closed_with_difference,
        ledger.movements_recorded,
        ledger.movements_reversed,
        ledger.rejected_total()
    );

    Ok(())
}
