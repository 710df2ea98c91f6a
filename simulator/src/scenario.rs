//! Simulation scenarios.
//!
//! A scenario is the script every till runs for one shift.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps of one shift.
    pub steps: Vec<ShiftStep>,
}

/// How a customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tender {
    Cash,
    Card,
}

/// A step in a shift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShiftStep {
    /// Open the register with a float.
    Open { amount: String },
    /// Sell goods.
    Sale { amount: String, tender: Tender },
    /// Refund a customer in cash.
    Refund { amount: String },
    /// Pay a supplier from the drawer.
    Purchase { amount: String },
    /// Reverse the most recent posting still in effect.
    ReverseLast { reason: String },
    /// Random sales recorded by `lanes` concurrent cashiers on the same session.
    RandomSales {
        count: usize,
        lanes: usize,
        min_cents: i64,
        max_cents: i64,
        /// Chance in percent that a sale is reversed right after.
        reversal_pct: u32,
    },
    /// Check the session ledger.
    VerifyIntegrity,
    /// Count the drawer and close. `max_discrepancy_cents` bounds a random
    /// miscount; zero means an exact count.
    Close { max_discrepancy_cents: i64 },
}

impl Scenario {
    /// Load a scenario by name. `sales` sizes the randomized scenarios.
    pub fn load(name: &str, sales: usize) -> anyhow::Result<Self> {
        match name {
            "reference-shift" => Ok(Self::reference_shift()),
            "reversal-audit" => Ok(Self::reversal_audit()),
            "busy-day" => Ok(Self::busy_day(sales)),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Open 1000.00, one cash sale, one cash refund, exact count.
    fn reference_shift() -> Self {
        Self {
            name: "reference-shift".to_string(),
            description: "Open, sell, refund and close with an exact count".to_string(),
            steps: vec![
                ShiftStep::Open {
                    amount: "1000.00".to_string(),
                },
                ShiftStep::Sale {
                    amount: "250.00".to_string(),
                    tender: Tender::Cash,
                },
                ShiftStep::Refund {
                    amount: "100.00".to_string(),
                },
                ShiftStep::Close {
                    max_discrepancy_cents: 0,
                },
            ],
        }
    }

    /// Mixed tenders with reversals and an integrity check before closing.
    fn reversal_audit() -> Self {
        Self {
            name: "reversal-audit".to_string(),
            description: "Reverse cash and card sales, then audit the ledger".to_string(),
            steps: vec![
                ShiftStep::Open {
                    amount: "500.00".to_string(),
                },
                ShiftStep::Sale {
                    amount: "120.00".to_string(),
                    tender: Tender::Cash,
                },
                ShiftStep::Sale {
                    amount: "80.00".to_string(),
                    tender: Tender::Card,
                },
                ShiftStep::ReverseLast {
                    reason: "cobro duplicado".to_string(),
                },
                ShiftStep::Sale {
                    amount: "60.00".to_string(),
                    tender: Tender::Cash,
                },
                ShiftStep::ReverseLast {
                    reason: "producto equivocado".to_string(),
                },
                ShiftStep::Purchase {
                    amount: "50.00".to_string(),
                },
                ShiftStep::VerifyIntegrity,
                ShiftStep::Close {
                    max_discrepancy_cents: 0,
                },
                ShiftStep::VerifyIntegrity,
            ],
        }
    }

    /// Many random sales from two lanes on the same register, then an
    /// imperfect count.
    fn busy_day(sales: usize) -> Self {
        Self {
            name: "busy-day".to_string(),
            description: "High volume with concurrent lanes and miscounts".to_string(),
            steps: vec![
                ShiftStep::Open {
                    amount: "2000.00".to_string(),
                },
                ShiftStep::RandomSales {
                    count: sales,
                    lanes: 2,
                    min_cents: 150,
                    max_cents: 250_000,
                    reversal_pct: 5,
                },
                ShiftStep::Purchase {
                    amount: "300.00".to_string(),
                },
                ShiftStep::Close {
                    max_discrepancy_cents: 500,
                },
                ShiftStep::VerifyIntegrity,
            ],
        }
    }
}
