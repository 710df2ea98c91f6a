//! Monetary types for the caja ledger.
//!
//! Amounts are carried as positive magnitudes with a separate [`Sign`], so a
//! ledger fold is always `amount * sign`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CajaError, Result};

/// Largest magnitude a single amount may carry (10 digits, 2 decimals).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Direction of a ledger posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Sign {
    /// Money enters the register (+1).
    Inflow,
    /// Money leaves the register (-1).
    Outflow,
}

impl Sign {
    /// Numeric value of the sign.
    pub fn as_i8(self) -> i8 {
        match self {
            Sign::Inflow => 1,
            Sign::Outflow => -1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Sign::Inflow => Sign::Outflow,
            Sign::Outflow => Sign::Inflow,
        }
    }

    /// Apply the sign to a magnitude.
    pub fn apply(self, amount: Decimal) -> Decimal {
        match self {
            Sign::Inflow => amount,
            Sign::Outflow => -amount,
        }
    }
}

impl TryFrom<i8> for Sign {
    type Error = CajaError;

    fn try_from(value: i8) -> Result<Self> {
        match value {
            1 => Ok(Sign::Inflow),
            -1 => Ok(Sign::Outflow),
            other => Err(CajaError::validation(
                format!("sign must be 1 or -1, got {}", other),
                "sign",
            )),
        }
    }
}

impl From<Sign> for i8 {
    fn from(sign: Sign) -> Self {
        sign.as_i8()
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.as_i8())
    }
}

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "CLP" | "PYG" => 0,
            _ => 2,
        }
    }

    /// Argentine peso, the default till currency.
    pub fn ars() -> Self {
        Self::new("ARS")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    /// Check the code looks like an ISO 4217 code.
    pub fn is_valid(&self) -> bool {
        self.0.len() == 3 && self.0.chars().all(|c| c.is_ascii_uppercase())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Check that an amount fits the currency precision and the column range.
///
/// `allow_zero` admits `0` (opening floats and physical counts); movement
/// amounts must be strictly positive.
pub fn validate_amount(
    amount: Decimal,
    currency: &Currency,
    field: &str,
    allow_zero: bool,
) -> Result<Decimal> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(CajaError::validation(
            format!("{} must not be negative", field),
            field,
        ));
    }

    if amount.is_zero() && !allow_zero {
        return Err(CajaError::validation(
            format!("{} must be > 0", field),
            field,
        ));
    }

    let places = currency.decimal_places();
    if amount.normalize().scale() > places {
        return Err(CajaError::validation(
            format!(
                "{} allows at most {} decimal places for {}",
                field, places, currency
            ),
            field,
        ));
    }

    if amount > MAX_AMOUNT {
        return Err(CajaError::validation(
            format!("{} exceeds maximum {}", field, MAX_AMOUNT),
            field,
        ));
    }

    Ok(amount.round_dp(places))
}
