//! Ledger configuration.
//!
//! Built once at start-up and handed to the engine; nothing reads settings
//! lazily from storage.

use std::time::Duration;

use caja_common::{constants, CajaError, Currency, Result};

/// Main ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Payment type name that counts as physical cash.
    pub cash_payment_type: String,
    /// Till currency; fixes amount precision.
    pub currency: Currency,
    /// Upper bound on waiting for a session or register lock.
    pub lock_timeout: Duration,
    /// Log a warning when a session closes with a non-zero difference.
    pub warn_on_close_difference: bool,
    /// PostgreSQL URL; `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Connection pool size.
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cash_payment_type: "EFECTIVO".to_string(),
            currency: Currency::ars(),
            lock_timeout: constants::default_lock_timeout()
                .to_std()
                .unwrap_or(Duration::from_secs(5)),
            warn_on_close_difference: true,
            database_url: None,
            max_connections: 5,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup("CAJA_CASH_PAYMENT_TYPE") {
            config.cash_payment_type = name;
        }

        if let Some(code) = lookup("CAJA_CURRENCY") {
            config.currency = Currency::new(code);
        }

        if let Some(ms) = lookup("CAJA_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.lock_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(flag) = lookup("CAJA_WARN_ON_CLOSE_DIFFERENCE") {
            if let Ok(flag) = flag.parse() {
                config.warn_on_close_difference = flag;
            }
        }

        if let Some(url) = lookup("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = Some(url);
            }
        }

        if let Some(n) = lookup("CAJA_DB_MAX_CONNECTIONS") {
            if let Ok(n) = n.parse() {
                config.max_connections = n;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cash_payment_type.trim().is_empty() {
            return Err(CajaError::Configuration(
                "Cash payment type cannot be empty".to_string(),
            ));
        }

        if !self.currency.is_valid() {
            return Err(CajaError::Configuration(format!(
                "Invalid currency code: {}",
                self.currency
            )));
        }

        if self.lock_timeout.is_zero() {
            return Err(CajaError::Configuration(
                "Lock timeout cannot be zero".to_string(),
            ));
        }

        if self.database_url.is_some() && self.max_connections == 0 {
            return Err(CajaError::Configuration(
                "Max connections cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}
