use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{BetError, Result};
use crate::ledger::validate_amount;

/// Expiry sweep interval (seconds): OPEN bets past their betting deadline get closed.
pub const EXPIRY_SWEEP_SECS: u64 = 120;

/// Resolution sweep interval (seconds): bets past their resolve date get nudged or auto-resolved.
pub const RESOLUTION_SWEEP_SECS: u64 = 300;

/// Minimum gap between two "awaiting resolution" events for the same bet.
pub const RESOLUTION_REMINDER_SECS: u64 = 86_400;

/// Credits granted when a user account is opened.
pub const INITIAL_CREDITS: u64 = 1_000;

/// Channel capacity for outbound notification events.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub expiry_sweep_secs: u64,
    pub resolution_sweep_secs: u64,
    pub resolution_reminder_secs: u64,
    pub initial_credits: Decimal,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "data/bets.sled".to_string(),
            expiry_sweep_secs: EXPIRY_SWEEP_SECS,
            resolution_sweep_secs: RESOLUTION_SWEEP_SECS,
            resolution_reminder_secs: RESOLUTION_REMINDER_SECS,
            initial_credits: Decimal::from(INITIAL_CREDITS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();
        Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            expiry_sweep_secs: env_parse("EXPIRY_SWEEP_SECS", defaults.expiry_sweep_secs)?,
            resolution_sweep_secs: env_parse("RESOLUTION_SWEEP_SECS", defaults.resolution_sweep_secs)?,
            resolution_reminder_secs: env_parse(
                "RESOLUTION_REMINDER_SECS",
                defaults.resolution_reminder_secs,
            )?,
            initial_credits: env_parse("INITIAL_CREDITS", defaults.initial_credits)?,
        }
        .validated()
    }

    /// Reject values that would only fail later, on first use.
    pub fn validated(self) -> Result<Self> {
        if !self.initial_credits.is_zero() {
            validate_amount(self.initial_credits)
                .map_err(|e| BetError::Validation(format!("INITIAL_CREDITS: {}", e)))?;
        }
        Ok(self)
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| BetError::Validation(format!("{} must be a valid number, got {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}
