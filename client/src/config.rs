use std::env;
use std::time::Duration;

use log::warn;
use payroll_stream::accrual::{Schedule, SECONDS_PER_YEAR};
use serde::{Deserialize, Serialize};

use crate::error::{PayrollError, PayrollResult};

/// Largest decimal count whose scale still fits in an `i128` amount.
pub const MAX_TOKEN_DECIMALS: u8 = 38;

/// Client tuning, loaded from JSON or environment variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seconds between authoritative reads of every watched stream
    pub poll_interval_secs: u64,
    /// Milliseconds between display ticks
    pub tick_interval_ms: u64,
    /// Length of the salary period the ledger prorates over
    pub seconds_per_period: u64,
    /// Decimals of the deposit asset, for display only
    pub token_decimals: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            tick_interval_ms: 1000,
            seconds_per_period: SECONDS_PER_YEAR,
            token_decimals: 7,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> PayrollResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PayrollResult<Self> {
        let defaults = Self::default();
        let config = Self {
            poll_interval_secs: parse_var(&lookup, "PAYROLL_POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.poll_interval_secs),
            tick_interval_ms: parse_var(&lookup, "PAYROLL_TICK_INTERVAL_MS")?
                .unwrap_or(defaults.tick_interval_ms),
            seconds_per_period: parse_var(&lookup, "PAYROLL_SECONDS_PER_PERIOD")?
                .unwrap_or(defaults.seconds_per_period),
            token_decimals: parse_var(&lookup, "PAYROLL_TOKEN_DECIMALS")?
                .unwrap_or(defaults.token_decimals),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(text: &str) -> PayrollResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| PayrollError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PayrollResult<()> {
        if self.poll_interval_secs == 0 {
            return Err(PayrollError::InvalidConfig(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(PayrollError::InvalidConfig(
                "tick_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.token_decimals > MAX_TOKEN_DECIMALS {
            return Err(PayrollError::InvalidConfig(format!(
                "token_decimals must be at most {MAX_TOKEN_DECIMALS}, got {}",
                self.token_decimals
            )));
        }
        self.schedule()?;

        if !(5..=10).contains(&self.poll_interval_secs) {
            warn!(
                "Poll interval of {}s is outside the recommended 5-10s range",
                self.poll_interval_secs
            );
        }
        Ok(())
    }

    pub fn schedule(&self) -> PayrollResult<Schedule> {
        Schedule::new(self.seconds_per_period).ok_or_else(|| {
            PayrollError::InvalidConfig(format!(
                "seconds_per_period {} is out of range",
                self.seconds_per_period
            ))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> PayrollResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| {
                PayrollError::InvalidConfig(format!("{key} is not a valid number: {raw}"))
            }),
    }
}
