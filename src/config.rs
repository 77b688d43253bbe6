use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::types::wallet_types::{Currency, OwnerId};

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_RESERVE_OWNER_ID: OwnerId = 0;
pub const DEFAULT_EVENT_BUFFER: usize = 1_024;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_REQUEST_STREAM: &str = "exchange_requests";
pub const DEFAULT_RESPONSE_STREAM: &str = "exchange_responses";
pub const DEFAULT_EVENT_STREAM: &str = "exchange_events";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub lock_timeout: Duration,
    /// Receives dividend and payout rounding remainders.
    pub reserve_owner_id: OwnerId,
    pub share_currency: Currency,
    pub forecast_currency: Currency,
    pub event_buffer: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            reserve_owner_id: DEFAULT_RESERVE_OWNER_ID,
            share_currency: Currency::Keys,
            forecast_currency: Currency::Points,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ExchangeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            lock_timeout: Duration::from_millis(env_or(
                "EXCHANGE_LOCK_TIMEOUT_MS",
                DEFAULT_LOCK_TIMEOUT_MS,
            )?),
            reserve_owner_id: env_or("EXCHANGE_RESERVE_OWNER_ID", defaults.reserve_owner_id)?,
            share_currency: env_or("EXCHANGE_SHARE_CURRENCY", defaults.share_currency)?,
            forecast_currency: env_or("EXCHANGE_FORECAST_CURRENCY", defaults.forecast_currency)?,
            event_buffer: env_or("EXCHANGE_EVENT_BUFFER", defaults.event_buffer)?,
        })
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub redis_url: String,
    pub request_stream: String,
    pub response_stream: String,
    pub event_stream: String,
    pub poll_interval: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            request_stream: env::var("EXCHANGE_REQUEST_STREAM")
                .unwrap_or_else(|_| DEFAULT_REQUEST_STREAM.to_string()),
            response_stream: env::var("EXCHANGE_RESPONSE_STREAM")
                .unwrap_or_else(|_| DEFAULT_RESPONSE_STREAM.to_string()),
            event_stream: env::var("EXCHANGE_EVENT_STREAM")
                .unwrap_or_else(|_| DEFAULT_EVENT_STREAM.to_string()),
            poll_interval: Duration::from_millis(env_or(
                "EXCHANGE_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?),
        })
    }
}

fn env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match env::var(key) {
        Ok(value) => value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_parses_case_insensitively() {
        assert_eq!("KEYS".parse::<Currency>(), Ok(Currency::Keys));
        assert_eq!("usd_equivalent".parse::<Currency>(), Ok(Currency::UsdEquivalent));
        assert!("doubloons".parse::<Currency>().is_err());
    }

    #[test]
    fn unset_keys_fall_back_to_defaults() {
        let value: u64 = env_or("EXCHANGE_TEST_UNSET_KEY_9F2A", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn defaults_route_remainders_to_owner_zero() {
        let config = ExchangeConfig::default();
        assert_eq!(config.reserve_owner_id, 0);
        assert_eq!(config.lock_timeout, Duration::from_millis(2_000));
    }
}
