//! Configuration management for the Slotbook server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unlike a missing optional value, a malformed or out-of-range number is an
//! error: a typo in `SCHEDULER_INTERVAL_SECS` should stop the server, not
//! silently fall back.

use serde::{Deserialize, Serialize};
use slotbook_core::lifecycle::LifecycleWindows;
use slotbook_core::types::Money;
use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required variable not set
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    /// Variable set to something unparseable
    #[error("Invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },

    /// Number outside the accepted range
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// Smallest accepted value
        min: String,
        /// Largest accepted value
        max: String,
    },
}

/// Accepted scheduler tick interval, seconds.
pub const SCHEDULER_INTERVAL_SECS: RangeInclusive<u64> = 1..=86_400;

/// Accepted lifecycle window, minutes (up to a week).
pub const WINDOW_MINS: RangeInclusive<i64> = 1..=10_080;

/// Accepted payout claim timeout, seconds (up to a day).
pub const CLAIM_TIMEOUT_SECS: RangeInclusive<u64> = 1..=86_400;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `PostgreSQL` configuration
    pub database: DatabaseConfig,
    /// Match scheduler configuration
    pub scheduler: SchedulerSettings,
    /// Wallet limits
    pub wallet: WalletSettings,
    /// Payout submission
    pub payouts: PayoutSettings,
    /// Prometheus exporter
    pub metrics: MetricsSettings,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Match scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between ticks
    pub interval_secs: u64,
    /// Minutes a match stays live
    pub live_duration_mins: i64,
    /// Minutes after start before an upcoming match is closed
    pub stale_window_mins: i64,
}

impl SchedulerSettings {
    /// Tick interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Lifecycle windows.
    #[must_use]
    pub fn windows(&self) -> LifecycleWindows {
        LifecycleWindows {
            live_duration: chrono::Duration::minutes(self.live_duration_mins),
            stale_window: chrono::Duration::minutes(self.stale_window_mins),
        }
    }
}

/// Wallet limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSettings {
    /// Smallest deposit, minor units
    pub min_deposit_minor: u64,
    /// Smallest withdrawal, minor units
    pub min_withdrawal_minor: u64,
    /// ISO currency code for checkout orders
    pub currency: String,
    /// Secret used to verify checkout signatures
    #[serde(skip_serializing)]
    pub checkout_key_secret: String,
}

impl WalletSettings {
    /// Smallest deposit.
    #[must_use]
    pub const fn min_deposit(&self) -> Money {
        Money::from_minor(self.min_deposit_minor)
    }

    /// Smallest withdrawal.
    #[must_use]
    pub const fn min_withdrawal(&self) -> Money {
        Money::from_minor(self.min_withdrawal_minor)
    }
}

/// Payout submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSettings {
    /// Retries after the first failed submission
    pub max_retries: usize,
    /// Seconds an approval's claim on a hold lasts before another approval
    /// may take it over
    pub claim_timeout_secs: u64,
}

impl PayoutSettings {
    /// Claim timeout.
    #[must_use]
    pub const fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }
}

/// Prometheus exporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl MetricsSettings {
    /// Socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if host and port do not form an address.
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::Invalid {
            name: "METRICS_HOST",
            value: raw,
        })
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a required variable is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any variable source.
    ///
    /// # Errors
    ///
    /// Returns error if a required variable is missing or a value is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        Ok(Self {
            database: DatabaseConfig {
                url: vars.required("DATABASE_URL")?,
                max_connections: vars.parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: vars.parse_or("DATABASE_MIN_CONNECTIONS", 2)?,
                connect_timeout: vars.parse_or("DATABASE_CONNECT_TIMEOUT", 30)?,
            },
            scheduler: SchedulerSettings {
                interval_secs: vars.parse_in("SCHEDULER_INTERVAL_SECS", 60, SCHEDULER_INTERVAL_SECS)?,
                live_duration_mins: vars.parse_in("MATCH_LIVE_DURATION_MINS", 30, WINDOW_MINS)?,
                stale_window_mins: vars.parse_in("MATCH_STALE_WINDOW_MINS", 60, WINDOW_MINS)?,
            },
            wallet: WalletSettings {
                min_deposit_minor: vars.parse_or("WALLET_MIN_DEPOSIT_MINOR", 1000)?,
                min_withdrawal_minor: vars.parse_or("WALLET_MIN_WITHDRAWAL_MINOR", 1000)?,
                currency: vars.string_or("WALLET_CURRENCY", "INR"),
                checkout_key_secret: vars.required("CHECKOUT_KEY_SECRET")?,
            },
            payouts: PayoutSettings {
                max_retries: vars.parse_or("PAYOUT_MAX_RETRIES", 3)?,
                claim_timeout_secs: vars.parse_in("PAYOUT_CLAIM_TIMEOUT_SECS", 900, CLAIM_TIMEOUT_SECS)?,
            },
            metrics: MetricsSettings {
                host: vars.string_or("METRICS_HOST", "0.0.0.0"),
                port: vars.parse_or("METRICS_PORT", 9090)?,
            },
            shutdown_timeout: vars.parse_or("SHUTDOWN_TIMEOUT", 10)?,
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }

    fn parse_in<T>(&self, name: &'static str, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Display,
    {
        let value = self.parse_or(name, default)?;
        if range.contains(&value) {
            Ok(value)
        } else {
            Err(ConfigError::OutOfRange {
                name,
                value: value.to_string(),
                min: range.start().to_string(),
                max: range.end().to_string(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/slotbook"),
        ("CHECKOUT_KEY_SECRET", "shh"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.scheduler.interval(), Duration::from_secs(60));
        assert_eq!(config.scheduler.windows(), LifecycleWindows::default());
        assert_eq!(config.wallet.min_deposit(), Money::from_major(10));
        assert_eq!(config.wallet.min_withdrawal(), Money::from_major(10));
        assert_eq!(config.wallet.currency, "INR");
        assert_eq!(config.payouts.max_retries, 3);
        assert_eq!(config.metrics.addr().unwrap(), "0.0.0.0:9090".parse().unwrap());
        assert_eq!(config.shutdown_timeout, 10);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SCHEDULER_INTERVAL_SECS", "5"));
        pairs.push(("MATCH_LIVE_DURATION_MINS", "45"));
        pairs.push(("WALLET_CURRENCY", "USD"));

        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.scheduler.interval(), Duration::from_secs(5));
        assert_eq!(
            config.scheduler.windows().live_duration,
            chrono::Duration::minutes(45)
        );
        assert_eq!(config.wallet.currency, "USD");
    }

    #[test]
    fn malformed_number_is_an_error() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("METRICS_PORT", "ninety"));

        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "METRICS_PORT",
                value: "ninety".into()
            }
        );
    }

    #[test]
    fn zero_scheduler_interval_is_refused() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SCHEDULER_INTERVAL_SECS", "0"));

        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                name: "SCHEDULER_INTERVAL_SECS",
                value: "0".into(),
                min: "1".into(),
                max: "86400".into(),
            }
        );
    }

    #[test]
    fn window_minutes_must_be_in_range() {
        for (name, value) in [
            ("MATCH_LIVE_DURATION_MINS", "-5"),
            ("MATCH_LIVE_DURATION_MINS", "0"),
            ("MATCH_STALE_WINDOW_MINS", "9223372036854775807"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((name, value));

            let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(
                matches!(err, ConfigError::OutOfRange { name: got, .. } if got == name),
                "{name}={value} gave {err:?}"
            );
        }

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MATCH_STALE_WINDOW_MINS", "10080"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.scheduler.windows().stale_window, chrono::Duration::weeks(1));
    }

    #[test]
    fn claim_timeout_defaults_and_bounds() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.payouts.claim_timeout(), Duration::from_secs(900));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PAYOUT_CLAIM_TIMEOUT_SECS", "0"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::OutOfRange { name: "PAYOUT_CLAIM_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = Config::from_lookup(lookup(&[("CHECKOUT_KEY_SECRET", "shh")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }
}
