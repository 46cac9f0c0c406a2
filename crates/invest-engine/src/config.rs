//! Engine Configuration
//!
//! Read once at startup and passed to constructors.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InvestError, Result};

/// Order in which holdings are offered cash by the purchase allocator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrdering {
    /// Most expensive lots first, so cheap lots can absorb the remainder
    #[default]
    LotPriceDesc,

    /// Largest gap between target and actual weight first
    UnderweightDesc,
}

impl FromStr for PurchaseOrdering {
    type Err = InvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lot_price" | "lot_price_desc" => Ok(Self::LotPriceDesc),
            "underweight" | "underweight_desc" => Ok(Self::UnderweightDesc),
            other => Err(InvestError::Config(format!(
                "unknown purchase ordering '{other}'"
            ))),
        }
    }
}

/// MOEX ISS connection settings
#[derive(Clone, Debug)]
pub struct MoexConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for MoexConfig {
    fn default() -> Self {
        Self {
            base_url: "https://iss.moex.com".into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Postgres ledger settings; no URL keeps the ledger in memory
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InvestConfig {
    /// Holdings shown per portfolio page
    pub stocks_per_page: i64,

    /// Portfolios shown per list page
    pub portfolios_per_page: i64,

    /// Lifetime of cached prices, summaries and pages
    pub cache_ttl: Duration,

    /// Period of the market price refresh job
    pub price_refresh_interval: Duration,
    pub purchase_ordering: PurchaseOrdering,
    pub default_currency: String,
    pub moex: MoexConfig,
    pub database: DatabaseConfig,
}

impl Default for InvestConfig {
    fn default() -> Self {
        Self {
            stocks_per_page: 10,
            portfolios_per_page: 5,
            cache_ttl: Duration::from_secs(600),
            price_refresh_interval: Duration::from_secs(300),
            purchase_ordering: PurchaseOrdering::default(),
            default_currency: "RUB".into(),
            moex: MoexConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl InvestConfig {
    /// Load from process environment, falling back to defaults for unset keys
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| -> Result<Duration> {
            parse_or(&lookup, key, default.as_secs()).map(Duration::from_secs)
        };

        Ok(Self {
            stocks_per_page: parse_or(&lookup, "STOCKS_PER_PAGE", defaults.stocks_per_page)?,
            portfolios_per_page: parse_or(
                &lookup,
                "PORTFOLIOS_PER_PAGE",
                defaults.portfolios_per_page,
            )?,
            cache_ttl: secs("CACHE_STOCKS_EXPIRATION_SECS", defaults.cache_ttl)?,
            price_refresh_interval: secs(
                "PRICE_REFRESH_INTERVAL_SECS",
                defaults.price_refresh_interval,
            )?,
            purchase_ordering: parse_or(
                &lookup,
                "PURCHASE_ORDERING",
                defaults.purchase_ordering,
            )?,
            default_currency: lookup("DEFAULT_CURRENCY").unwrap_or(defaults.default_currency),
            moex: MoexConfig {
                base_url: lookup("MOEX_API_URL").unwrap_or(defaults.moex.base_url),
                timeout: secs("API_TIMEOUT_SECS", defaults.moex.timeout)?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
                max_connections: parse_or(
                    &lookup,
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
        })
    }

    /// Cache lifetime as a chrono duration
    pub fn cache_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| InvestError::Config(format!("{key}={raw}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = InvestConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.stocks_per_page, 10);
        assert_eq!(config.portfolios_per_page, 5);
        assert_eq!(config.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.purchase_ordering, PurchaseOrdering::LotPriceDesc);
        assert_eq!(config.moex.base_url, "https://iss.moex.com");
        assert!(config.database.url.is_none());
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_overrides() {
        let config = InvestConfig::from_lookup(lookup(&[
            ("STOCKS_PER_PAGE", "25"),
            ("API_TIMEOUT_SECS", "3"),
            ("PURCHASE_ORDERING", "underweight"),
            ("MOEX_API_URL", "http://localhost:8081"),
            ("DATABASE_URL", "postgres://invest@localhost/invest"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.stocks_per_page, 25);
        assert_eq!(config.moex.timeout, Duration::from_secs(3));
        assert_eq!(config.purchase_ordering, PurchaseOrdering::UnderweightDesc);
        assert_eq!(config.moex.base_url, "http://localhost:8081");
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://invest@localhost/invest")
        );
        assert_eq!(config.database.max_connections, 4);
    }

    #[test]
    fn test_malformed_value_is_config_error() {
        let result = InvestConfig::from_lookup(lookup(&[("STOCKS_PER_PAGE", "many")]));
        assert!(matches!(result, Err(InvestError::Config(_))));

        let result = InvestConfig::from_lookup(lookup(&[("PURCHASE_ORDERING", "random")]));
        assert!(matches!(result, Err(InvestError::Config(_))));
    }
}
