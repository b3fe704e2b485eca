//! Runtime configuration.
//!
//! Backtest parameters and the split table load from a TOML file; every
//! field has a usable default so the binary runs without one. Provider API
//! keys come from the environment (a `.env` file is honored) and are never
//! part of the config document.

use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::terminal::DEFAULT_TERMINAL_URL;
use crate::data::types::{SplitEvent, SplitTable};
use crate::pricing::ENTRY_TIME_MS;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Backtest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Underlying root symbol.
    pub symbol: String,

    /// Base URL of the local market-data terminal.
    pub terminal_url: String,

    /// Entry quote timestamp, milliseconds from midnight exchange time.
    pub entry_time_ms: u32,

    /// Fresh capital each backtested year starts with.
    pub starting_capital: Decimal,

    /// Commission per contract per transaction side.
    pub commission_per_contract: Decimal,

    /// Liquidity cap on contracts per trade.
    pub max_contracts_per_trade: u32,

    /// First backtested year.
    pub start_year: i32,

    /// Last backtested year; `None` means the current year.
    pub end_year: Option<i32>,

    /// Trading-calendar cache document.
    pub calendar_cache: PathBuf,

    /// Price-resolution cache document.
    pub price_cache: PathBuf,

    /// Known corporate actions.
    pub splits: Vec<SplitEvent>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "GOOG".to_string(),
            terminal_url: DEFAULT_TERMINAL_URL.to_string(),
            entry_time_ms: ENTRY_TIME_MS,
            starting_capital: dec!(100_000),
            commission_per_contract: dec!(0.35),
            max_contracts_per_trade: 999_999,
            start_year: 2016,
            end_year: None,
            calendar_cache: PathBuf::from("calendar_cache.json"),
            price_cache: PathBuf::from("price_cache.json"),
            splits: vec![SplitEvent {
                symbol: "GOOG".to_string(),
                date: chrono::NaiveDate::from_ymd_opt(2022, 7, 15)
                    .unwrap_or_default(),
                ratio: 20,
            }],
        }
    }
}

impl Config {
    /// Load from a TOML file, or fall back to defaults without one.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Ok(toml::from_str(&content)?)
            }
        }
    }

    pub fn split_table(&self) -> SplitTable {
        SplitTable::new(self.splits.clone())
    }
}

/// Spot-provider credentials from the environment.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub tiingo: Option<String>,
    pub marketstack: Option<String>,
}

impl ApiKeys {
    /// Read keys from `TIINGO_API_KEY` / `MARKETSTACK_API_KEY`. A missing
    /// key is not an error here; the provider classifies it as a
    /// missing-credentials failure at call time.
    pub fn from_env() -> Self {
        Self {
            tiingo: read_key("TIINGO_API_KEY"),
            marketstack: read_key("MARKETSTACK_API_KEY"),
        }
    }
}

fn read_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.symbol, "GOOG");
        assert_eq!(config.starting_capital, dec!(100_000));
        assert_eq!(config.commission_per_contract, dec!(0.35));
        assert_eq!(config.start_year, 2016);
        assert_eq!(config.end_year, None);
        assert_eq!(config.splits.len(), 1);
        assert_eq!(config.splits[0].ratio, 20);
    }

    #[test]
    fn test_parse_toml_overrides() {
        let text = r#"
            symbol = "MSFT"
            starting_capital = 250000.0
            commission_per_contract = 0.5
            start_year = 2018
            end_year = 2023

            [[splits]]
            symbol = "MSFT"
            date = "2021-03-01"
            ratio = 2
        "#;
        let config: Config = toml::from_str(text).unwrap();

        assert_eq!(config.symbol, "MSFT");
        assert_eq!(config.starting_capital, dec!(250000.0));
        assert_eq!(config.end_year, Some(2023));
        // Unspecified fields keep their defaults.
        assert_eq!(config.entry_time_ms, ENTRY_TIME_MS);
        assert_eq!(config.max_contracts_per_trade, 999_999);

        let table = config.split_table();
        let window_start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let window_end = NaiveDate::from_ymd_opt(2021, 12, 31).unwrap();
        assert!(table.spanning("MSFT", window_start, window_end).is_some());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
