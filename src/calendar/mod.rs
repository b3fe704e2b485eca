//! Trading-calendar resolution and permanent caching.
//!
//! Historical trading days never change, so a (symbol, year) calendar is
//! fetched from the terminal once and persisted forever. Quarter boundaries
//! are derived from the cached year rather than fetched separately.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::cache::KvStore;
use crate::data::terminal::{MarketData, TerminalError};

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("terminal: {0}")]
    Terminal(#[from] TerminalError),

    #[error("no trading days found for {symbol} {year}")]
    NoData { symbol: String, year: i32 },
}

/// Cached calendar for one (symbol, year).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub symbol: String,
    pub year: i32,
    pub first_trading_day: NaiveDate,
    pub last_trading_day: NaiveDate,
    pub total_trading_days: usize,
    pub trading_days: Vec<NaiveDate>,
}

/// Trading-day lookup backed by the terminal and a key-value store.
pub struct TradingCalendar {
    store: Box<dyn KvStore>,
}

impl TradingCalendar {
    pub fn new(store: Box<dyn KvStore>) -> Self {
        Self { store }
    }

    fn cache_key(symbol: &str, year: i32) -> String {
        format!("calendar:{}:{}", symbol, year)
    }

    /// All trading days for a symbol/year, strictly ascending, no
    /// duplicates. Fetched once and cached permanently.
    pub async fn trading_days<M: MarketData>(
        &mut self,
        market: &M,
        symbol: &str,
        year: i32,
    ) -> Result<Vec<NaiveDate>, CalendarError> {
        let key = Self::cache_key(symbol, year);
        if let Some(entry) = self.store.get(&key) {
            if let Ok(cached) = serde_json::from_value::<CalendarEntry>(entry.value) {
                return Ok(cached.trading_days);
            }
        }

        let all_dates = market.trading_dates(symbol).await?;
        let mut days: Vec<NaiveDate> = all_dates
            .into_iter()
            .filter(|d| d.year() == year)
            .collect();
        days.sort();
        days.dedup();

        if days.is_empty() {
            return Err(CalendarError::NoData {
                symbol: symbol.to_string(),
                year,
            });
        }

        let entry = CalendarEntry {
            symbol: symbol.to_string(),
            year,
            first_trading_day: days[0],
            last_trading_day: days[days.len() - 1],
            total_trading_days: days.len(),
            trading_days: days.clone(),
        };
        info!(
            symbol,
            year,
            days = entry.total_trading_days,
            first = %entry.first_trading_day,
            last = %entry.last_trading_day,
            "cached trading calendar"
        );
        if let Ok(value) = serde_json::to_value(&entry) {
            self.store.put(&key, value, None);
        }

        Ok(days)
    }

    pub async fn first_trading_day<M: MarketData>(
        &mut self,
        market: &M,
        symbol: &str,
        year: i32,
    ) -> Result<NaiveDate, CalendarError> {
        let days = self.trading_days(market, symbol, year).await?;
        Ok(days[0])
    }

    pub async fn last_trading_day<M: MarketData>(
        &mut self,
        market: &M,
        symbol: &str,
        year: i32,
    ) -> Result<NaiveDate, CalendarError> {
        let days = self.trading_days(market, symbol, year).await?;
        Ok(days[days.len() - 1])
    }

    /// Most recent trading day not after `today`. Substitutes for "last
    /// trading day of year" while the calendar year is still in progress.
    pub async fn most_recent_trading_day<M: MarketData>(
        &mut self,
        market: &M,
        symbol: &str,
        today: NaiveDate,
    ) -> Result<NaiveDate, CalendarError> {
        let year = today.year();
        let days = self.trading_days(market, symbol, year).await?;
        days.into_iter()
            .filter(|d| *d <= today)
            .max()
            .ok_or(CalendarError::NoData {
                symbol: symbol.to_string(),
                year,
            })
    }

    /// First trading day of quarter `q` (1..=4).
    pub async fn first_trading_day_of_quarter<M: MarketData>(
        &mut self,
        market: &M,
        symbol: &str,
        year: i32,
        quarter: u32,
    ) -> Result<Option<NaiveDate>, CalendarError> {
        let days = self.trading_days(market, symbol, year).await?;
        Ok(first_of_quarter(&days, quarter))
    }

    /// Last trading day of quarter `q` (1..=4).
    pub async fn last_trading_day_of_quarter<M: MarketData>(
        &mut self,
        market: &M,
        symbol: &str,
        year: i32,
        quarter: u32,
    ) -> Result<Option<NaiveDate>, CalendarError> {
        let days = self.trading_days(market, symbol, year).await?;
        Ok(last_of_quarter(&days, quarter))
    }
}

/// Quarter `q` spans months `3q-2 ..= 3q`. The first day of a quarter is the
/// earliest cached date at or past the quarter's first month.
pub fn first_of_quarter(days: &[NaiveDate], quarter: u32) -> Option<NaiveDate> {
    let start_month = quarter.checked_mul(3)?.checked_sub(2)?;
    days.iter().find(|d| d.month() >= start_month).copied()
}

/// The last day of a quarter is the latest cached date at or before the
/// quarter's last month.
pub fn last_of_quarter(days: &[NaiveDate], quarter: u32) -> Option<NaiveDate> {
    let end_month = quarter * 3;
    days.iter().filter(|d| d.month() <= end_month).max().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::data::fixtures::FakeMarket;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn synthetic_year() -> Vec<NaiveDate> {
        // A sparse synthetic calendar: a few days per quarter.
        vec![
            d(2022, 1, 3),
            d(2022, 1, 4),
            d(2022, 3, 31),
            d(2022, 4, 1),
            d(2022, 6, 30),
            d(2022, 7, 1),
            d(2022, 9, 30),
            d(2022, 10, 3),
            d(2022, 12, 30),
        ]
    }

    #[test]
    fn test_quarter_boundaries() {
        let days = synthetic_year();

        assert_eq!(first_of_quarter(&days, 1), Some(d(2022, 1, 3)));
        assert_eq!(last_of_quarter(&days, 1), Some(d(2022, 3, 31)));
        assert_eq!(first_of_quarter(&days, 2), Some(d(2022, 4, 1)));
        assert_eq!(last_of_quarter(&days, 2), Some(d(2022, 6, 30)));
        assert_eq!(first_of_quarter(&days, 3), Some(d(2022, 7, 1)));
        assert_eq!(last_of_quarter(&days, 3), Some(d(2022, 9, 30)));
        assert_eq!(first_of_quarter(&days, 4), Some(d(2022, 10, 3)));
        assert_eq!(last_of_quarter(&days, 4), Some(d(2022, 12, 30)));
    }

    #[test]
    fn test_quarter_with_no_days() {
        let days = vec![d(2022, 1, 3), d(2022, 2, 1)];
        assert_eq!(first_of_quarter(&days, 4), None);
        // Q1 days exist before month 12, so "last of Q4" degenerates to the
        // last cached day.
        assert_eq!(last_of_quarter(&days, 4), Some(d(2022, 2, 1)));
    }

    #[tokio::test]
    async fn test_trading_days_sorted_dedup_and_cached() {
        let mut market = FakeMarket::new();
        // Unsorted, duplicated, with a stray prior-year date.
        market.trading_dates = vec![
            d(2022, 1, 4),
            d(2022, 1, 3),
            d(2022, 1, 4),
            d(2021, 12, 31),
            d(2022, 12, 30),
        ];

        let mut calendar = TradingCalendar::new(Box::new(MemoryStore::new()));
        let days = calendar.trading_days(&market, "GOOG", 2022).await.unwrap();

        assert_eq!(days, vec![d(2022, 1, 3), d(2022, 1, 4), d(2022, 12, 30)]);
        assert!(days.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(market.trading_dates_calls(), 1);

        // Second query is served from cache.
        let again = calendar.trading_days(&market, "GOOG", 2022).await.unwrap();
        assert_eq!(again, days);
        assert_eq!(market.trading_dates_calls(), 1);

        let first = calendar.first_trading_day(&market, "GOOG", 2022).await.unwrap();
        let last = calendar.last_trading_day(&market, "GOOG", 2022).await.unwrap();
        assert!(first <= last);
    }

    #[tokio::test]
    async fn test_no_parsable_dates_is_error() {
        let market = FakeMarket::new();

        let mut calendar = TradingCalendar::new(Box::new(MemoryStore::new()));
        let result = calendar.trading_days(&market, "GOOG", 2022).await;
        assert!(matches!(result, Err(CalendarError::NoData { .. })));
    }

    #[tokio::test]
    async fn test_most_recent_trading_day() {
        let mut market = FakeMarket::new();
        market.trading_dates = synthetic_year();

        let mut calendar = TradingCalendar::new(Box::new(MemoryStore::new()));
        let most_recent = calendar
            .most_recent_trading_day(&market, "GOOG", d(2022, 10, 1))
            .await
            .unwrap();
        assert_eq!(most_recent, d(2022, 9, 30));
    }
}
