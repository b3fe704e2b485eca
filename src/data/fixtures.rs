//! In-memory market-data fake for tests.

use std::cell::Cell;
use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::terminal::{MarketData, TerminalError};
use super::types::{AtTimeQuote, EodQuote, GreeksSnapshot, OptionRight};
use crate::spot::{PriceOutcome, SpotProvider};

/// Scriptable [`MarketData`] implementation backed by hash maps.
///
/// Missing keys behave like an empty terminal response, which is how the
/// real terminal reports unknown contracts and dates.
#[derive(Default)]
pub struct FakeMarket {
    pub trading_dates: Vec<NaiveDate>,
    pub listed_expirations: Vec<NaiveDate>,
    /// Expirations tradable on a given entry date.
    pub expirations_by_date: HashMap<NaiveDate, Vec<NaiveDate>>,
    /// (expiration, date) -> full EOD chain.
    pub eod_chains: HashMap<(NaiveDate, NaiveDate), Vec<EodQuote>>,
    /// (expiration, date) -> intraday quotes.
    pub at_time_quotes: HashMap<(NaiveDate, NaiveDate), Vec<AtTimeQuote>>,
    /// (expiration, strike, date) -> single-contract EOD record.
    pub contract_eods: HashMap<(NaiveDate, i64, NaiveDate), EodQuote>,
    /// (expiration, date) -> per-strike Greeks.
    pub greeks: HashMap<(NaiveDate, NaiveDate), Vec<(i64, GreeksSnapshot)>>,

    trading_dates_calls: Cell<usize>,
}

impl FakeMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trading_dates_calls(&self) -> usize {
        self.trading_dates_calls.get()
    }
}

/// Build a call-side EOD quote.
pub fn call_eod(strike: i64, close: Decimal, bid: Decimal, ask: Decimal) -> EodQuote {
    EodQuote {
        strike,
        right: OptionRight::Call,
        close,
        bid,
        ask,
    }
}

/// Build a call-side intraday quote.
pub fn call_quote(strike: i64, bid: Decimal, ask: Decimal) -> AtTimeQuote {
    AtTimeQuote {
        strike,
        right: OptionRight::Call,
        bid,
        ask,
    }
}

/// Scriptable [`SpotProvider`] fake keyed by date.
pub struct FakeSpotProvider {
    pub name: &'static str,
    pub prices: HashMap<NaiveDate, Decimal>,
    /// Outcome returned for dates without a scripted price.
    pub missing_outcome: PriceOutcome,
}

impl FakeSpotProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            prices: HashMap::new(),
            missing_outcome: PriceOutcome::MarketClosed,
        }
    }
}

impl SpotProvider for FakeSpotProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, _symbol: &str, date: NaiveDate) -> PriceOutcome {
        match self.prices.get(&date) {
            Some(price) => PriceOutcome::Success { price: *price },
            None => self.missing_outcome.clone(),
        }
    }
}

impl MarketData for FakeMarket {
    async fn trading_dates(&self, _symbol: &str) -> Result<Vec<NaiveDate>, TerminalError> {
        self.trading_dates_calls.set(self.trading_dates_calls.get() + 1);
        Ok(self.trading_dates.clone())
    }

    async fn listed_expirations(&self, _symbol: &str) -> Result<Vec<NaiveDate>, TerminalError> {
        Ok(self.listed_expirations.clone())
    }

    async fn expirations_on(
        &self,
        _symbol: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveDate>, TerminalError> {
        Ok(self
            .expirations_by_date
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    async fn eod_chain(
        &self,
        _symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<EodQuote>, TerminalError> {
        Ok(self
            .eod_chains
            .get(&(expiration, date))
            .cloned()
            .unwrap_or_default())
    }

    async fn quotes_at(
        &self,
        _symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
        _ms_of_day: u32,
    ) -> Result<Vec<AtTimeQuote>, TerminalError> {
        Ok(self
            .at_time_quotes
            .get(&(expiration, date))
            .cloned()
            .unwrap_or_default())
    }

    async fn contract_eod(
        &self,
        _symbol: &str,
        expiration: NaiveDate,
        strike: i64,
        _right: OptionRight,
        date: NaiveDate,
    ) -> Result<Option<EodQuote>, TerminalError> {
        Ok(self.contract_eods.get(&(expiration, strike, date)).cloned())
    }

    async fn chain_greeks(
        &self,
        _symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<(i64, GreeksSnapshot)>, TerminalError> {
        Ok(self.greeks.get(&(expiration, date)).cloned().unwrap_or_default())
    }
}
