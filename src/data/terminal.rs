//! HTTP client for the local market-data terminal.
//!
//! The terminal is a locally running process exposing a REST-like interface
//! (default `http://127.0.0.1:25510`). All endpoints answer with a
//! `{"response": [...]}` envelope. Option strikes on the wire are integer
//! thousandths of a dollar; tick rows are positional arrays whose layouts are
//! captured by the index constants below.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use super::types::{AtTimeQuote, EodQuote, GreeksSnapshot, OptionRight};

/// Default base URL of the local terminal.
pub const DEFAULT_TERMINAL_URL: &str = "http://127.0.0.1:25510";

/// Per-request timeout. Terminal calls are local but bulk endpoints can take
/// tens of seconds on cold data.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// EOD tick layout.
const EOD_CLOSE_IDX: usize = 5;
const EOD_BID_IDX: usize = 10;
const EOD_ASK_IDX: usize = 14;
const EOD_MIN_LEN: usize = 17;

// At-time quote tick layout.
const QUOTE_BID_IDX: usize = 3;
const QUOTE_ASK_IDX: usize = 7;
const QUOTE_MIN_LEN: usize = 8;

// EOD Greeks tick layout.
const GREEKS_DELTA_IDX: usize = 15;
const GREEKS_THETA_IDX: usize = 16;
const GREEKS_VEGA_IDX: usize = 17;
const GREEKS_GAMMA_IDX: usize = 21;
const GREEKS_IV_IDX: usize = 33;
const GREEKS_MIN_LEN: usize = 34;

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("terminal error: {0}")]
    Api(String),

    #[error("invalid response format: {0}")]
    InvalidResponse(String),
}

/// Market-data access seam.
///
/// [`TerminalClient`] is the production implementation; tests drive the
/// selection and orchestration code through an in-memory fake.
pub trait MarketData {
    /// All historical trading dates for a symbol, unordered and unfiltered.
    fn trading_dates(
        &self,
        symbol: &str,
    ) -> impl std::future::Future<Output = Result<Vec<NaiveDate>, TerminalError>>;

    /// Every expiration the terminal has ever listed for a symbol.
    fn listed_expirations(
        &self,
        symbol: &str,
    ) -> impl std::future::Future<Output = Result<Vec<NaiveDate>, TerminalError>>;

    /// Unique expirations of contracts tradable on a specific date.
    fn expirations_on(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> impl std::future::Future<Output = Result<Vec<NaiveDate>, TerminalError>>;

    /// End-of-day records for all strikes of one expiration on one date.
    fn eod_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
    ) -> impl std::future::Future<Output = Result<Vec<EodQuote>, TerminalError>>;

    /// Quotes for all strikes of one expiration at a millisecond-of-day
    /// offset.
    fn quotes_at(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
        ms_of_day: u32,
    ) -> impl std::future::Future<Output = Result<Vec<AtTimeQuote>, TerminalError>>;

    /// End-of-day record for a single contract. `None` when the terminal has
    /// no record for that contract/date.
    fn contract_eod(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        strike: i64,
        right: OptionRight,
        date: NaiveDate,
    ) -> impl std::future::Future<Output = Result<Option<EodQuote>, TerminalError>>;

    /// End-of-day Greeks for all strikes of one expiration on one date,
    /// keyed by fixed-point strike.
    fn chain_greeks(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
    ) -> impl std::future::Future<Output = Result<Vec<(i64, GreeksSnapshot)>, TerminalError>>;
}

/// REST client for the local terminal.
pub struct TerminalClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Value,
}

impl TerminalClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TerminalError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Probe the terminal's data-feed connection status.
    pub async fn is_connected(&self) -> Result<bool, TerminalError> {
        let url = format!(
            "{}/v2/system/mdds/status",
            self.base_url.trim_end_matches('/')
        );
        let text = self.client.get(&url).send().await?.text().await?;
        Ok(text.trim() == "CONNECTED")
    }

    async fn get_envelope(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, TerminalError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self.client.get(&url).query(params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(TerminalError::Api(format!("{}: {}", status, text)));
        }

        let envelope: Envelope = response.json().await?;
        Ok(envelope.response)
    }
}

impl MarketData for TerminalClient {
    async fn trading_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>, TerminalError> {
        let response = self
            .get_envelope(
                "v2/list/dates/stock/trade",
                &[("root", symbol.to_string())],
            )
            .await?;
        Ok(parse_date_list(&response))
    }

    async fn listed_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, TerminalError> {
        let response = self
            .get_envelope("v2/list/expirations", &[("root", symbol.to_string())])
            .await?;
        Ok(parse_date_list(&response))
    }

    async fn expirations_on(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveDate>, TerminalError> {
        let response = self
            .get_envelope(
                "v2/list/contracts/option/quote",
                &[
                    ("root", symbol.to_string()),
                    ("start_date", wire_date(date)),
                ],
            )
            .await?;
        Ok(parse_contract_expirations(&response))
    }

    async fn eod_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<EodQuote>, TerminalError> {
        let response = self
            .get_envelope(
                "v2/bulk_hist/option/eod",
                &[
                    ("root", symbol.to_string()),
                    ("exp", wire_date(expiration)),
                    ("start_date", wire_date(date)),
                    ("end_date", wire_date(date)),
                    ("rth", "true".to_string()),
                ],
            )
            .await?;
        Ok(parse_eod_chain(&response))
    }

    async fn quotes_at(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
        ms_of_day: u32,
    ) -> Result<Vec<AtTimeQuote>, TerminalError> {
        let response = self
            .get_envelope(
                "v2/bulk_at_time/option/quote",
                &[
                    ("root", symbol.to_string()),
                    ("exp", wire_date(expiration)),
                    ("start_date", wire_date(date)),
                    ("end_date", wire_date(date)),
                    ("ivl", ms_of_day.to_string()),
                    ("rth", "true".to_string()),
                ],
            )
            .await?;
        Ok(parse_at_time_quotes(&response))
    }

    async fn contract_eod(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        strike: i64,
        right: OptionRight,
        date: NaiveDate,
    ) -> Result<Option<EodQuote>, TerminalError> {
        let response = self
            .get_envelope(
                "v2/hist/option/eod",
                &[
                    ("root", symbol.to_string()),
                    ("exp", wire_date(expiration)),
                    ("strike", strike.to_string()),
                    ("right", right.as_code().to_string()),
                    ("start_date", wire_date(date)),
                    ("end_date", wire_date(date)),
                ],
            )
            .await?;
        Ok(parse_single_eod(&response, strike, right))
    }

    async fn chain_greeks(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<(i64, GreeksSnapshot)>, TerminalError> {
        let response = self
            .get_envelope(
                "v2/bulk_hist/option/eod_greeks",
                &[
                    ("root", symbol.to_string()),
                    ("exp", wire_date(expiration)),
                    ("start_date", wire_date(date)),
                    ("end_date", wire_date(date)),
                ],
            )
            .await?;
        Ok(parse_chain_greeks(&response))
    }
}

/// Format a date as the terminal's `YYYYMMDD` wire format.
pub fn wire_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Parse a wire date from either an integer (`20220715`) or string value.
fn value_to_date(value: &Value) -> Option<NaiveDate> {
    let s = match value {
        Value::Number(n) => n.as_i64()?.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    NaiveDate::parse_from_str(&s, "%Y%m%d").ok()
}

fn tick_f64(tick: &[Value], idx: usize) -> f64 {
    tick.get(idx).and_then(Value::as_f64).unwrap_or(0.0)
}

fn tick_decimal(tick: &[Value], idx: usize) -> Decimal {
    Decimal::from_f64_retain(tick_f64(tick, idx)).unwrap_or_default()
}

/// Parse a flat list of wire dates into a sorted, deduplicated sequence.
pub(crate) fn parse_date_list(response: &Value) -> Vec<NaiveDate> {
    let rows = match response.as_array() {
        Some(rows) => rows,
        None => return Vec::new(),
    };
    let dates: BTreeSet<NaiveDate> = rows.iter().filter_map(value_to_date).collect();
    dates.into_iter().collect()
}

/// Parse contract tuples `[root, expiration, strike, right]` into unique
/// sorted expirations.
pub(crate) fn parse_contract_expirations(response: &Value) -> Vec<NaiveDate> {
    let rows = match response.as_array() {
        Some(rows) => rows,
        None => return Vec::new(),
    };
    let dates: BTreeSet<NaiveDate> = rows
        .iter()
        .filter_map(|row| row.as_array())
        .filter_map(|row| row.get(1))
        .filter_map(value_to_date)
        .collect();
    dates.into_iter().collect()
}

#[derive(Debug, Deserialize)]
struct WireContract {
    #[serde(default)]
    strike: i64,
    #[serde(default)]
    right: String,
}

#[derive(Debug, Deserialize)]
struct ContractTicks {
    #[serde(default)]
    contract: Option<WireContract>,
    #[serde(default)]
    ticks: Vec<Vec<Value>>,
}

fn contract_rows(response: &Value) -> Vec<ContractTicks> {
    match response.as_array() {
        Some(rows) => rows
            .iter()
            .filter_map(|row| serde_json::from_value(row.clone()).ok())
            .collect(),
        None => Vec::new(),
    }
}

/// Parse a bulk EOD response into per-contract records.
pub(crate) fn parse_eod_chain(response: &Value) -> Vec<EodQuote> {
    contract_rows(response)
        .into_iter()
        .filter_map(|row| {
            let contract = row.contract?;
            let right = OptionRight::from_code(&contract.right)?;
            let tick = row.ticks.first()?;
            if tick.len() < EOD_MIN_LEN {
                return None;
            }
            Some(EodQuote {
                strike: contract.strike,
                right,
                close: tick_decimal(tick, EOD_CLOSE_IDX),
                bid: tick_decimal(tick, EOD_BID_IDX),
                ask: tick_decimal(tick, EOD_ASK_IDX),
            })
        })
        .collect()
}

/// Parse a bulk at-time response into per-contract quotes.
pub(crate) fn parse_at_time_quotes(response: &Value) -> Vec<AtTimeQuote> {
    contract_rows(response)
        .into_iter()
        .filter_map(|row| {
            let contract = row.contract?;
            let right = OptionRight::from_code(&contract.right)?;
            let tick = row.ticks.first()?;
            if tick.len() < QUOTE_MIN_LEN {
                return None;
            }
            Some(AtTimeQuote {
                strike: contract.strike,
                right,
                bid: tick_decimal(tick, QUOTE_BID_IDX),
                ask: tick_decimal(tick, QUOTE_ASK_IDX),
            })
        })
        .collect()
}

/// Parse the single-contract EOD response, whose rows are bare tick arrays.
pub(crate) fn parse_single_eod(
    response: &Value,
    strike: i64,
    right: OptionRight,
) -> Option<EodQuote> {
    let rows = response.as_array()?;
    let tick = rows.first()?.as_array()?;
    if tick.len() < EOD_MIN_LEN {
        return None;
    }
    Some(EodQuote {
        strike,
        right,
        close: tick_decimal(tick, EOD_CLOSE_IDX),
        bid: tick_decimal(tick, EOD_BID_IDX),
        ask: tick_decimal(tick, EOD_ASK_IDX),
    })
}

/// Parse a bulk Greeks response keyed by strike.
pub(crate) fn parse_chain_greeks(response: &Value) -> Vec<(i64, GreeksSnapshot)> {
    contract_rows(response)
        .into_iter()
        .filter_map(|row| {
            let contract = row.contract?;
            let tick = row.ticks.first()?;
            if tick.len() < GREEKS_MIN_LEN {
                return None;
            }
            Some((
                contract.strike,
                GreeksSnapshot {
                    delta: tick_f64(tick, GREEKS_DELTA_IDX),
                    theta: tick_f64(tick, GREEKS_THETA_IDX),
                    vega: tick_f64(tick, GREEKS_VEGA_IDX),
                    gamma: tick_f64(tick, GREEKS_GAMMA_IDX),
                    iv: tick_f64(tick, GREEKS_IV_IDX),
                },
            ))
        })
        .collect()
}
