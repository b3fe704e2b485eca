//! Contract selection strategies.
//!
//! Both strategies consume the same in-the-money filtering primitive and the
//! shared pricing retrieval, but differ in how they pick an expiration:
//!
//! - [`AnnualJanuaryStrategy`] probes next-January expirations in ascending
//!   order and takes the first one with a complete, valid dataset.
//!   Historical option chains are sparse; insisting on any single "best"
//!   expiration would silently fail on missing data.
//! - [`RollingFifteenMonthStrategy`] targets entry + 15 months among the
//!   expirations actually tradable on the entry date, with a one-year floor
//!   so every position still qualifies as a LEAPS.

use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use crate::data::terminal::{MarketData, TerminalError};
use crate::data::types::{
    spot_to_fixed, strike_to_dollars, ContractSelection, EodQuote, ItmCall, OptionContract,
    OptionRight, SplitTable, TradeQuote, DAYS_PER_MONTH,
};
use crate::pricing;

/// Minimum days to expiration for a LEAPS-qualifying contract.
pub const LEAPS_FLOOR_DAYS: i64 = 365;

/// Rolling strategy target: months from entry to expiration.
pub const TARGET_MONTHS: u32 = 15;

/// Why a selection attempt produced no trade. All variants mean "skip this
/// period" at the orchestrator; none abort the backtest.
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("no candidate expirations")]
    NoExpirations,

    #[error("no LEAPS-qualifying expirations (>= {LEAPS_FLOOR_DAYS} days out)")]
    NoLeapsExpirations,

    #[error("no entry-day data for the chosen expiration")]
    NoEntryData,

    #[error("no eligible in-the-money calls")]
    NoEligibleCalls,

    #[error("pinned strike {strike} not available for the new expiration")]
    FixedStrikeUnavailable { strike: i64 },

    #[error("no valid entry price at the entry timestamp")]
    NoEntryPrice,

    #[error("no valid exit price")]
    NoExitPrice,

    #[error("all {tested} candidate expirations failed validation")]
    Exhausted { tested: usize },

    #[error("terminal: {0}")]
    Terminal(#[from] TerminalError),
}

/// One trade to select a contract for.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    /// Resolved opening spot price on the entry date.
    pub spot: Decimal,
    /// Strike pinned from an earlier period (quarterly fixed-strike mode).
    pub pinned_strike: Option<i64>,
}

/// A contract selection strategy.
pub trait Strategy {
    fn label(&self) -> &'static str;

    /// Select and fully price one trade.
    fn select_trade<M: MarketData>(
        &self,
        market: &M,
        splits: &SplitTable,
        request: &TradeRequest,
    ) -> impl std::future::Future<Output = Result<TradeQuote, SelectionError>>;
}

/// Filter a chain's calls down to eligible in-the-money candidates.
///
/// Keeps strikes strictly below the spot price (compared in fixed-point)
/// that carry either a positive close or a positive bid-and-ask pair, sorted
/// ascending by distance from spot. Index 0 is the optimal (closest) strike.
pub fn itm_calls(chain: &[EodQuote], spot: Decimal) -> Vec<ItmCall> {
    let spot_fixed = spot_to_fixed(spot);
    let mut calls: Vec<ItmCall> = chain
        .iter()
        .filter(|q| q.right == OptionRight::Call)
        .filter(|q| q.strike < spot_fixed)
        .filter(|q| q.close > Decimal::ZERO || (q.bid > Decimal::ZERO && q.ask > Decimal::ZERO))
        .map(|q| ItmCall {
            strike: q.strike,
            distance: (q.strike - spot_fixed).abs(),
            close: q.close,
            bid: q.bid,
            ask: q.ask,
        })
        .collect();
    calls.sort_by_key(|c| c.distance);
    calls
}

/// Pick the strike for a trade: the pinned strike when one is carried
/// forward, otherwise the closest in-the-money call.
fn pick_strike(calls: &[ItmCall], pinned: Option<i64>) -> Result<i64, SelectionError> {
    match pinned {
        Some(strike) => calls
            .iter()
            .find(|c| c.strike == strike)
            .map(|c| c.strike)
            .ok_or(SelectionError::FixedStrikeUnavailable { strike }),
        None => calls
            .first()
            .map(|c| c.strike)
            .ok_or(SelectionError::NoEligibleCalls),
    }
}

/// Choose the expiration closest to `target` by absolute day distance.
/// Equidistant candidates resolve to the later date, which keeps the choice
/// deterministic regardless of input ordering.
pub fn closest_expiration(expirations: &[NaiveDate], target: NaiveDate) -> Option<NaiveDate> {
    expirations.iter().copied().fold(None, |best, candidate| {
        let dist = (candidate - target).num_days().abs();
        match best {
            None => Some(candidate),
            Some(current) => {
                let current_dist = (current - target).num_days().abs();
                if dist < current_dist || (dist == current_dist && candidate > current) {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        }
    })
}

fn months_out(entry: NaiveDate, expiration: NaiveDate) -> f64 {
    (expiration - entry).num_days() as f64 / DAYS_PER_MONTH
}

/// Price one (expiration, strike) candidate end to end: entry quote at the
/// intraday timestamp, split-adjusted exit lookup, and best-effort Greeks.
async fn price_candidate<M: MarketData>(
    market: &M,
    splits: &SplitTable,
    request: &TradeRequest,
    expiration: NaiveDate,
    strike: i64,
    target_date: Option<NaiveDate>,
    entry_time_ms: u32,
) -> Result<TradeQuote, SelectionError> {
    let entry = pricing::entry_price(
        market,
        &request.symbol,
        expiration,
        request.entry_date,
        strike,
        entry_time_ms,
    )
    .await?
    .ok_or(SelectionError::NoEntryPrice)?;

    let split = splits
        .spanning(&request.symbol, request.entry_date, request.exit_date)
        .cloned();
    let exit_strike = pricing::split_adjusted_strike(strike, split.as_ref());
    if let Some(event) = &split {
        debug!(
            entry_strike = %strike_to_dollars(strike),
            exit_strike = %strike_to_dollars(exit_strike),
            ratio = event.ratio,
            "split adjustment applied to exit lookup"
        );
    }

    let raw_exit = pricing::exit_price(
        market,
        &request.symbol,
        expiration,
        exit_strike,
        request.exit_date,
    )
    .await?
    .ok_or(SelectionError::NoExitPrice)?;
    let exit = pricing::split_adjusted_exit_price(raw_exit, split.as_ref());

    let entry_greeks = pricing::greeks_snapshot(
        market,
        &request.symbol,
        expiration,
        request.entry_date,
        strike,
    )
    .await;
    let exit_greeks = pricing::greeks_snapshot(
        market,
        &request.symbol,
        expiration,
        request.exit_date,
        exit_strike,
    )
    .await;

    let deviation_days = target_date
        .map(|t| (expiration - t).num_days().abs())
        .unwrap_or(0);

    Ok(TradeQuote {
        selection: ContractSelection {
            contract: OptionContract {
                symbol: request.symbol.clone(),
                expiration,
                strike,
                right: OptionRight::Call,
            },
            target_date,
            months_to_expiration: months_out(request.entry_date, expiration),
            deviation_days,
        },
        exit_strike,
        entry_price: entry,
        exit_price: exit,
        entry_greeks,
        exit_greeks,
        split,
    })
}

/// Buy a next-January LEAPS on the first trading day of the year and hold.
#[derive(Debug, Clone)]
pub struct AnnualJanuaryStrategy {
    pub entry_time_ms: u32,
}

impl Default for AnnualJanuaryStrategy {
    fn default() -> Self {
        Self {
            entry_time_ms: pricing::ENTRY_TIME_MS,
        }
    }
}

impl Strategy for AnnualJanuaryStrategy {
    fn label(&self) -> &'static str {
        "annual-january"
    }

    async fn select_trade<M: MarketData>(
        &self,
        market: &M,
        splits: &SplitTable,
        request: &TradeRequest,
    ) -> Result<TradeQuote, SelectionError> {
        let target_year = request.entry_date.year() + 1;
        let mut candidates: Vec<NaiveDate> = market
            .listed_expirations(&request.symbol)
            .await?
            .into_iter()
            .filter(|exp| {
                exp.year() == target_year && exp.month() == 1 && *exp > request.entry_date
            })
            .collect();
        candidates.sort();

        if candidates.is_empty() {
            return Err(SelectionError::NoExpirations);
        }
        debug!(
            year = target_year,
            count = candidates.len(),
            "probing January expirations"
        );

        // Probe candidates in order; the first with a complete dataset wins.
        let total = candidates.len();
        for expiration in candidates {
            let chain = market
                .eod_chain(&request.symbol, expiration, request.entry_date)
                .await?;
            if chain.is_empty() {
                debug!(%expiration, "no entry-day chain, trying next expiration");
                continue;
            }

            let calls = itm_calls(&chain, request.spot);
            let strike = match pick_strike(&calls, request.pinned_strike) {
                Ok(strike) => strike,
                Err(_) => {
                    debug!(%expiration, "no usable strike, trying next expiration");
                    continue;
                }
            };

            match price_candidate(
                market,
                splits,
                request,
                expiration,
                strike,
                None,
                self.entry_time_ms,
            )
            .await
            {
                Ok(quote) => {
                    info!(
                        %expiration,
                        strike = %strike_to_dollars(strike),
                        entry = %quote.entry_price,
                        exit = %quote.exit_price,
                        "annual January LEAPS selected"
                    );
                    return Ok(quote);
                }
                Err(SelectionError::NoEntryPrice) | Err(SelectionError::NoExitPrice) => {
                    debug!(%expiration, "incomplete pricing, trying next expiration");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(SelectionError::Exhausted { tested: total })
    }
}

/// Roll a ~15-month LEAPS every quarter.
#[derive(Debug, Clone)]
pub struct RollingFifteenMonthStrategy {
    pub entry_time_ms: u32,
}

impl Default for RollingFifteenMonthStrategy {
    fn default() -> Self {
        Self {
            entry_time_ms: pricing::ENTRY_TIME_MS,
        }
    }
}

impl Strategy for RollingFifteenMonthStrategy {
    fn label(&self) -> &'static str {
        "rolling-15-month"
    }

    async fn select_trade<M: MarketData>(
        &self,
        market: &M,
        splits: &SplitTable,
        request: &TradeRequest,
    ) -> Result<TradeQuote, SelectionError> {
        let target = request
            .entry_date
            .checked_add_months(Months::new(TARGET_MONTHS))
            .unwrap_or(request.entry_date);
        let floor = request.entry_date + chrono::Duration::days(LEAPS_FLOOR_DAYS);

        let available = market
            .expirations_on(&request.symbol, request.entry_date)
            .await?;
        if available.is_empty() {
            return Err(SelectionError::NoExpirations);
        }

        let leaps: Vec<NaiveDate> = available.into_iter().filter(|exp| *exp >= floor).collect();
        if leaps.is_empty() {
            return Err(SelectionError::NoLeapsExpirations);
        }

        let expiration =
            closest_expiration(&leaps, target).ok_or(SelectionError::NoLeapsExpirations)?;
        debug!(
            %expiration,
            %target,
            deviation_days = (expiration - target).num_days().abs(),
            "selected rolling expiration"
        );

        let chain = market
            .eod_chain(&request.symbol, expiration, request.entry_date)
            .await?;
        if chain.is_empty() {
            return Err(SelectionError::NoEntryData);
        }

        let calls = itm_calls(&chain, request.spot);
        if calls.is_empty() {
            return Err(SelectionError::NoEligibleCalls);
        }
        let strike = pick_strike(&calls, request.pinned_strike)?;

        let quote = price_candidate(
            market,
            splits,
            request,
            expiration,
            strike,
            Some(target),
            self.entry_time_ms,
        )
        .await?;
        info!(
            %expiration,
            strike = %strike_to_dollars(strike),
            months = quote.selection.months_to_expiration,
            entry = %quote.entry_price,
            exit = %quote.exit_price,
            "rolling LEAPS selected"
        );
        Ok(quote)
    }
}
