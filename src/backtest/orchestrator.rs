//! Backtest orchestration.
//!
//! One orchestrator drives every strategy through the same period machinery:
//! resolve the entry spot price, let the strategy select and price a
//! contract, size the position against available capital, and carry the
//! period's ending capital into the next period. A period that cannot trade
//! for any recoverable reason leaves capital unchanged and is recorded as a
//! no-trade period; only a missing calendar stops a year.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calendar::{CalendarError, TradingCalendar};
use crate::data::terminal::MarketData;
use crate::data::types::{SplitTable, TradeQuote};
use crate::select::{SelectionError, Strategy, TradeRequest};
use crate::spot::{PriceResolver, Resolution, SpotProvider};

use super::capital::{
    ending_capital, size_exit, size_position, CapitalError, ExitProceeds, PositionSize,
};

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("calendar: {0}")]
    Calendar(#[from] CalendarError),
}

/// Fixed run parameters shared by every period.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub symbol: String,
    pub starting_capital: Decimal,
    pub commission_per_contract: Decimal,
    pub max_contracts_per_trade: u32,
    /// "Today" for most-recent-trading-day logic on the in-progress year.
    pub today: NaiveDate,
}

/// One tradable window in a year's schedule.
#[derive(Debug, Clone)]
pub struct SchedulePeriod {
    pub label: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
}

/// Why a period executed no trade. Capital carries forward unchanged.
#[derive(Debug)]
pub enum SkipReason {
    /// Entry date resolved to a closed market on both providers.
    MarketClosed,
    /// Both spot providers exhausted without an answer.
    SpotUnavailable,
    /// The strategy could not produce a valid contract.
    Selection(SelectionError),
    /// Sizing rejected the entry price.
    Sizing(CapitalError),
    /// Affordable contract count was zero.
    InsufficientCapital,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarketClosed => write!(f, "market closed on entry date"),
            Self::SpotUnavailable => write!(f, "spot price unavailable from both providers"),
            Self::Selection(e) => write!(f, "selection failed: {}", e),
            Self::Sizing(e) => write!(f, "sizing failed: {}", e),
            Self::InsufficientCapital => write!(f, "insufficient capital for one contract"),
        }
    }
}

/// A trade actually executed with sized capital.
#[derive(Debug)]
pub struct ExecutedTrade {
    pub quote: TradeQuote,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub hold_days: i64,
    pub position: PositionSize,
    pub proceeds: ExitProceeds,
    /// Return on the period's full starting capital, in percent.
    pub capital_return_pct: f64,
}

impl ExecutedTrade {
    pub fn is_winner(&self) -> bool {
        self.quote.pnl_per_share() > Decimal::ZERO
    }

    pub fn total_commissions(&self) -> Decimal {
        self.position.entry_commission + self.proceeds.exit_commission
    }
}

/// Outcome of one schedule period.
#[derive(Debug)]
pub enum PeriodOutcome {
    Traded(Box<ExecutedTrade>),
    Skipped(SkipReason),
}

/// One period's accounting.
#[derive(Debug)]
pub struct PeriodResult {
    pub label: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub starting_capital: Decimal,
    pub ending_capital: Decimal,
    pub outcome: PeriodOutcome,
}

impl PeriodResult {
    pub fn trade(&self) -> Option<&ExecutedTrade> {
        match &self.outcome {
            PeriodOutcome::Traded(trade) => Some(trade),
            PeriodOutcome::Skipped(_) => None,
        }
    }
}

/// Aggregate statistics for one strategy-year.
#[derive(Debug, Clone, Default)]
pub struct YearSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub total_pnl: Decimal,
    pub total_return_pct: f64,
    pub avg_hold_days: f64,
    pub avg_months_to_expiration: f64,
    pub avg_deviation_days: f64,
    pub max_deviation_days: i64,
    pub avg_entry_delta: f64,
    pub avg_exit_delta: f64,
    pub avg_entry_iv: f64,
    pub avg_exit_iv: f64,
}

/// Result of one strategy over one year.
#[derive(Debug)]
pub struct YearResult {
    pub year: i32,
    pub strategy: &'static str,
    pub starting_capital: Decimal,
    pub final_capital: Decimal,
    pub total_commissions: Decimal,
    pub periods: Vec<PeriodResult>,
    pub summary: YearSummary,
}

impl YearResult {
    fn build(
        year: i32,
        strategy: &'static str,
        starting_capital: Decimal,
        periods: Vec<PeriodResult>,
    ) -> Self {
        let final_capital = periods
            .last()
            .map(|p| p.ending_capital)
            .unwrap_or(starting_capital);
        let total_commissions = periods
            .iter()
            .filter_map(PeriodResult::trade)
            .map(ExecutedTrade::total_commissions)
            .sum();
        let summary = YearSummary::from_periods(&periods, starting_capital, final_capital);
        Self {
            year,
            strategy,
            starting_capital,
            final_capital,
            total_commissions,
            periods,
            summary,
        }
    }

    pub fn return_pct(&self) -> f64 {
        self.summary.total_return_pct
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

impl YearSummary {
    fn from_periods(periods: &[PeriodResult], starting: Decimal, ending: Decimal) -> Self {
        let trades: Vec<&ExecutedTrade> = periods.iter().filter_map(PeriodResult::trade).collect();

        let total_pnl = ending - starting;
        let total_return_pct = if starting > Decimal::ZERO {
            ((ending - starting) / starting).to_f64().unwrap_or(0.0) * 100.0
        } else {
            0.0
        };

        let hold_days: Vec<f64> = trades.iter().map(|t| t.hold_days as f64).collect();
        let months: Vec<f64> = trades
            .iter()
            .map(|t| t.quote.selection.months_to_expiration)
            .collect();
        let deviations: Vec<i64> = trades
            .iter()
            .filter(|t| t.quote.selection.target_date.is_some())
            .map(|t| t.quote.selection.deviation_days)
            .collect();

        let entry_deltas: Vec<f64> = trades
            .iter()
            .filter_map(|t| t.quote.entry_greeks.map(|g| g.delta))
            .collect();
        let exit_deltas: Vec<f64> = trades
            .iter()
            .filter_map(|t| t.quote.exit_greeks.map(|g| g.delta))
            .collect();
        let entry_ivs: Vec<f64> = trades
            .iter()
            .filter_map(|t| t.quote.entry_greeks.map(|g| g.iv))
            .collect();
        let exit_ivs: Vec<f64> = trades
            .iter()
            .filter_map(|t| t.quote.exit_greeks.map(|g| g.iv))
            .collect();

        Self {
            total_trades: trades.len(),
            winning_trades: trades.iter().filter(|t| t.is_winner()).count(),
            total_pnl,
            total_return_pct,
            avg_hold_days: mean(&hold_days),
            avg_months_to_expiration: mean(&months),
            avg_deviation_days: mean(&deviations.iter().map(|d| *d as f64).collect::<Vec<_>>()),
            max_deviation_days: deviations.iter().copied().max().unwrap_or(0),
            avg_entry_delta: mean(&entry_deltas),
            avg_exit_delta: mean(&exit_deltas),
            avg_entry_iv: mean(&entry_ivs),
            avg_exit_iv: mean(&exit_ivs),
        }
    }
}

/// The backtest driver.
pub struct Backtester<M, P, S> {
    market: M,
    calendar: TradingCalendar,
    spot: PriceResolver<P, S>,
    splits: SplitTable,
    params: RunParams,
}

impl<M, P, S> Backtester<M, P, S>
where
    M: MarketData,
    P: SpotProvider,
    S: SpotProvider,
{
    pub fn new(
        market: M,
        calendar: TradingCalendar,
        spot: PriceResolver<P, S>,
        splits: SplitTable,
        params: RunParams,
    ) -> Self {
        Self {
            market,
            calendar,
            spot,
            splits,
            params,
        }
    }

    pub fn spot_resolver(&self) -> &PriceResolver<P, S> {
        &self.spot
    }

    /// Execute one entry/exit window with the given capital.
    async fn execute_period<St: Strategy>(
        &mut self,
        strategy: &St,
        label: &str,
        entry_date: NaiveDate,
        exit_date: NaiveDate,
        capital: Decimal,
        pinned_strike: Option<i64>,
    ) -> PeriodResult {
        let skip = |reason: SkipReason| PeriodResult {
            label: label.to_string(),
            entry_date,
            exit_date,
            starting_capital: capital,
            ending_capital: capital,
            outcome: PeriodOutcome::Skipped(reason),
        };

        let spot = match self.spot.resolve_open(&self.params.symbol, entry_date).await {
            Resolution::Price(price) => price,
            Resolution::MarketClosed => return skip(SkipReason::MarketClosed),
            Resolution::Unavailable => return skip(SkipReason::SpotUnavailable),
        };
        debug!(%entry_date, %spot, label, "period spot resolved");

        let request = TradeRequest {
            symbol: self.params.symbol.clone(),
            entry_date,
            exit_date,
            spot,
            pinned_strike,
        };
        let quote = match strategy.select_trade(&self.market, &self.splits, &request).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(label, %entry_date, error = %e, "period skipped");
                return skip(SkipReason::Selection(e));
            }
        };

        let position = match size_position(
            capital,
            quote.entry_price,
            self.params.commission_per_contract,
            self.params.max_contracts_per_trade,
        ) {
            Ok(position) => position,
            Err(e) => return skip(SkipReason::Sizing(e)),
        };
        if !position.is_executable() {
            info!(label, %entry_date, "no affordable contracts, capital carried forward");
            return skip(SkipReason::InsufficientCapital);
        }

        let proceeds = size_exit(
            position.contracts,
            quote.exit_price,
            self.params.commission_per_contract,
        );
        let ending = ending_capital(&proceeds, &position);
        let capital_return_pct = if capital > Decimal::ZERO {
            ((ending - capital) / capital).to_f64().unwrap_or(0.0) * 100.0
        } else {
            0.0
        };

        info!(
            label,
            contract = %quote.selection.contract.display_code(),
            contracts = position.contracts,
            entry = %quote.entry_price,
            exit = %quote.exit_price,
            capital_after = %ending,
            "trade executed"
        );

        PeriodResult {
            label: label.to_string(),
            entry_date,
            exit_date,
            starting_capital: capital,
            ending_capital: ending,
            outcome: PeriodOutcome::Traded(Box::new(ExecutedTrade {
                entry_date,
                exit_date,
                hold_days: (exit_date - entry_date).num_days(),
                position,
                proceeds,
                capital_return_pct,
                quote,
            })),
        }
    }

    /// Run a sequence of periods, compounding capital through them.
    ///
    /// With `use_fixed_strike`, the strike of the first executed trade is
    /// pinned for every later period; a period where that exact strike is no
    /// longer eligible becomes a no-trade period.
    pub async fn run_schedule<St: Strategy>(
        &mut self,
        strategy: &St,
        schedule: &[SchedulePeriod],
        starting_capital: Decimal,
        use_fixed_strike: bool,
    ) -> Vec<PeriodResult> {
        let mut capital = starting_capital;
        let mut pinned: Option<i64> = None;
        let mut results = Vec::with_capacity(schedule.len());

        for period in schedule {
            let result = self
                .execute_period(
                    strategy,
                    &period.label,
                    period.entry_date,
                    period.exit_date,
                    capital,
                    pinned,
                )
                .await;

            if use_fixed_strike && pinned.is_none() {
                if let Some(trade) = result.trade() {
                    let strike = trade.quote.selection.contract.strike;
                    pinned = Some(strike);
                    debug!(strike, "fixed strike locked for the year");
                }
            }

            capital = result.ending_capital;
            results.push(result);
        }

        results
    }

    /// Single full-year window: first trading day to last trading day, or to
    /// the most recent trading day for the in-progress year.
    pub async fn annual_schedule(&mut self, year: i32) -> Result<Vec<SchedulePeriod>, BacktestError> {
        let entry_date = self
            .calendar
            .first_trading_day(&self.market, &self.params.symbol, year)
            .await?;
        let exit_date = if year == self.params.today.year() {
            self.calendar
                .most_recent_trading_day(&self.market, &self.params.symbol, self.params.today)
                .await?
        } else {
            self.calendar
                .last_trading_day(&self.market, &self.params.symbol, year)
                .await?
        };

        Ok(vec![SchedulePeriod {
            label: "FY".to_string(),
            entry_date,
            exit_date,
        }])
    }

    /// Four rolling windows: Q1 start -> Q1 end -> Q2 end -> Q3 end ->
    /// Q4 end. For the in-progress year the final exit is capped at the most
    /// recent trading day and future windows are dropped.
    pub async fn quarterly_schedule(
        &mut self,
        year: i32,
    ) -> Result<Vec<SchedulePeriod>, BacktestError> {
        let symbol = self.params.symbol.clone();
        let q1_start = self
            .calendar
            .first_trading_day(&self.market, &symbol, year)
            .await?;

        let mut quarter_ends = Vec::with_capacity(4);
        for quarter in 1..=4 {
            let end = self
                .calendar
                .last_trading_day_of_quarter(&self.market, &symbol, year, quarter)
                .await?;
            quarter_ends.push(end);
        }

        let most_recent = if year == self.params.today.year() {
            Some(
                self.calendar
                    .most_recent_trading_day(&self.market, &symbol, self.params.today)
                    .await?,
            )
        } else {
            None
        };

        let mut schedule = Vec::with_capacity(4);
        let mut entry = Some(q1_start);
        for (idx, end) in quarter_ends.into_iter().enumerate() {
            let label = format!("Q{}", idx + 1);
            let (Some(entry_date), Some(mut exit_date)) = (entry, end) else {
                debug!(label = %label, year, "quarter window incomplete, not scheduled");
                entry = end;
                continue;
            };

            if let Some(cap) = most_recent {
                if entry_date > cap {
                    debug!(label = %label, year, "future quarter, not scheduled");
                    break;
                }
                if exit_date > cap {
                    exit_date = cap;
                }
            }

            if entry_date >= exit_date {
                debug!(label = %label, year, %entry_date, %exit_date, "empty quarter window, not scheduled");
                entry = Some(exit_date);
                continue;
            }

            schedule.push(SchedulePeriod {
                label,
                entry_date,
                exit_date,
            });
            entry = Some(exit_date);
        }

        Ok(schedule)
    }

    /// Buy-January-and-hold for one year, starting from fresh capital.
    pub async fn run_annual_year<St: Strategy>(
        &mut self,
        strategy: &St,
        year: i32,
    ) -> Result<YearResult, BacktestError> {
        let schedule = self.annual_schedule(year).await?;
        let starting = self.params.starting_capital;
        let periods = self.run_schedule(strategy, &schedule, starting, false).await;
        Ok(YearResult::build(year, strategy.label(), starting, periods))
    }

    /// Quarterly rolling strategy for one year, starting from fresh capital.
    pub async fn run_quarterly_year<St: Strategy>(
        &mut self,
        strategy: &St,
        year: i32,
        use_fixed_strike: bool,
    ) -> Result<YearResult, BacktestError> {
        let schedule = self.quarterly_schedule(year).await?;
        let starting = self.params.starting_capital;
        let periods = self
            .run_schedule(strategy, &schedule, starting, use_fixed_strike)
            .await;
        Ok(YearResult::build(year, strategy.label(), starting, periods))
    }
}
