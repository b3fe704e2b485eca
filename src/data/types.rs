//! Core data types for LEAPS backtesting.
//!
//! Strikes are carried as `i64` thousandths of a dollar ("fixed-point")
//! everywhere, matching the wire format of the market-data terminal. They are
//! only converted to dollars for display. Comparing strikes in this unit
//! avoids floating-point mismatches when pinning a strike across quarters.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Average days per month, used to report months-to-expiration.
pub const DAYS_PER_MONTH: f64 = 30.4375;

/// Option right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    pub fn from_code(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// Convert a fixed-point strike (thousandths of a dollar) to dollars.
pub fn strike_to_dollars(strike: i64) -> Decimal {
    Decimal::new(strike, 3)
}

/// Convert a dollar spot price into the fixed-point strike unit.
pub fn spot_to_fixed(spot: Decimal) -> i64 {
    (spot * dec!(1000)).round().to_i64().unwrap_or(0)
}

/// An option contract identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying root symbol (e.g., "GOOG").
    pub symbol: String,

    /// Expiration date.
    pub expiration: NaiveDate,

    /// Strike in thousandths of a dollar.
    pub strike: i64,

    /// Call or put.
    pub right: OptionRight,
}

impl OptionContract {
    /// Render the OCC-style contract code used in trade logs,
    /// e.g. `GOOG240119C00150000`.
    pub fn display_code(&self) -> String {
        format!(
            "{}{}{}{:08}",
            self.symbol,
            self.expiration.format("%y%m%d"),
            self.right.as_code(),
            self.strike
        )
    }
}

/// Greeks snapshot for a contract on a date. Fetched best-effort; absence
/// never fails a trade.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GreeksSnapshot {
    pub delta: f64,
    pub theta: f64,
    pub vega: f64,
    pub gamma: f64,
    pub iv: f64,
}

/// End-of-day record for one contract.
#[derive(Debug, Clone)]
pub struct EodQuote {
    pub strike: i64,
    pub right: OptionRight,
    pub close: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Intraday quote for one contract at a fixed millisecond offset.
#[derive(Debug, Clone)]
pub struct AtTimeQuote {
    pub strike: i64,
    pub right: OptionRight,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// An in-the-money call that passed the data-quality gate, with its
/// fixed-point distance from the spot price.
#[derive(Debug, Clone)]
pub struct ItmCall {
    pub strike: i64,
    pub distance: i64,
    pub close: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// The contract a strategy picked for one trade.
#[derive(Debug, Clone)]
pub struct ContractSelection {
    pub contract: OptionContract,

    /// Target expiration date, when the strategy has one (rolling only).
    pub target_date: Option<NaiveDate>,

    /// Actual months to expiration from the entry date.
    pub months_to_expiration: f64,

    /// Absolute deviation in days from the target date (0 without a target).
    pub deviation_days: i64,
}

/// A known corporate action. Loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEvent {
    pub symbol: String,
    pub date: NaiveDate,
    pub ratio: u32,
}

/// Table of known split events for strike adjustment.
#[derive(Debug, Clone, Default)]
pub struct SplitTable {
    events: Vec<SplitEvent>,
}

impl SplitTable {
    pub fn new(events: Vec<SplitEvent>) -> Self {
        Self { events }
    }

    /// Find a split for `symbol` whose date falls inside the holding window
    /// (entry and exit inclusive).
    pub fn spanning(&self, symbol: &str, entry: NaiveDate, exit: NaiveDate) -> Option<&SplitEvent> {
        self.events
            .iter()
            .find(|e| e.symbol == symbol && entry <= e.date && e.date <= exit)
    }
}

/// A fully priced contract selection, ready for capital sizing.
///
/// `exit_price` is already split-adjusted: when the holding window spans a
/// split it is the raw post-split price multiplied by the split ratio. It
/// must never be multiplied again downstream.
#[derive(Debug, Clone)]
pub struct TradeQuote {
    pub selection: ContractSelection,

    /// Strike used for the exit-side lookup (post-split identifier).
    pub exit_strike: i64,

    /// Entry price per share at the fixed intraday timestamp.
    pub entry_price: Decimal,

    /// Exit price per share, split-adjusted.
    pub exit_price: Decimal,

    pub entry_greeks: Option<GreeksSnapshot>,
    pub exit_greeks: Option<GreeksSnapshot>,

    /// The split applied to the exit side, if any.
    pub split: Option<SplitEvent>,
}

impl TradeQuote {
    /// P&L per share of the underlying lot.
    pub fn pnl_per_share(&self) -> Decimal {
        self.exit_price - self.entry_price
    }

    /// Per-contract return percentage.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price.is_zero() {
            return 0.0;
        }
        (self.pnl_per_share() / self.entry_price)
            .to_f64()
            .unwrap_or(0.0)
            * 100.0
    }
}
