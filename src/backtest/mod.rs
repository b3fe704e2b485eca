//! Backtest orchestration, capital management, and reporting.

pub mod capital;
pub mod orchestrator;
pub mod report;

pub use capital::{
    ending_capital, size_exit, size_position, CapitalError, ExitProceeds, PositionSize,
    CONTRACT_MULTIPLIER,
};
pub use orchestrator::{
    Backtester, BacktestError, ExecutedTrade, PeriodOutcome, PeriodResult, RunParams,
    SchedulePeriod, SkipReason, YearResult, YearSummary,
};
pub use report::{render_cache_stats, render_comparison, render_year};
