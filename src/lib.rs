pub mod backtest;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod data;
pub mod pricing;
pub mod select;
pub mod spot;

// Re-export commonly used types
pub use backtest::{Backtester, RunParams, YearResult};
pub use cache::{JsonFileStore, KvStore, MemoryStore};
pub use calendar::TradingCalendar;
pub use config::{ApiKeys, Config};
pub use data::{MarketData, OptionContract, SplitEvent, SplitTable, TerminalClient, TradeQuote};
pub use select::{AnnualJanuaryStrategy, RollingFifteenMonthStrategy, Strategy};
pub use spot::{MarketStackClient, PriceOutcome, PriceResolver, Resolution, TiingoClient};
