//! Market data access and core types.

pub mod terminal;
pub mod types;

#[cfg(test)]
pub mod fixtures;

pub use terminal::{MarketData, TerminalClient, TerminalError};
pub use types::{
    AtTimeQuote, ContractSelection, EodQuote, GreeksSnapshot, ItmCall, OptionContract,
    OptionRight, SplitEvent, SplitTable, TradeQuote,
};
