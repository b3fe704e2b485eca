//! Contract pricing retrieval.
//!
//! Entry pricing is taken at a fixed intraday timestamp for precision; exit
//! pricing uses the end-of-day record. Both express a strict preference
//! order with a data-quality floor, and the exit side distinguishes
//! "contract worth zero" from "no data."

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::data::terminal::{MarketData, TerminalError};
use crate::data::types::{GreeksSnapshot, OptionRight, SplitEvent};

/// 10:00 local exchange time, in milliseconds from midnight.
pub const ENTRY_TIME_MS: u32 = 36_000_000;

/// Entry price for a contract at the configured intraday timestamp.
///
/// Prefers the ask, falls back to the bid; `None` when neither is positive
/// or the strike is absent from the quote set.
pub async fn entry_price<M: MarketData>(
    market: &M,
    symbol: &str,
    expiration: NaiveDate,
    date: NaiveDate,
    strike: i64,
    ms_of_day: u32,
) -> Result<Option<Decimal>, TerminalError> {
    let quotes = market.quotes_at(symbol, expiration, date, ms_of_day).await?;

    for quote in quotes {
        if quote.strike != strike || quote.right != OptionRight::Call {
            continue;
        }
        if quote.ask > Decimal::ZERO {
            return Ok(Some(quote.ask));
        }
        if quote.bid > Decimal::ZERO {
            debug!(strike, %date, "no ask at entry time, using bid");
            return Ok(Some(quote.bid));
        }
        return Ok(None);
    }

    Ok(None)
}

/// End-of-day exit price for a contract.
///
/// Prefers the close, falls back to the bid. A record that exists but holds
/// no positive value means the contract closed worthless and prices at
/// exactly zero; a missing record is `None` (a pricing failure).
pub async fn exit_price<M: MarketData>(
    market: &M,
    symbol: &str,
    expiration: NaiveDate,
    strike: i64,
    date: NaiveDate,
) -> Result<Option<Decimal>, TerminalError> {
    let record = market
        .contract_eod(symbol, expiration, strike, OptionRight::Call, date)
        .await?;

    let record = match record {
        Some(r) => r,
        None => return Ok(None),
    };

    if record.close > Decimal::ZERO {
        return Ok(Some(record.close));
    }
    if record.bid > Decimal::ZERO {
        return Ok(Some(record.bid));
    }
    // Expired or closed at zero.
    Ok(Some(Decimal::ZERO))
}

/// Best-effort Greeks snapshot for a strike. Terminal failures and missing
/// strikes both collapse to `None`; Greeks are reporting-only.
pub async fn greeks_snapshot<M: MarketData>(
    market: &M,
    symbol: &str,
    expiration: NaiveDate,
    date: NaiveDate,
    strike: i64,
) -> Option<GreeksSnapshot> {
    let chain = market.chain_greeks(symbol, expiration, date).await.ok()?;
    chain
        .into_iter()
        .find(|(s, _)| *s == strike)
        .map(|(_, g)| g)
}

/// The post-split strike identifier the exchange lists after a forward
/// split. Exit-side lookups must use this even though P&L accounting keeps
/// the entry strike.
pub fn split_adjusted_strike(strike: i64, split: Option<&SplitEvent>) -> i64 {
    match split {
        Some(event) if event.ratio > 0 => strike / i64::from(event.ratio),
        _ => strike,
    }
}

/// Value of the full post-split position in terms of the single pre-split
/// contract: one pre-split contract became `ratio` post-split contracts.
pub fn split_adjusted_exit_price(raw_exit: Decimal, split: Option<&SplitEvent>) -> Decimal {
    match split {
        Some(event) => raw_exit * Decimal::from(event.ratio),
        None => raw_exit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{call_eod, call_quote, FakeMarket};
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn exp() -> NaiveDate {
        d(2023, 1, 20)
    }

    #[tokio::test]
    async fn test_entry_price_prefers_ask() {
        let mut market = FakeMarket::new();
        market
            .at_time_quotes
            .insert((exp(), d(2022, 1, 3)), vec![call_quote(150_000, dec!(49.5), dec!(50.2))]);

        let price = entry_price(&market, "GOOG", exp(), d(2022, 1, 3), 150_000, ENTRY_TIME_MS)
            .await
            .unwrap();
        assert_eq!(price, Some(dec!(50.2)));
    }

    #[tokio::test]
    async fn test_entry_price_falls_back_to_bid() {
        let mut market = FakeMarket::new();
        market
            .at_time_quotes
            .insert((exp(), d(2022, 1, 3)), vec![call_quote(150_000, dec!(49.5), dec!(0))]);

        let price = entry_price(&market, "GOOG", exp(), d(2022, 1, 3), 150_000, ENTRY_TIME_MS)
            .await
            .unwrap();
        assert_eq!(price, Some(dec!(49.5)));
    }

    #[tokio::test]
    async fn test_entry_price_zero_quote_fails() {
        let mut market = FakeMarket::new();
        market
            .at_time_quotes
            .insert((exp(), d(2022, 1, 3)), vec![call_quote(150_000, dec!(0), dec!(0))]);

        let price = entry_price(&market, "GOOG", exp(), d(2022, 1, 3), 150_000, ENTRY_TIME_MS)
            .await
            .unwrap();
        assert_eq!(price, None);
    }

    #[tokio::test]
    async fn test_entry_price_ignores_puts_and_other_strikes() {
        let mut market = FakeMarket::new();
        let mut put = call_quote(150_000, dec!(9.9), dec!(10.1));
        put.right = OptionRight::Put;
        market.at_time_quotes.insert(
            (exp(), d(2022, 1, 3)),
            vec![put, call_quote(155_000, dec!(40.0), dec!(41.0))],
        );

        let price = entry_price(&market, "GOOG", exp(), d(2022, 1, 3), 150_000, ENTRY_TIME_MS)
            .await
            .unwrap();
        assert_eq!(price, None);
    }

    #[tokio::test]
    async fn test_exit_price_prefers_close_then_bid() {
        let mut market = FakeMarket::new();
        market.contract_eods.insert(
            (exp(), 150_000, d(2022, 12, 30)),
            call_eod(150_000, dec!(61.0), dec!(60.5), dec!(61.5)),
        );
        market.contract_eods.insert(
            (exp(), 155_000, d(2022, 12, 30)),
            call_eod(155_000, dec!(0), dec!(58.0), dec!(59.0)),
        );

        let close = exit_price(&market, "GOOG", exp(), 150_000, d(2022, 12, 30))
            .await
            .unwrap();
        assert_eq!(close, Some(dec!(61.0)));

        let bid = exit_price(&market, "GOOG", exp(), 155_000, d(2022, 12, 30))
            .await
            .unwrap();
        assert_eq!(bid, Some(dec!(58.0)));
    }

    #[tokio::test]
    async fn test_exit_price_all_zero_record_is_worthless() {
        let mut market = FakeMarket::new();
        market.contract_eods.insert(
            (exp(), 150_000, d(2022, 12, 30)),
            call_eod(150_000, dec!(0), dec!(0), dec!(0)),
        );

        let price = exit_price(&market, "GOOG", exp(), 150_000, d(2022, 12, 30))
            .await
            .unwrap();
        assert_eq!(price, Some(dec!(0)));
    }

    #[tokio::test]
    async fn test_exit_price_missing_record_is_none() {
        let market = FakeMarket::new();
        let price = exit_price(&market, "GOOG", exp(), 150_000, d(2022, 12, 30))
            .await
            .unwrap();
        assert_eq!(price, None);
    }

    #[test]
    fn test_split_adjustments() {
        let split = SplitEvent {
            symbol: "GOOG".to_string(),
            date: d(2022, 7, 15),
            ratio: 20,
        };

        // $150.00 entry strike becomes the $7.50 post-split identifier.
        assert_eq!(split_adjusted_strike(150_000, Some(&split)), 7_500);
        assert_eq!(split_adjusted_strike(150_000, None), 150_000);

        // The raw post-split price is scaled back up by the ratio.
        assert_eq!(
            split_adjusted_exit_price(dec!(3.20), Some(&split)),
            dec!(64.00)
        );
        assert_eq!(split_adjusted_exit_price(dec!(3.20), None), dec!(3.20));
    }

    #[tokio::test]
    async fn test_greeks_best_effort() {
        let mut market = FakeMarket::new();
        market.greeks.insert(
            (exp(), d(2022, 1, 3)),
            vec![(
                150_000,
                GreeksSnapshot {
                    delta: 0.82,
                    theta: -0.03,
                    vega: 0.4,
                    gamma: 0.002,
                    iv: 0.29,
                },
            )],
        );

        let greeks = greeks_snapshot(&market, "GOOG", exp(), d(2022, 1, 3), 150_000).await;
        assert!((greeks.unwrap().delta - 0.82).abs() < 1e-9);

        // Absent strike: no Greeks, no error.
        let missing = greeks_snapshot(&market, "GOOG", exp(), d(2022, 1, 3), 100_000).await;
        assert!(missing.is_none());
    }
}
