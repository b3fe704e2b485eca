//! Plain-text result rendering.
//!
//! Builds the per-year trade log, the annual-vs-quarterly comparison table,
//! and the price-cache statistics block as strings; the binary decides where
//! they go.

use rust_decimal::Decimal;

use crate::data::types::strike_to_dollars;
use crate::spot::CacheStats;

use super::orchestrator::{PeriodOutcome, YearResult};

const RULE: &str = "------------------------------------------------------------------------";

/// Detailed trade log for one strategy-year.
pub fn render_year(result: &YearResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} {} | start ${:.2} -> end ${:.2} ({:+.1}%)\n",
        result.year,
        result.strategy,
        result.starting_capital,
        result.final_capital,
        result.return_pct(),
    ));

    for period in &result.periods {
        match &period.outcome {
            PeriodOutcome::Traded(trade) => {
                out.push_str(&format!(
                    "  {}: buy {} x {} @ ${:.2} on {} -> sell @ ${:.2} on {} ({:+.1}%)\n",
                    period.label,
                    trade.position.contracts,
                    trade.quote.selection.contract.display_code(),
                    trade.quote.entry_price,
                    period.entry_date,
                    trade.quote.exit_price,
                    period.exit_date,
                    trade.capital_return_pct,
                ));
                out.push_str(&format!(
                    "      strike ${:.2}, {:.1} months out, hold {} days, utilization {:.1}%, capital ${:.2}\n",
                    strike_to_dollars(trade.quote.selection.contract.strike),
                    trade.quote.selection.months_to_expiration,
                    trade.hold_days,
                    trade.position.utilization_pct,
                    period.ending_capital,
                ));
                if let Some(split) = &trade.quote.split {
                    out.push_str(&format!(
                        "      split {}:1 on {}, exit lookup strike ${:.2}\n",
                        split.ratio,
                        split.date,
                        strike_to_dollars(trade.quote.exit_strike),
                    ));
                }
            }
            PeriodOutcome::Skipped(reason) => {
                out.push_str(&format!(
                    "  {}: no trade ({} -> {}): {}\n",
                    period.label, period.entry_date, period.exit_date, reason
                ));
            }
        }
    }

    out
}

/// Yearly summary line used in the comparison table.
fn summary_row(result: &YearResult) -> String {
    let s = &result.summary;
    let win_rate = if s.total_trades > 0 {
        s.winning_trades as f64 / s.total_trades as f64 * 100.0
    } else {
        0.0
    };
    format!(
        "{:<6} | {:<16} | {:>8.1}% | {:>12.2} | {:>7} | {:>8.1}% | {:>8.2} | {:>8.2} | {:>8.3} | {:>8.3}",
        result.year,
        result.strategy,
        result.return_pct(),
        result.final_capital,
        s.total_trades,
        win_rate,
        s.avg_entry_delta,
        s.avg_exit_delta,
        s.avg_entry_iv,
        s.avg_exit_iv,
    )
}

/// Side-by-side comparison of both strategies across years.
pub fn render_comparison(annual: &[YearResult], quarterly: &[YearResult]) -> String {
    let mut out = String::new();
    out.push_str("STRATEGY COMPARISON: ANNUAL vs QUARTERLY ROLLING LEAPS\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!(
        "{:<6} | {:<16} | {:>9} | {:>12} | {:>7} | {:>9} | {:>8} | {:>8} | {:>8} | {:>8}\n",
        "Year",
        "Strategy",
        "Return",
        "Capital",
        "Trades",
        "Win Rate",
        "Entry D",
        "Exit D",
        "Entry IV",
        "Exit IV",
    ));
    out.push_str(RULE);
    out.push('\n');

    let mut years: Vec<i32> = annual
        .iter()
        .map(|r| r.year)
        .chain(quarterly.iter().map(|r| r.year))
        .collect();
    years.sort_unstable();
    years.dedup();

    for year in years {
        if let Some(result) = annual.iter().find(|r| r.year == year) {
            out.push_str(&summary_row(result));
            out.push('\n');
        }
        if let Some(result) = quarterly.iter().find(|r| r.year == year) {
            out.push_str(&summary_row(result));
            out.push('\n');
        }
    }
    out.push_str(RULE);
    out.push('\n');

    for (label, results) in [("Annual", annual), ("Quarterly", quarterly)] {
        if results.is_empty() {
            continue;
        }
        let returns: Vec<f64> = results.iter().map(|r| r.return_pct()).collect();
        let avg = returns.iter().sum::<f64>() / returns.len() as f64;
        let wins = returns.iter().filter(|r| **r > 0.0).count();
        let best = returns.iter().cloned().fold(f64::MIN, f64::max);
        let worst = returns.iter().cloned().fold(f64::MAX, f64::min);
        let commissions: Decimal = results.iter().map(|r| r.total_commissions).sum();

        out.push_str(&format!(
            "{} strategy: avg return {:+.1}%, winning years {}/{}, best {:+.1}%, worst {:+.1}%, commissions ${:.2}\n",
            label,
            avg,
            wins,
            returns.len(),
            best,
            worst,
            commissions,
        ));
    }

    out
}

/// Price-resolution cache statistics block.
pub fn render_cache_stats(stats: &CacheStats) -> String {
    let mut out = String::new();
    out.push_str("PRICE CACHE STATISTICS\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("Total entries: {}\n", stats.total_entries));

    for (provider, s) in &stats.by_provider {
        out.push_str(&format!(
            "{:<12} total {:>5}  success {:>5}  market-closed {:>5}  failures {:>5}\n",
            provider, s.total, s.success, s.market_closed, s.failures
        ));
    }

    let successes: usize = stats.by_provider.iter().map(|(_, s)| s.success).sum();
    if stats.total_entries > 0 {
        out.push_str(&format!(
            "Cache efficiency: {:.1}% successful lookups\n",
            successes as f64 / stats.total_entries as f64 * 100.0
        ));
    }

    out
}
