//! # Run both strategies over the default year range
//! leaps-backtest run
//!
//! # Quarterly rolling only, fixed strikes, custom capital
//! leaps-backtest run --strategy quarterly --use-fixed-strikes --capital 250000
//!
//! # Inspect the price-resolution cache
//! leaps-backtest cache-stats

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use leaps_backtest::backtest::{render_cache_stats, render_comparison, render_year};
use leaps_backtest::{
    AnnualJanuaryStrategy, ApiKeys, Backtester, Config, JsonFileStore, MarketStackClient,
    PriceResolver, RollingFifteenMonthStrategy, RunParams, TerminalClient, TiingoClient,
    TradingCalendar, YearResult,
};

#[derive(Parser)]
#[command(name = "leaps-backtest")]
#[command(about = "LEAPS strategy backtesting with capital compounding")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Annual,
    Quarterly,
    Both,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backtest
    Run {
        /// Strategy to test
        #[arg(long, value_enum, default_value = "both")]
        strategy: StrategyArg,

        /// Fresh starting capital for each year
        #[arg(long)]
        capital: Option<f64>,

        /// Commission per contract per side
        #[arg(long)]
        commission: Option<f64>,

        /// Maximum contracts per trade
        #[arg(long)]
        max_contracts: Option<u32>,

        /// First year to test
        #[arg(long)]
        start_year: Option<i32>,

        /// Last year to test (defaults to the current year)
        #[arg(long)]
        end_year: Option<i32>,

        /// Reuse the first successful quarter's strike for the whole year
        #[arg(long)]
        use_fixed_strikes: bool,

        /// Underlying symbol
        #[arg(long)]
        symbol: Option<String>,

        /// Suppress per-trade logging; show only the final tables
        #[arg(short, long)]
        quiet: bool,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show price-resolution cache statistics
    CacheStats {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(quiet: bool) {
    let default_filter = if quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn decimal_arg(value: Option<f64>, fallback: Decimal, what: &str) -> Result<Decimal> {
    match value {
        None => Ok(fallback),
        Some(v) => Decimal::try_from(v).with_context(|| format!("invalid {}: {}", what, v)),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            strategy,
            capital,
            commission,
            max_contracts,
            start_year,
            end_year,
            use_fixed_strikes,
            symbol,
            quiet,
            config,
        } => {
            init_tracing(quiet);

            let mut config = Config::load(config.as_deref())?;
            if let Some(symbol) = symbol {
                config.symbol = symbol;
            }
            config.starting_capital =
                decimal_arg(capital, config.starting_capital, "capital")?;
            config.commission_per_contract =
                decimal_arg(commission, config.commission_per_contract, "commission")?;
            if let Some(max) = max_contracts {
                config.max_contracts_per_trade = max;
            }
            if let Some(year) = start_year {
                config.start_year = year;
            }
            if let Some(year) = end_year {
                config.end_year = Some(year);
            }

            run_backtest(config, strategy, use_fixed_strikes, quiet).await
        }

        Commands::CacheStats { config } => {
            init_tracing(false);
            let config = Config::load(config.as_deref())?;
            let resolver = build_resolver(&config);
            println!("{}", render_cache_stats(&resolver.stats()));
            Ok(())
        }
    }
}

fn build_resolver(config: &Config) -> PriceResolver<TiingoClient, MarketStackClient> {
    let keys = ApiKeys::from_env();
    PriceResolver::new(
        TiingoClient::new(keys.tiingo),
        MarketStackClient::new(keys.marketstack),
        Box::new(JsonFileStore::open(&config.price_cache)),
    )
}

async fn run_backtest(
    config: Config,
    strategy: StrategyArg,
    use_fixed_strikes: bool,
    quiet: bool,
) -> Result<()> {
    let terminal = TerminalClient::new(config.terminal_url.clone())?;
    match terminal.is_connected().await {
        Ok(true) => {}
        Ok(false) => bail!(
            "market-data terminal at {} is not connected to its feed",
            config.terminal_url
        ),
        Err(e) => bail!(
            "market-data terminal at {} is unreachable: {}",
            config.terminal_url,
            e
        ),
    }

    let today = Local::now().date_naive();
    let end_year = config.end_year.unwrap_or(today.year()).min(today.year());
    let years: Vec<i32> = (config.start_year..=end_year).collect();
    if years.is_empty() {
        bail!(
            "empty year range {}..={}",
            config.start_year,
            end_year
        );
    }

    let params = RunParams {
        symbol: config.symbol.clone(),
        starting_capital: config.starting_capital,
        commission_per_contract: config.commission_per_contract,
        max_contracts_per_trade: config.max_contracts_per_trade,
        today,
    };
    let calendar = TradingCalendar::new(Box::new(JsonFileStore::open(&config.calendar_cache)));
    let resolver = build_resolver(&config);
    let mut backtester = Backtester::new(
        terminal,
        calendar,
        resolver,
        config.split_table(),
        params,
    );

    let annual_strategy = AnnualJanuaryStrategy {
        entry_time_ms: config.entry_time_ms,
    };
    let quarterly_strategy = RollingFifteenMonthStrategy {
        entry_time_ms: config.entry_time_ms,
    };

    let progress = if quiet {
        let bar = ProgressBar::new(years.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} years")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(format!("backtesting {}", config.symbol));
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut annual_results: Vec<YearResult> = Vec::new();
    let mut quarterly_results: Vec<YearResult> = Vec::new();

    for year in years {
        if matches!(strategy, StrategyArg::Annual | StrategyArg::Both) {
            match backtester.run_annual_year(&annual_strategy, year).await {
                Ok(result) => {
                    if !quiet {
                        println!("{}", render_year(&result));
                    }
                    annual_results.push(result);
                }
                Err(e) => warn!(year, error = %e, "annual backtest failed for year"),
            }
        }

        if matches!(strategy, StrategyArg::Quarterly | StrategyArg::Both) {
            match backtester
                .run_quarterly_year(&quarterly_strategy, year, use_fixed_strikes)
                .await
            {
                Ok(result) => {
                    if !quiet {
                        println!("{}", render_year(&result));
                    }
                    quarterly_results.push(result);
                }
                Err(e) => warn!(year, error = %e, "quarterly backtest failed for year"),
            }
        }

        progress.inc(1);
    }
    progress.finish_and_clear();

    if annual_results.is_empty() && quarterly_results.is_empty() {
        bail!("no year produced a result; check the terminal and calendar data");
    }

    println!("{}", render_comparison(&annual_results, &quarterly_results));
    if use_fixed_strikes {
        println!("Fixed strikes: enabled for the quarterly strategy");
    }

    Ok(())
}
