//! Momentum Trading Platform
//!
//! Fetches and caches daily equity bars, ranks a universe by regression
//! momentum behind a market regime filter, rebalances a paper portfolio on
//! Wednesdays and routes orders through a simulated broker.

mod api;
mod clock;
mod db;
mod deadline;
mod error;
mod execution;
mod market_data;
mod metrics;
mod models;
mod platform;
mod services;
mod signals;
mod trading;

#[cfg(test)]
mod test_support;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::deadline::Deadline;
use crate::models::{PortfolioState, PricePoint};
use crate::platform::{parse_symbols, Platform, PlatformConfig};
use crate::services::{BatchRequest, DataService, PortfolioService, SeriesRequest, SignalRequest, StrategyService};
use crate::signals::{MomentumStrategy, StrategyParameters};
use crate::trading::RebalanceGate;

/// Upper bound on a single CLI data request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Momentum trading platform CLI.
#[derive(Parser)]
#[command(name = "momentum-trader")]
#[command(about = "Momentum equity signals, rebalancing and simulated execution", long_about = None)]
struct Cli {
    /// Database URL (overrides MOMENTUM_DATABASE_URL)
    #[arg(short, long)]
    database: Option<String>,

    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Rebalance day enforcement (strict, permissive)
    #[arg(long, env = "MOMENTUM_GATE")]
    gate: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch bars for one symbol
    Fetch {
        symbol: String,

        /// Start date (YYYY-MM-DD or epoch seconds)
        #[arg(short, long)]
        start: String,

        /// End date (YYYY-MM-DD or epoch seconds)
        #[arg(short, long)]
        end: String,

        /// Bar interval
        #[arg(short, long, default_value = "1d")]
        interval: String,
    },

    /// Fetch bars for several symbols
    Batch {
        /// Comma separated symbols
        symbols: String,

        #[arg(short, long)]
        start: String,

        #[arg(short, long)]
        end: String,
    },

    /// Generate momentum signals
    Signals {
        /// Comma separated symbols (configured universe when absent)
        #[arg(long)]
        symbols: Option<String>,

        /// Signal date (today when absent)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Strategy parameter override, e.g. --param top_percentage=0.4
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Run the weekly (or biweekly) rebalance
    Rebalance {
        /// Rebalance date (today when absent)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Weekly pass plus a resize of every holding
        #[arg(long)]
        biweekly: bool,
    },

    /// Route risk-weighted target orders through the execution simulator
    Submit {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show the current portfolio
    Status,

    /// Show stored portfolio snapshots
    History {
        #[arg(short, long)]
        start: NaiveDate,

        #[arg(short, long)]
        end: NaiveDate,
    },

    /// Refresh stored bars for the trailing year
    UpdateLatest {
        /// Comma separated symbols (configured universe plus index when absent)
        #[arg(long)]
        symbols: Option<String>,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = PlatformConfig::from_env();
    if let Some(database) = cli.database {
        config.database_url = database;
    }
    if let Some(gate) = &cli.gate {
        config.reconciler.gate = RebalanceGate::from_str(gate);
    }

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let platform = Platform::build(config).await.context("Failed to start platform")?;
    let _sweeper = platform.market_data.start_sweeper();

    match cli.command {
        Commands::Fetch {
            symbol,
            start,
            end,
            interval,
        } => {
            let mut request = SeriesRequest::new(symbol.to_uppercase(), start, end);
            request.interval = interval;

            let points = platform
                .market_data
                .get_stock_data(&request, Deadline::after(REQUEST_TIMEOUT))
                .await
                .with_context(|| format!("Failed to fetch {}", request.symbol))?;

            print_bars(&points);
        }

        Commands::Batch { symbols, start, end } => {
            let request = BatchRequest::new(parse_symbols(&symbols), start, end);
            let batch = platform
                .market_data
                .get_batch_stock_data(&request, Deadline::after(REQUEST_TIMEOUT))
                .await?;

            println!("\n{:<10} {:>8} {:>12} {:>12}", "SYMBOL", "BARS", "FIRST", "LAST CLOSE");
            println!("{}", "-".repeat(46));
            let mut symbols: Vec<_> = batch.series.keys().collect();
            symbols.sort();
            for symbol in symbols {
                let points = &batch.series[symbol];
                let first = points.first().map(|p| format_day(p.timestamp)).unwrap_or_default();
                let last = points.last().map(|p| p.close).unwrap_or(0.0);
                println!("{:<10} {:>8} {:>12} {:>12.2}", symbol, points.len(), first, last);
            }

            if !batch.errors.is_empty() {
                println!("\n--- Failed ({}) ---", batch.errors.len());
                for (symbol, error) in &batch.errors {
                    println!("  {:<10} {}", symbol, error);
                }
            }
        }

        Commands::Signals { symbols, date, params } => {
            if !params.is_empty() {
                let updates = parse_params(&params)?;
                platform
                    .signals
                    .configure_strategy(MomentumStrategy::NAME, &updates)
                    .await
                    .context("Invalid strategy parameters")?;

                let effective = platform.signals.strategy_parameters(MomentumStrategy::NAME).await?;
                println!("\n=== Strategy Parameters ===");
                for (name, value) in &effective {
                    println!("  {:<22} {}", name, value);
                }
            }

            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let symbols = symbols
                .map(|s| parse_symbols(&s))
                .unwrap_or_else(|| platform.config.reconciler.universe.clone());
            let start = date - ChronoDuration::days(platform.config.reconciler.history_days);
            let request = SignalRequest::new(symbols, start.to_string(), date.to_string());

            let report = platform
                .signals
                .generate_signals(&request, Deadline::after(REQUEST_TIMEOUT))
                .await?;

            println!("\nMarket regime: {:?}", report.regime);
            if report.signals.is_empty() {
                println!("No signals.");
                return Ok(());
            }

            println!("\n{:<10} {:>6} {:>12} {:>12} {:>10}", "SYMBOL", "SIDE", "MOMENTUM", "RISK UNIT", "PRICE");
            println!("{}", "-".repeat(54));
            for signal in &report.signals {
                println!(
                    "{:<10} {:>6} {:>12.4} {:>12.6} {:>10.2}",
                    signal.symbol,
                    format!("{:?}", signal.direction).to_uppercase(),
                    signal.momentum_score,
                    signal.risk_unit,
                    signal.reference_price
                );
            }
        }

        Commands::Rebalance { date, biweekly } => {
            let portfolio: &dyn PortfolioService = platform.reconciler.as_ref();
            let outcome = if biweekly {
                portfolio.biweekly_rebalance(date).await?
            } else {
                portfolio.weekly_rebalance(date).await?
            };

            println!("\n=== {:?} Rebalance ===", outcome.kind);
            println!("Regime: {:?}", outcome.regime);
            println!("Trades: {}", outcome.trades.len());
            for trade in &outcome.trades {
                println!("  {:<5} {:<10} {:>8} @ {:.2}", trade.side, trade.symbol, trade.quantity, trade.price);
            }
            print_portfolio(&outcome.status);
        }

        Commands::Submit { date } => {
            let outcome = platform.reconciler.submit_orders(date).await?;

            println!("\n=== Order Submission ===");
            println!("Orders: {}", outcome.orders.len());
            if let Some(batch) = &outcome.execution {
                println!("Execution: {}", batch.id);
                println!(
                    "\n{:<10} {:<5} {:>10} {:>10} {:>12} {:<16}",
                    "SYMBOL", "SIDE", "REQUESTED", "FILLED", "AVG PRICE", "STATUS"
                );
                println!("{}", "-".repeat(68));
                for result in &batch.results {
                    println!(
                        "{:<10} {:<5} {:>10} {:>10} {:>12.2} {:<16?}",
                        result.symbol,
                        result.side,
                        result.requested_quantity,
                        result.filled_quantity,
                        result.average_price,
                        result.status
                    );
                }

                let stored = platform.simulator.status(batch.id).await?;
                info!(execution_id = %stored.id, results = stored.results.len(), "Execution recorded");
            }
            print_portfolio(&outcome.status);
        }

        Commands::Status => {
            let state = platform.reconciler.portfolio_status().await?;
            print_portfolio(&state);
        }

        Commands::History { start, end } => {
            let history = platform.reconciler.portfolio_history(start, end).await?;
            if history.is_empty() {
                println!("No portfolio snapshots between {} and {}.", start, end);
                return Ok(());
            }

            println!("\n{:>8} {:<12} {:>10} {:>16} {:>16}", "VERSION", "DATE", "POSITIONS", "CASH", "TOTAL");
            println!("{}", "-".repeat(66));
            for state in &history {
                println!(
                    "{:>8} {:<12} {:>10} {:>16.2} {:>16.2}",
                    state.version,
                    state.date,
                    state.positions.len(),
                    state.cash_balance,
                    state.total_value
                );
            }
        }

        Commands::UpdateLatest { symbols } => {
            let symbols = match symbols {
                Some(s) => parse_symbols(&s),
                None => {
                    let mut all = platform.config.reconciler.universe.clone();
                    all.push(platform.config.index_symbol.clone());
                    all
                }
            };

            let updated = platform
                .market_data
                .update_latest(&symbols, Deadline::after(REQUEST_TIMEOUT))
                .await?;
            println!("Updated {} of {} symbols.", updated, symbols.len());
        }

        Commands::Config => {}
    }

    Ok(())
}

/// Parse `name=value` pairs into strategy parameter updates.
fn parse_params(raw: &[String]) -> Result<StrategyParameters> {
    let mut updates = StrategyParameters::new();
    for pair in raw {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected name=value, got {}", pair))?;
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("Parameter {} is not a number", name))?;
        updates.insert(name.trim().to_string(), value);
    }
    Ok(updates)
}

fn format_day(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|d| d.date_naive().to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn print_bars(points: &[PricePoint]) {
    println!(
        "\n{:<12} {:>10} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "DATE", "OPEN", "HIGH", "LOW", "CLOSE", "ADJ", "VOLUME"
    );
    println!("{}", "-".repeat(80));
    for p in points {
        println!(
            "{:<12} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>12}",
            format_day(p.timestamp),
            p.open,
            p.high,
            p.low,
            p.close,
            p.adjusted_close,
            p.volume
        );
    }
    println!("\n{} bars", points.len());
}

fn print_portfolio(state: &PortfolioState) {
    println!("\n=== Portfolio ({}) ===", state.date);
    println!("Version:          {}", state.version);
    println!("Cash:             ${:.2}", state.cash_balance);
    println!("Total Value:      ${:.2}", state.total_value);

    if state.positions.is_empty() {
        println!("\nNo open positions.");
        return;
    }

    println!(
        "\n{:<10} {:>10} {:>12} {:>12} {:>14}",
        "SYMBOL", "SHARES", "AVG PRICE", "LAST", "VALUE"
    );
    println!("{}", "-".repeat(62));
    for position in state.positions.values() {
        println!(
            "{:<10} {:>10} {:>12.2} {:>12.2} {:>14.2}",
            position.symbol, position.quantity, position.average_price, position.current_price, position.market_value
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let updates = parse_params(&["top_percentage=0.4".to_string(), " lookback_period = 60".to_string()]).unwrap();
        assert_eq!(updates["top_percentage"], 0.4);
        assert_eq!(updates["lookback_period"], 60.0);

        assert!(parse_params(&["nonsense".to_string()]).is_err());
        assert!(parse_params(&["risk_factor=abc".to_string()]).is_err());
    }

    #[test]
    fn test_format_day() {
        assert_eq!(format_day(1_577_923_200), "2020-01-02");
    }

    #[test]
    fn test_cli_parses_rebalance() {
        let cli = Cli::try_parse_from(["momentum-trader", "--gate", "permissive", "rebalance", "--date", "2021-06-09", "--biweekly"])
            .unwrap();
        assert_eq!(cli.gate.as_deref(), Some("permissive"));
        match cli.command {
            Commands::Rebalance { date, biweekly } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2021, 6, 9));
                assert!(biweekly);
            }
            _ => panic!("expected rebalance"),
        }
    }
}
