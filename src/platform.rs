//! Platform wiring: one configuration, every service built and connected.
//!
//! Handles:
//! - Loading configuration from defaults, `.env` and `MOMENTUM_*` variables
//! - Opening the SQLite store shared by market data and portfolio state
//! - Connecting market data -> signals -> reconciler -> execution simulator

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::ChartClient;
use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::execution::{CashSettlement, SimulatorConfig, TradeExecutionSimulator};
use crate::market_data::{MarketDataConfig, MarketDataService};
use crate::signals::{MomentumParameters, MomentumStrategy, SignalService, DEFAULT_INDEX_SYMBOL};
use crate::trading::{PortfolioReconciler, RebalanceGate, ReconcilerConfig, SizingBase};

/// Effective platform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// SQLite connection string
    pub database_url: String,

    /// Chart API base URL (public endpoint when absent)
    pub provider_base_url: Option<String>,

    /// Index used for regime detection
    pub index_symbol: String,

    pub market_data: MarketDataConfig,
    pub strategy: MomentumParameters,
    pub reconciler: ReconcilerConfig,
    pub simulator: SimulatorConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./momentum.db?mode=rwc".to_string(),
            provider_base_url: None,
            index_symbol: DEFAULT_INDEX_SYMBOL.to_string(),
            market_data: MarketDataConfig::default(),
            strategy: MomentumParameters::default(),
            reconciler: ReconcilerConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Defaults overridden by `.env` and the process environment.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "Loaded environment file");
        }

        let mut config = Self::default();

        if let Ok(url) = std::env::var("MOMENTUM_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(url) = std::env::var("MOMENTUM_PROVIDER_URL") {
            config.provider_base_url = Some(url);
        }
        if let Ok(symbol) = std::env::var("MOMENTUM_INDEX_SYMBOL") {
            config.index_symbol = symbol;
        }
        if let Ok(universe) = std::env::var("MOMENTUM_UNIVERSE") {
            config.reconciler.universe = parse_symbols(&universe);
        }
        if let Some(cash) = env_parse::<Decimal>("MOMENTUM_INITIAL_CASH") {
            config.reconciler.initial_cash = cash;
            config.simulator.initial_cash = cash;
        }
        if let Ok(gate) = std::env::var("MOMENTUM_GATE") {
            config.reconciler.gate = RebalanceGate::from_str(&gate);
        }
        if let Ok(base) = std::env::var("MOMENTUM_SIZING_BASE") {
            config.reconciler.sizing_base = SizingBase::from_str(&base);
        }
        if let Ok(mode) = std::env::var("MOMENTUM_CASH_SETTLEMENT") {
            config.simulator.cash_settlement = CashSettlement::from_str(&mode);
        }
        if let Some(seed) = env_parse::<u64>("MOMENTUM_SIM_SEED") {
            config.simulator.seed = Some(seed);
        }
        if let Some(rate) = env_parse::<f64>("MOMENTUM_RATE_LIMIT") {
            config.market_data.rate_limit_per_sec = rate;
        }
        if let Some(ttl) = env_parse::<u64>("MOMENTUM_CACHE_TTL_SECS") {
            config.market_data.cache_ttl_secs = ttl;
        }

        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

/// Split a comma separated symbol list, uppercased, blanks dropped.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Every service, wired.
pub struct Platform {
    pub config: PlatformConfig,
    pub market_data: Arc<MarketDataService>,
    pub signals: Arc<SignalService>,
    pub simulator: Arc<TradeExecutionSimulator>,
    pub reconciler: Arc<PortfolioReconciler>,
}

impl Platform {
    pub async fn build(config: PlatformConfig) -> Result<Self> {
        Self::build_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn build_with_clock(config: PlatformConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Arc::new(
            Database::new(&config.database_url)
                .await
                .with_context(|| format!("Failed to open database {}", config.database_url))?,
        );

        let client = match &config.provider_base_url {
            Some(url) => ChartClient::with_base_url(url.clone())?,
            None => ChartClient::new()?,
        };

        let market_data = Arc::new(MarketDataService::new(
            Arc::new(client),
            db.clone(),
            clock.clone(),
            config.market_data.clone(),
        ));

        let strategy = MomentumStrategy::new(config.strategy.clone()).context("Invalid strategy parameters")?;
        let signals = Arc::new(SignalService::new(
            market_data.clone(),
            Box::new(strategy),
            config.index_symbol.clone(),
        ));

        let simulator = Arc::new(TradeExecutionSimulator::new(
            config.simulator.clone(),
            db.clone(),
            clock.clone(),
        ));

        let reconciler = Arc::new(
            PortfolioReconciler::new(signals.clone(), db, clock, config.reconciler.clone())
                .with_executor(simulator.clone()),
        );

        info!(
            database = %config.database_url,
            universe = config.reconciler.universe.len(),
            gate = ?config.reconciler.gate,
            "Platform ready"
        );

        Ok(Self {
            config,
            market_data,
            signals,
            simulator,
            reconciler,
        })
    }
}
