//! Request/response boundaries between the platform services.
//!
//! Each service is an async trait object so the reconciler, signal service
//! and binary can be wired against real implementations or test doubles.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deadline::Deadline;
use crate::error::ServiceResult;
use crate::market_data::BatchResult;
use crate::models::{ExecutionBatch, Order, PortfolioState, PricePoint, SignalReport};
use crate::trading::RebalanceOutcome;

pub const DEFAULT_INTERVAL: &str = "1d";

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

/// Single-symbol series request. Dates are `YYYY-MM-DD` or epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRequest {
    pub symbol: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_interval")]
    pub interval: String,
}

impl SeriesRequest {
    pub fn new(symbol: impl Into<String>, start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            start_date: start_date.into(),
            end_date: end_date.into(),
            interval: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub symbols: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_interval")]
    pub interval: String,
}

impl BatchRequest {
    pub fn new(symbols: Vec<String>, start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            symbols,
            start_date: start_date.into(),
            end_date: end_date.into(),
            interval: default_interval(),
        }
    }
}

/// Signal generation request over a universe of symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    pub symbols: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Registered strategy name; the default strategy when absent
    #[serde(default)]
    pub strategy: Option<String>,
}

impl SignalRequest {
    pub fn new(symbols: Vec<String>, start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            symbols,
            start_date: start_date.into(),
            end_date: end_date.into(),
            interval: default_interval(),
            strategy: None,
        }
    }
}

#[async_trait]
pub trait DataService: Send + Sync {
    async fn get_stock_data(&self, request: &SeriesRequest, deadline: Deadline) -> ServiceResult<Vec<PricePoint>>;

    /// Fails only on a malformed request; per-symbol failures go in the error map.
    async fn get_batch_stock_data(&self, request: &BatchRequest, deadline: Deadline) -> ServiceResult<BatchResult>;
}

#[async_trait]
pub trait StrategyService: Send + Sync {
    async fn generate_signals(&self, request: &SignalRequest, deadline: Deadline) -> ServiceResult<SignalReport>;
}

#[async_trait]
pub trait PortfolioService: Send + Sync {
    async fn weekly_rebalance(&self, date: Option<NaiveDate>) -> ServiceResult<RebalanceOutcome>;

    async fn biweekly_rebalance(&self, date: Option<NaiveDate>) -> ServiceResult<RebalanceOutcome>;

    async fn portfolio_status(&self) -> ServiceResult<PortfolioState>;
}

#[async_trait]
pub trait TradeExecutionService: Send + Sync {
    async fn execute_trades(&self, orders: Vec<Order>) -> ServiceResult<ExecutionBatch>;

    async fn get_execution_status(&self, execution_id: Uuid) -> ServiceResult<ExecutionBatch>;
}
