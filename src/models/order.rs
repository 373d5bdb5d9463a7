//! Orders sent to the execution simulator and their results.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TradeSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: TradeSide,
    pub order_type: OrderType,
    /// Whole shares, must be positive
    pub quantity: i64,
    /// Reference price market orders slip around
    pub price: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
}

impl Order {
    pub fn market(symbol: impl Into<String>, side: TradeSide, quantity: i64, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price,
            limit_price: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: TradeSide, quantity: i64, limit_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: limit_price,
            limit_price: Some(limit_price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Filled,
    PartiallyFilled,
}

/// Outcome of one simulated order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub symbol: String,
    pub side: TradeSide,
    pub status: ExecutionStatus,
    pub requested_quantity: i64,
    pub filled_quantity: i64,
    pub average_price: Decimal,
}

/// All results of one execute call, retrievable by id afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionBatch {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub results: Vec<ExecutionResult>,
}
