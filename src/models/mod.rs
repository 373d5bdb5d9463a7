//! Data models for prices, signals, positions, portfolio state and orders.

mod order;
mod portfolio;
mod position;
mod price;
mod signal;
mod trade;

pub use order::{ExecutionBatch, ExecutionResult, ExecutionStatus, Order, OrderType};
pub use portfolio::PortfolioState;
pub use position::Position;
pub use price::{normalize_series, PricePoint};
pub use signal::{MarketRegime, Signal, SignalDirection, SignalReport};
pub use trade::{TradeRecord, TradeSide};
