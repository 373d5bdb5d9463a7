//! Reconciler configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// How strictly rebalance days are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceGate {
    /// Weekly only on Wednesdays, biweekly only on the second Wednesday
    Strict,
    /// Run whenever invoked
    Permissive,
}

impl RebalanceGate {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "permissive" | "off" | "any" => Self::Permissive,
            _ => Self::Strict,
        }
    }
}

/// Capital that risk-unit targets are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingBase {
    /// Cash plus market value of holdings
    Equity,
    /// Cash only
    Cash,
}

impl SizingBase {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "cash" => Self::Cash,
            _ => Self::Equity,
        }
    }
}

/// Configuration for rebalancing and position sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Cash seeded into an empty portfolio store
    pub initial_cash: Decimal,

    /// Symbols scanned for signals
    pub universe: Vec<String>,

    /// Calendar days of history requested for signal generation
    pub history_days: i64,

    /// Rebalance day enforcement
    pub gate: RebalanceGate,

    /// Capital base for target quantities
    pub sizing_base: SizingBase,

    /// Upper bound on every outbound call made during a rebalance (seconds)
    pub call_timeout_secs: u64,

    /// Headroom left per share when sizing submitted market orders, so
    /// adverse fills still fit in the capital
    pub order_slippage_buffer: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            initial_cash: dec!(1000000),     // $1M paper portfolio
            universe: ["AAPL", "GOOGL", "MSFT", "AMZN", "META"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            history_days: 400,               // enough bars for SMA-200
            gate: RebalanceGate::Strict,
            sizing_base: SizingBase::Equity,
            call_timeout_secs: 30,
            order_slippage_buffer: 0.01,     // matches the simulator's +/- 1%
        }
    }
}
