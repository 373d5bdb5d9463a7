//! Trade records produced by a rebalance pass.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single trade applied to the portfolio by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: TradeSide,
    /// Whole shares, always positive
    pub quantity: i64,
    pub price: Decimal,
}

impl TradeRecord {
    pub fn buy(symbol: impl Into<String>, quantity: i64, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: TradeSide::Buy,
            quantity,
            price,
        }
    }

    pub fn sell(symbol: impl Into<String>, quantity: i64, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: TradeSide::Sell,
            quantity,
            price,
        }
    }

    /// Cash moved by this trade: negative for buys, positive for sells.
    pub fn cash_delta(&self) -> Decimal {
        let notional = Decimal::from(self.quantity) * self.price;
        match self.side {
            TradeSide::Buy => -notional,
            TradeSide::Sell => notional,
        }
    }
}
