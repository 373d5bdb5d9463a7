//! Position model representing current holdings in one symbol.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current holding of a single equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,

    /// Whole shares held (never negative, no shorting)
    pub quantity: i64,

    /// Average entry price per share
    pub average_price: Decimal,

    /// Last known price per share
    #[serde(default)]
    pub current_price: Decimal,

    /// quantity * current_price
    #[serde(default)]
    pub market_value: Decimal,
}

impl Position {
    /// Open a new position at the given fill price.
    pub fn new(symbol: impl Into<String>, quantity: i64, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            average_price: price,
            current_price: price,
            market_value: Decimal::from(quantity) * price,
        }
    }

    /// Mark the position to a new price.
    pub fn update_price(&mut self, current_price: Decimal) {
        self.current_price = current_price;
        self.market_value = Decimal::from(self.quantity) * current_price;
    }

    /// Add shares, averaging the entry price in.
    pub fn add(&mut self, quantity: i64, price: Decimal) {
        let new_quantity = self.quantity + quantity;
        if new_quantity > 0 {
            let total_cost = Decimal::from(self.quantity) * self.average_price
                + Decimal::from(quantity) * price;
            self.average_price = total_cost / Decimal::from(new_quantity);
        }
        self.quantity = new_quantity;
        self.update_price(price);
    }

    /// Remove up to `quantity` shares. Returns how many were actually removed.
    pub fn reduce(&mut self, quantity: i64) -> i64 {
        let removed = quantity.clamp(0, self.quantity);
        self.quantity -= removed;
        self.update_price(self.current_price);
        removed
    }

    pub fn is_closed(&self) -> bool {
        self.quantity <= 0
    }
}
