//! Persisted portfolio snapshot.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Position;

/// Portfolio as of a date. Positions are keyed (and therefore unique) by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub date: NaiveDate,
    pub positions: BTreeMap<String, Position>,
    pub cash_balance: Decimal,
    /// cash_balance + sum of market values
    pub total_value: Decimal,
    /// Version this snapshot was read at; bumped by the store on every save
    #[serde(default)]
    pub version: u64,
}

impl PortfolioState {
    /// Fresh all-cash portfolio.
    pub fn new(date: NaiveDate, cash_balance: Decimal) -> Self {
        Self {
            date,
            positions: BTreeMap::new(),
            cash_balance,
            total_value: cash_balance,
            version: 0,
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Held quantity, zero when not held.
    pub fn quantity_of(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0)
    }

    pub fn market_value(&self) -> Decimal {
        self.positions.values().map(|p| p.market_value).sum()
    }

    /// Drop closed positions and recompute total value.
    pub fn refresh_totals(&mut self) {
        self.positions.retain(|_, p| !p.is_closed());
        self.total_value = self.cash_balance + self.market_value();
    }

    pub fn held_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }
}
