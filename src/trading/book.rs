//! Working copy of the portfolio that rebalance passes mutate.
//!
//! Nothing here touches storage; the reconciler adopts the result only after
//! it has been persisted.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{PortfolioState, Position, TradeRecord};

use super::PositionSizer;

pub struct WorkingPortfolio {
    state: PortfolioState,
    trades: Vec<TradeRecord>,
}

impl WorkingPortfolio {
    pub fn new(state: PortfolioState) -> Self {
        Self {
            state,
            trades: Vec::new(),
        }
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    /// Sell the whole holding at its last known price.
    ///
    /// Returns `None` when the symbol is not held or the holding is empty.
    pub fn sell_position(&mut self, symbol: &str) -> Option<TradeRecord> {
        let position = self.state.positions.remove(symbol)?;
        if position.quantity <= 0 {
            return None;
        }

        let trade = TradeRecord::sell(symbol, position.quantity, position.current_price);
        self.state.cash_balance += trade.cash_delta().abs();
        debug!(symbol = %symbol, quantity = position.quantity, "Liquidated position");
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Buy up to `quantity` shares, clamped to what cash affords.
    pub fn buy_position(&mut self, symbol: &str, quantity: i64, price: Decimal) -> Option<TradeRecord> {
        let quantity = PositionSizer::affordable_quantity(quantity, price, self.state.cash_balance);
        if quantity <= 0 {
            return None;
        }

        let trade = TradeRecord::buy(symbol, quantity, price);
        self.state.cash_balance += trade.cash_delta();
        match self.state.positions.get_mut(symbol) {
            Some(position) => position.add(quantity, price),
            None => {
                self.state
                    .positions
                    .insert(symbol.to_string(), Position::new(symbol, quantity, price));
            }
        }
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Move the holding toward `target` shares at `price`.
    ///
    /// Increases are clamped to available cash. The position is re-marked at
    /// `price` even when no trade is needed.
    pub fn adjust_position(&mut self, symbol: &str, target: i64, price: Decimal) -> Option<TradeRecord> {
        let held = self.state.quantity_of(symbol);
        if let Some(position) = self.state.positions.get_mut(symbol) {
            position.update_price(price);
        }

        let diff = target.max(0) - held;
        if diff > 0 {
            return self.buy_position(symbol, diff, price);
        }
        if diff == 0 {
            return None;
        }

        let position = self.state.positions.get_mut(symbol)?;
        let sold = position.reduce(-diff);
        if sold <= 0 {
            return None;
        }
        if position.is_closed() {
            self.state.positions.remove(symbol);
        }

        let trade = TradeRecord::sell(symbol, sold, price);
        self.state.cash_balance += trade.cash_delta();
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Stamp the date, recompute totals and hand back state plus trades.
    pub fn finish(mut self, date: NaiveDate) -> (PortfolioState, Vec<TradeRecord>) {
        self.state.date = date;
        self.state.refresh_totals();
        (self.state, self.trades)
    }
}
