//! Position sizing: risk-unit targets, affordability clamps, risk-weighted allocation.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{PortfolioState, Signal};

use super::SizingBase;

/// Calculator for target share counts.
pub struct PositionSizer {
    base: SizingBase,
}

impl PositionSizer {
    pub fn new(base: SizingBase) -> Self {
        Self { base }
    }

    /// Capital targets are measured against.
    pub fn available_capital(&self, state: &PortfolioState) -> Decimal {
        match self.base {
            SizingBase::Equity => state.cash_balance + state.market_value(),
            SizingBase::Cash => state.cash_balance,
        }
    }

    /// `floor(risk_unit * capital)` shares, never negative.
    pub fn target_quantity(&self, risk_unit: f64, capital: Decimal) -> i64 {
        let capital = capital.to_f64().unwrap_or(0.0);
        let target = (risk_unit * capital).floor();
        if target.is_finite() && target > 0.0 {
            target.min(i64::MAX as f64) as i64
        } else {
            0
        }
    }

    /// Largest quantity up to `quantity` whose cost fits in `cash`.
    pub fn affordable_quantity(quantity: i64, price: Decimal, cash: Decimal) -> i64 {
        if quantity <= 0 || price <= Decimal::ZERO || cash <= Decimal::ZERO {
            return 0;
        }
        let max_affordable = (cash / price).floor().to_i64().unwrap_or(0);
        quantity.min(max_affordable)
    }

    /// Split capital across signals in proportion to their risk units.
    /// Shares are counted at `price * (1 + slippage_buffer)`.
    ///
    /// Returns (symbol, shares, price) for every signal with a usable price.
    pub fn risk_weighted_allocation(
        &self,
        signals: &[Signal],
        capital: Decimal,
        slippage_buffer: f64,
    ) -> ServiceResult<Vec<(String, i64, Decimal)>> {
        let total_risk: f64 = signals.iter().map(|s| s.risk_unit.max(0.0)).sum();
        if total_risk <= 0.0 {
            return Ok(Vec::new());
        }

        let headroom = Decimal::ONE + Decimal::from_f64(slippage_buffer.max(0.0)).unwrap_or(Decimal::ZERO);
        let mut allocations = Vec::with_capacity(signals.len());
        for signal in signals {
            let price = to_price(signal.reference_price)?;
            let weight = Decimal::from_f64(signal.risk_unit.max(0.0) / total_risk).unwrap_or(Decimal::ZERO);
            let shares = (capital * weight / (price * headroom)).floor().to_i64().unwrap_or(0);
            allocations.push((signal.symbol.clone(), shares, price));
        }
        Ok(allocations)
    }
}

/// Convert a market price to a 4dp decimal. Non-positive or non-finite prices are rejected.
pub fn to_price(value: f64) -> ServiceResult<Decimal> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ServiceError::invalid(format!("unusable price {}", value)));
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp(4))
        .ok_or_else(|| ServiceError::invalid(format!("unusable price {}", value)))
}
