//! Daily OHLCV bars.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One OHLCV bar for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PricePoint {
    pub symbol: String,
    /// Epoch seconds (UTC)
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: i64,
}

impl PricePoint {
    /// Bars with non-finite prices or an inverted high/low range are unusable.
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close, self.adjusted_close];
        prices.iter().all(|p| p.is_finite()) && self.high >= self.low
    }
}

/// Sort by timestamp, drop duplicates and invalid bars.
///
/// Every series handed out by the market data layer goes through this, so
/// downstream indicator code can assume strictly ascending unique timestamps.
pub fn normalize_series(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    let before = points.len();
    points.retain(PricePoint::is_valid);
    points.sort_by_key(|p| p.timestamp);
    points.dedup_by_key(|p| p.timestamp);

    let dropped = before - points.len();
    if dropped > 0 {
        let symbol = points.first().map(|p| p.symbol.as_str()).unwrap_or("?");
        warn!(symbol = %symbol, dropped = dropped, "Dropped invalid or duplicate bars");
    }
    points
}
