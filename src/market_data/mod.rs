//! Market data access: cache, rate limiting, durable store and upstream provider.

mod cache;
mod range;
mod rate_limiter;
mod service;

use async_trait::async_trait;

use crate::error::ServiceResult;
use crate::models::PricePoint;

pub use cache::{CacheEntry, SeriesCache};
pub use range::DateRange;
pub use rate_limiter::RateLimiter;
pub use service::{BatchResult, MarketDataConfig, MarketDataService};

/// Upstream source of OHLCV bars.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch_series(
        &self,
        symbol: &str,
        range: &DateRange,
        interval: &str,
    ) -> ServiceResult<Vec<PricePoint>>;
}

/// Durable bar storage consulted before any upstream fetch.
#[async_trait]
pub trait MarketDataStore: Send + Sync {
    /// Bars for `symbol` inside `range`, empty when nothing is stored.
    async fn load_series(&self, symbol: &str, range: &DateRange) -> ServiceResult<Vec<PricePoint>>;

    /// Upsert bars by (symbol, timestamp).
    async fn store_series(&self, symbol: &str, points: &[PricePoint]) -> ServiceResult<()>;
}
