//! Market data service: cache -> durable store -> rate-limited upstream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use backoff::ExponentialBackoffBuilder;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::deadline::Deadline;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{normalize_series, PricePoint};
use crate::services::{BatchRequest, DataService, SeriesRequest};

use super::{DateRange, MarketDataStore, PriceProvider, RateLimiter, SeriesCache};

/// Market data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Cache entry lifetime in seconds
    pub cache_ttl_secs: u64,

    /// Maximum cached (symbol, interval) entries
    pub cache_max_entries: usize,

    /// Background sweep period in seconds (0 disables the sweeper)
    pub cache_sweep_secs: u64,

    /// Provider calls per second
    pub rate_limit_per_sec: f64,

    /// Provider calls allowed back to back
    pub rate_limit_burst: u32,

    /// Concurrent symbol fetches within one batch
    pub max_concurrent_fetches: usize,

    /// First retry delay for transient upstream failures
    pub retry_initial_ms: u64,

    /// Give up retrying after this long
    pub retry_max_elapsed_ms: u64,

    /// Interval persisted in the durable store; other intervals bypass it
    pub stored_interval: String,

    /// Calendar days refetched by `update_latest`. Kept at least as long
    /// as the reconciler's history window so stored series satisfy it.
    pub refresh_days: i64,

    /// Days a stored series may fall short of either end of a requested
    /// window (weekends, holidays) and still be served from the store
    pub store_coverage_slack_days: i64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 15 * 60,         // 15 minutes
            cache_max_entries: 1024,
            cache_sweep_secs: 60,
            rate_limit_per_sec: 1.0,         // 1 request/s
            rate_limit_burst: 2,             // burst of 2
            max_concurrent_fetches: 2,       // matches the burst
            retry_initial_ms: 250,
            retry_max_elapsed_ms: 3_000,
            stored_interval: "1d".to_string(),
            refresh_days: 400,               // same window rebalances request
            store_coverage_slack_days: 5,
        }
    }
}

/// Per-symbol outcome of a batch request. Every requested symbol lands in
/// exactly one of the two maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub series: HashMap<String, Vec<PricePoint>>,
    pub errors: HashMap<String, String>,
}

/// Resolves price series through cache, durable store and upstream provider.
pub struct MarketDataService {
    provider: Arc<dyn PriceProvider>,
    store: Arc<dyn MarketDataStore>,
    cache: Arc<SeriesCache>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    config: MarketDataConfig,
}

impl MarketDataService {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        store: Arc<dyn MarketDataStore>,
        clock: Arc<dyn Clock>,
        config: MarketDataConfig,
    ) -> Self {
        let cache = Arc::new(SeriesCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
            Arc::clone(&clock),
        ));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst));

        Self {
            provider,
            store,
            cache,
            limiter,
            clock,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<SeriesCache> {
        &self.cache
    }

    /// Start the cache sweeper if enabled.
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        if self.config.cache_sweep_secs == 0 {
            return None;
        }
        Some(self.cache.spawn_sweeper(Duration::from_secs(self.config.cache_sweep_secs)))
    }

    /// Single-symbol series.
    pub async fn get_series(
        &self,
        symbol: &str,
        range: DateRange,
        interval: &str,
        deadline: Deadline,
    ) -> ServiceResult<Vec<PricePoint>> {
        if symbol.trim().is_empty() {
            return Err(ServiceError::invalid("symbol must not be empty"));
        }

        if let Some(points) = self.cache.get(symbol, interval, &range).await {
            debug!(symbol = %symbol, "Cache hit");
            return Ok(points);
        }

        if self.uses_store(interval) {
            let stored = normalize_series(self.store.load_series(symbol, &range).await?);
            if self.covers(&stored, &range) {
                debug!(symbol = %symbol, bars = stored.len(), "Loaded from store");
                self.cache.insert(symbol, interval, range, stored.clone()).await;
                return Ok(stored);
            }
            if !stored.is_empty() {
                debug!(symbol = %symbol, bars = stored.len(), "Stored series is short of the window, fetching");
            }
        }

        let points = self.fetch_upstream(symbol, range, interval, deadline).await?;
        self.cache.insert(symbol, interval, range, points.clone()).await;
        if self.uses_store(interval) {
            self.persist_in_background(symbol, points.clone());
        }

        Ok(points)
    }

    /// Fetch many symbols with bounded fan-out, isolating per-symbol failures.
    pub async fn get_batch(
        &self,
        symbols: &[String],
        range: DateRange,
        interval: &str,
        deadline: Deadline,
    ) -> BatchResult {
        let mut seen = HashSet::new();
        let unique: Vec<String> = symbols
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect();

        let outcomes: Vec<(String, ServiceResult<Vec<PricePoint>>)> = stream::iter(unique)
            .map(|symbol| async move {
                let result = self.get_series(&symbol, range, interval, deadline).await;
                (symbol, result)
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let mut batch = BatchResult::default();
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(points) => {
                    batch.series.insert(symbol, points);
                }
                Err(e) => {
                    warn!(symbol = %symbol, code = e.code(), error = %e, "Batch fetch failed");
                    batch.errors.insert(symbol, e.to_string());
                }
            }
        }

        info!(
            requested = symbols.len(),
            ok = batch.series.len(),
            failed = batch.errors.len(),
            "Batch fetch complete"
        );
        batch
    }

    /// Refetch the trailing window for each symbol and write it through to
    /// the store and cache. Stops at the first failure.
    pub async fn update_latest(&self, symbols: &[String], deadline: Deadline) -> ServiceResult<usize> {
        let range = DateRange::trailing_days(self.clock.today(), self.config.refresh_days);
        let interval = self.config.stored_interval.clone();
        let mut updated = 0;

        for symbol in symbols {
            let points = self.fetch_upstream(symbol, range, &interval, deadline).await?;
            self.store.store_series(symbol, &points).await?;
            info!(symbol = %symbol, bars = points.len(), "Refreshed stored series");
            self.cache.insert(symbol, &interval, range, points).await;
            updated += 1;
        }

        Ok(updated)
    }

    fn uses_store(&self, interval: &str) -> bool {
        interval == self.config.stored_interval
    }

    /// Whether `points` span `range` to within the slack at both ends. The
    /// end is capped at now, since no bar can exist past it.
    fn covers(&self, points: &[PricePoint], range: &DateRange) -> bool {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return false;
        };
        let slack = ChronoDuration::days(self.config.store_coverage_slack_days.max(0)).num_seconds();
        let end = range.end_ts().min(self.clock.now().timestamp());

        first.timestamp <= range.start_ts() + slack && last.timestamp >= end - slack
    }

    /// Rate-limited provider call with retry on transient failures.
    async fn fetch_upstream(
        &self,
        symbol: &str,
        range: DateRange,
        interval: &str,
        deadline: Deadline,
    ) -> ServiceResult<Vec<PricePoint>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.retry_initial_ms))
            .with_max_elapsed_time(Some(Duration::from_millis(self.config.retry_max_elapsed_ms)))
            .build();

        let points = backoff::future::retry(policy, || async move {
            self.limiter
                .acquire(deadline)
                .await
                .map_err(backoff::Error::permanent)?;

            match deadline
                .run("provider fetch", self.provider.fetch_series(symbol, &range, interval))
                .await
            {
                Ok(points) => Ok(points),
                Err(e) if e.is_transient() => {
                    warn!(symbol = %symbol, error = %e, "Transient provider failure, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
        .map_err(ServiceError::settle)?;

        let points = normalize_series(points);
        if points.is_empty() {
            return Err(ServiceError::NotFound(format!("no data found for symbol {}", symbol)));
        }
        Ok(points)
    }

    fn persist_in_background(&self, symbol: &str, points: Vec<PricePoint>) {
        let store = Arc::clone(&self.store);
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.store_series(&symbol, &points).await {
                warn!(symbol = %symbol, error = %e, "Failed to persist fetched series");
            }
        });
    }
}

#[async_trait]
impl DataService for MarketDataService {
    async fn get_stock_data(&self, request: &SeriesRequest, deadline: Deadline) -> ServiceResult<Vec<PricePoint>> {
        let range = DateRange::parse(&request.start_date, &request.end_date)?;
        self.get_series(&request.symbol, range, &request.interval, deadline).await
    }

    async fn get_batch_stock_data(&self, request: &BatchRequest, deadline: Deadline) -> ServiceResult<BatchResult> {
        let range = DateRange::parse(&request.start_date, &request.end_date)?;
        Ok(self.get_batch(&request.symbols, range, &request.interval, deadline).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::MemoryStore;
    use crate::test_support::{exponential_series, fixed_now, MockProvider};
    use tokio_test::assert_ok;

    fn service(provider: Arc<MockProvider>, store: Arc<MemoryStore>) -> MarketDataService {
        let config = MarketDataConfig {
            rate_limit_per_sec: 1_000.0,
            rate_limit_burst: 10,
            retry_initial_ms: 1,
            retry_max_elapsed_ms: 50,
            ..MarketDataConfig::default()
        };
        MarketDataService::new(provider, store, Arc::new(ManualClock::new(fixed_now())), config)
    }

    fn request(symbol: &str) -> SeriesRequest {
        SeriesRequest::new(symbol, "2020-01-01", "2021-12-31")
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let provider = Arc::new(MockProvider::new());
        provider.insert("AAPL", exponential_series("AAPL", 30, 100.0, 0.001));
        let svc = service(provider.clone(), Arc::new(MemoryStore::new()));

        let first = assert_ok!(svc.get_stock_data(&request("AAPL"), Deadline::none()).await);
        let second = assert_ok!(svc.get_stock_data(&request("AAPL"), Deadline::none()).await);

        assert_eq!(first, second);
        assert_eq!(provider.calls("AAPL"), 1);
    }

    #[tokio::test]
    async fn test_store_is_consulted_before_provider() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStore::new());
        // 2020-01-02 through 2020-01-21
        assert_ok!(store.store_series("MSFT", &exponential_series("MSFT", 20, 50.0, 0.0)).await);
        let svc = service(provider.clone(), store);

        let req = SeriesRequest::new("MSFT", "2020-01-01", "2020-01-21");
        let points = assert_ok!(svc.get_stock_data(&req, Deadline::none()).await);
        assert_eq!(points.len(), 20);
        assert_eq!(provider.calls("MSFT"), 0);
    }

    #[tokio::test]
    async fn test_short_stored_series_falls_through_to_provider() {
        let full = exponential_series("SPY", 300, 300.0, 0.001);
        let provider = Arc::new(MockProvider::new());
        provider.insert("SPY", full.clone());
        let store = Arc::new(MemoryStore::new());
        assert_ok!(store.store_series("SPY", &full[250..]).await);
        let svc = service(provider.clone(), store);

        let end = full[299].timestamp.to_string();
        let req = SeriesRequest::new("SPY", "2020-01-01", &end);
        let points = assert_ok!(svc.get_stock_data(&req, Deadline::none()).await);
        assert_eq!(points.len(), 300);
        assert_eq!(provider.calls("SPY"), 1);

        let again = assert_ok!(svc.get_stock_data(&req, Deadline::none()).await);
        assert_eq!(again.len(), 300);
        assert_eq!(provider.calls("SPY"), 1);
    }

    #[tokio::test]
    async fn test_stale_stored_series_is_refetched() {
        let full = exponential_series("QQQ", 40, 200.0, 0.001);
        let provider = Arc::new(MockProvider::new());
        provider.insert("QQQ", full.clone());
        let store = Arc::new(MemoryStore::new());
        assert_ok!(store.store_series("QQQ", &full[..20]).await);
        let svc = service(provider.clone(), store);

        let end = full[39].timestamp.to_string();
        let req = SeriesRequest::new("QQQ", "2020-01-01", &end);
        let points = assert_ok!(svc.get_stock_data(&req, Deadline::none()).await);
        assert_eq!(points.len(), 40);
        assert_eq!(provider.calls("QQQ"), 1);
    }

    #[test]
    fn test_refresh_window_spans_rebalance_history() {
        let market = MarketDataConfig::default();
        let reconciler = crate::trading::ReconcilerConfig::default();
        assert!(market.refresh_days >= reconciler.history_days);
    }

    #[tokio::test]
    async fn test_fetched_series_is_persisted() {
        let provider = Arc::new(MockProvider::new());
        provider.insert("NVDA", exponential_series("NVDA", 10, 400.0, 0.002));
        let store = Arc::new(MemoryStore::new());
        let svc = service(provider, store.clone());

        assert_ok!(svc.get_stock_data(&request("NVDA"), Deadline::none()).await);

        let range = DateRange::parse("2020-01-01", "2021-12-31").unwrap();
        for _ in 0..50 {
            if !store.load_series("NVDA", &range).await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("series was never persisted");
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_not_found() {
        let svc = service(Arc::new(MockProvider::new()), Arc::new(MemoryStore::new()));
        let result = svc.get_stock_data(&request("ZZZZ"), Deadline::none()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bad_dates_are_invalid_argument() {
        let svc = service(Arc::new(MockProvider::new()), Arc::new(MemoryStore::new()));
        let req = SeriesRequest::new("AAPL", "yesterday", "2021-12-31");
        let result = svc.get_stock_data(&req, Deadline::none()).await;
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(MockProvider::new());
        provider.insert("AAPL", exponential_series("AAPL", 10, 100.0, 0.001));
        provider.fail_times("AAPL", 2);
        let svc = service(provider.clone(), Arc::new(MemoryStore::new()));

        assert_ok!(svc.get_stock_data(&request("AAPL"), Deadline::none()).await);
        assert_eq!(provider.calls("AAPL"), 3);
    }

    #[tokio::test]
    async fn test_persistent_outage_surfaces_as_internal() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_times("AAPL", usize::MAX);
        let svc = service(provider, Arc::new(MemoryStore::new()));

        let result = svc.get_stock_data(&request("AAPL"), Deadline::none()).await;
        assert!(matches!(result, Err(ServiceError::Internal(_))));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let provider = Arc::new(MockProvider::new());
        provider.insert("AAPL", exponential_series("AAPL", 30, 100.0, 0.001));
        provider.insert("GOOG", exponential_series("GOOG", 30, 90.0, 0.001));
        provider.insert_error("MSFT", ServiceError::Internal("upstream 400".into()));
        let svc = service(provider, Arc::new(MemoryStore::new()));

        let symbols: Vec<String> = ["AAPL", "MSFT", "GOOG", "ZZZZ"].iter().map(|s| s.to_string()).collect();
        let req = BatchRequest::new(symbols, "2020-01-01", "2021-12-31");
        let batch = assert_ok!(svc.get_batch_stock_data(&req, Deadline::none()).await);

        assert_eq!(batch.series.len(), 2);
        assert_eq!(batch.errors.len(), 2);
        assert!(batch.series.contains_key("AAPL"));
        assert!(batch.errors.contains_key("MSFT"));
        assert!(batch.errors.contains_key("ZZZZ"));
    }

    #[tokio::test]
    async fn test_batch_rate_limit_exhaustion_is_per_symbol() {
        let provider = Arc::new(MockProvider::new());
        for symbol in ["A", "B", "C"] {
            provider.insert(symbol, exponential_series(symbol, 5, 10.0, 0.0));
        }
        let config = MarketDataConfig {
            rate_limit_per_sec: 1.0,
            rate_limit_burst: 2,
            max_concurrent_fetches: 1,
            ..MarketDataConfig::default()
        };
        let svc = MarketDataService::new(
            provider,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(fixed_now())),
            config,
        );

        let symbols: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let range = DateRange::parse("2020-01-01", "2021-12-31").unwrap();
        let batch = svc
            .get_batch(&symbols, range, "1d", Deadline::after(Duration::from_millis(200)))
            .await;

        assert_eq!(batch.series.len(), 2);
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.errors.values().all(|e| e.contains("resource exhausted")));
    }

    #[tokio::test]
    async fn test_update_latest_writes_through() {
        let provider = Arc::new(MockProvider::new());
        provider.insert("AAPL", exponential_series("AAPL", 10, 100.0, 0.001));
        let store = Arc::new(MemoryStore::new());
        let svc = service(provider, store.clone());

        let updated = assert_ok!(svc.update_latest(&["AAPL".to_string()], Deadline::none()).await);
        assert_eq!(updated, 1);
        assert_eq!(store.bar_count("AAPL").await, 10);
        assert_eq!(svc.cache().len().await, 1);
    }
}
