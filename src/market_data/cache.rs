//! In-memory TTL cache of price series.
//!
//! Entries are keyed by (symbol, interval) and remember the window they were
//! fetched for. A lookup hits only while the entry is unexpired and the
//! requested window lies inside the cached one; the hit is narrowed to the
//! requested window. Expired entries are dropped lazily on read, by
//! `purge_expired`, or by the optional background sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;
use crate::models::PricePoint;

use super::DateRange;

/// Cached series plus the window and expiry it was stored with.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub range: DateRange,
    pub points: Vec<PricePoint>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

type CacheKey = (String, String);

/// Bounded TTL cache shared by all market data requests.
pub struct SeriesCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: chrono::Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl SeriesCache {
    pub fn new(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(15)),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Return the cached bars inside `range`, if a live covering entry exists.
    pub async fn get(&self, symbol: &str, interval: &str, range: &DateRange) -> Option<Vec<PricePoint>> {
        let key = (symbol.to_string(), interval.to_string());
        let now = self.clock.now();

        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                None => return None,
                Some(entry) if entry.is_live(now) => {
                    if !entry.range.contains(range) {
                        return None;
                    }
                    return Some(
                        entry
                            .points
                            .iter()
                            .filter(|p| range.contains_ts(p.timestamp))
                            .cloned()
                            .collect(),
                    );
                }
                Some(_) => {}
            }
        }

        // Expired: evict, re-checking in case a writer refreshed it meanwhile.
        let mut entries = self.entries.write().await;
        if entries.get(&key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(&key);
            debug!(symbol = %symbol, "Evicted expired cache entry");
        }
        None
    }

    /// Store a series, replacing any previous entry and resetting its TTL.
    pub async fn insert(&self, symbol: &str, interval: &str, range: DateRange, points: Vec<PricePoint>) {
        let key = (symbol.to_string(), interval.to_string());
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| e.is_live(now));
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                range,
                points,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Periodically purge expired entries until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    let remaining = cache.len().await;
                    debug!(removed = removed, remaining = remaining, "Swept expired cache entries");
                }
            }
        })
    }
}
