//! In-memory stores used by unit tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::error::{ServiceError, ServiceResult};
use crate::market_data::{DateRange, MarketDataStore};
use crate::models::{PortfolioState, PricePoint};
use crate::trading::PortfolioStateStore;

/// Bars keyed by symbol then timestamp.
#[derive(Default)]
pub struct MemoryStore {
    bars: RwLock<HashMap<String, BTreeMap<i64, PricePoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bar_count(&self, symbol: &str) -> usize {
        self.bars.read().await.get(symbol).map(|b| b.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MarketDataStore for MemoryStore {
    async fn load_series(&self, symbol: &str, range: &DateRange) -> ServiceResult<Vec<PricePoint>> {
        let bars = self.bars.read().await;
        Ok(bars
            .get(symbol)
            .map(|series| {
                series
                    .range(range.start_ts()..=range.end_ts())
                    .map(|(_, p)| p.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn store_series(&self, symbol: &str, points: &[PricePoint]) -> ServiceResult<()> {
        let mut bars = self.bars.write().await;
        let series = bars.entry(symbol.to_string()).or_default();
        for p in points {
            series.insert(p.timestamp, p.clone());
        }
        Ok(())
    }
}

/// Append-only snapshot log; index + 1 is the version.
#[derive(Default)]
pub struct MemoryStateStore {
    snapshots: RwLock<Vec<PortfolioState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn version(&self) -> u64 {
        self.snapshots.read().await.len() as u64
    }
}

#[async_trait]
impl PortfolioStateStore for MemoryStateStore {
    async fn save(&self, state: &PortfolioState) -> ServiceResult<u64> {
        let mut snapshots = self.snapshots.write().await;
        let latest = snapshots.len() as u64;
        if state.version != latest {
            return Err(ServiceError::Conflict(format!(
                "portfolio was modified concurrently: expected version {}, found {}",
                state.version, latest
            )));
        }

        let version = latest + 1;
        snapshots.push(PortfolioState {
            version,
            ..state.clone()
        });
        Ok(version)
    }

    async fn load(&self, date: NaiveDate) -> ServiceResult<Option<PortfolioState>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.iter().rev().find(|s| s.date == date).cloned())
    }

    async fn load_latest(&self) -> ServiceResult<Option<PortfolioState>> {
        Ok(self.snapshots.read().await.last().cloned())
    }

    async fn history(&self, start: NaiveDate, end: NaiveDate) -> ServiceResult<Vec<PortfolioState>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .iter()
            .filter(|s| s.date >= start && s.date <= end)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_memory_state_store_cas() {
        let store = MemoryStateStore::new();
        let state = PortfolioState::new(NaiveDate::from_ymd_opt(2021, 6, 2).unwrap(), dec!(10));

        assert_eq!(store.save(&state).await.unwrap(), 1);
        assert!(matches!(store.save(&state).await, Err(ServiceError::Conflict(_))));

        let latest = store.load_latest().await.unwrap().unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(store.save(&latest).await.unwrap(), 2);
    }
}
