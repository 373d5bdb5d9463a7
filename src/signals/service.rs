//! Signal service: fetches the universe and index, then runs a registered strategy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::deadline::Deadline;
use crate::error::{ServiceError, ServiceResult};
use crate::models::SignalReport;
use crate::services::{BatchRequest, DataService, SeriesRequest, SignalRequest, StrategyService};

use super::{Strategy, StrategyParameters};

/// Broad-market index used for regime detection.
pub const DEFAULT_INDEX_SYMBOL: &str = "^GSPC";

/// Registry of strategies backed by a data service.
pub struct SignalService {
    data: Arc<dyn DataService>,
    strategies: RwLock<HashMap<String, Box<dyn Strategy>>>,
    default_strategy: String,
    index_symbol: String,
}

impl SignalService {
    /// Service with the given strategy registered as the default.
    pub fn new(data: Arc<dyn DataService>, strategy: Box<dyn Strategy>, index_symbol: impl Into<String>) -> Self {
        let default_strategy = strategy.name().to_string();
        let mut strategies = HashMap::new();
        strategies.insert(default_strategy.clone(), strategy);

        Self {
            data,
            strategies: RwLock::new(strategies),
            default_strategy,
            index_symbol: index_symbol.into(),
        }
    }

    pub async fn strategy_parameters(&self, name: &str) -> ServiceResult<StrategyParameters> {
        let strategies = self.strategies.read().await;
        let strategy = strategies
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(format!("strategy {}", name)))?;
        Ok(strategy.parameters())
    }

    /// Update parameters and return the resulting full set.
    pub async fn configure_strategy(&self, name: &str, updates: &StrategyParameters) -> ServiceResult<StrategyParameters> {
        let mut strategies = self.strategies.write().await;
        let strategy = strategies
            .get_mut(name)
            .ok_or_else(|| ServiceError::NotFound(format!("strategy {}", name)))?;
        strategy.set_parameters(updates)?;
        Ok(strategy.parameters())
    }

    fn strategy_name<'a>(&'a self, request: &'a SignalRequest) -> &'a str {
        request.strategy.as_deref().unwrap_or(&self.default_strategy)
    }
}

#[async_trait]
impl StrategyService for SignalService {
    async fn generate_signals(&self, request: &SignalRequest, deadline: Deadline) -> ServiceResult<SignalReport> {
        let name = self.strategy_name(request).to_string();
        if !self.strategies.read().await.contains_key(&name) {
            return Err(ServiceError::NotFound(format!("strategy {}", name)));
        }

        let batch_request = BatchRequest {
            symbols: request.symbols.clone(),
            start_date: request.start_date.clone(),
            end_date: request.end_date.clone(),
            interval: request.interval.clone(),
        };
        let index_request = SeriesRequest {
            symbol: self.index_symbol.clone(),
            start_date: request.start_date.clone(),
            end_date: request.end_date.clone(),
            interval: request.interval.clone(),
        };

        let (batch, index) = tokio::try_join!(
            self.data.get_batch_stock_data(&batch_request, deadline),
            self.data.get_stock_data(&index_request, deadline),
        )?;

        for (symbol, error) in &batch.errors {
            warn!(symbol = %symbol, error = %error, "Skipping symbol without data");
        }

        let strategies = self.strategies.read().await;
        let strategy = strategies
            .get(&name)
            .ok_or_else(|| ServiceError::NotFound(format!("strategy {}", name)))?;

        let report = strategy.generate_signals(&batch.series, &index);
        info!(
            strategy = %name,
            regime = ?report.regime,
            candidates = batch.series.len(),
            signals = report.signals.len(),
            "Generated signals"
        );
        Ok(report)
    }
}
