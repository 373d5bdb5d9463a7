//! Signal generation: strategies and the signal service.

mod momentum;
mod service;

use std::collections::{BTreeMap, HashMap};

use crate::error::ServiceResult;
use crate::models::{MarketRegime, PricePoint, SignalReport};

pub use momentum::{Evaluation, MomentumParameters, MomentumStrategy};
pub use service::{SignalService, DEFAULT_INDEX_SYMBOL};

/// Tunable parameters, keyed by name.
pub type StrategyParameters = BTreeMap<String, f64>;

/// A ranking strategy over a universe of price series.
pub trait Strategy: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Rank the universe. Returns no signals in a bear regime.
    fn generate_signals(
        &self,
        batch: &HashMap<String, Vec<PricePoint>>,
        index: &[PricePoint],
    ) -> SignalReport;

    /// Risk unit for one series.
    fn calculate_risk(&self, series: &[PricePoint]) -> f64;

    fn detect_regime(&self, index: &[PricePoint]) -> MarketRegime;

    fn parameters(&self) -> StrategyParameters;

    /// Apply updates atomically: either every value is accepted or none is.
    fn set_parameters(&mut self, updates: &StrategyParameters) -> ServiceResult<()>;
}
