//! Momentum strategy with regime gating, trend/gap filters and risk-unit sizing.
//!
//! For each symbol:
//! - Reject if any bar in the lookback window gapped past the threshold
//! - Reject if the last close is below the trend moving average
//! - Reject if regression momentum is negative
//!
//! Survivors are ranked by momentum and the top fraction becomes BUY signals.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ServiceError, ServiceResult};
use crate::metrics::Indicators;
use crate::models::{MarketRegime, PricePoint, Signal, SignalDirection, SignalReport};

use super::{Strategy, StrategyParameters};

/// Momentum strategy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumParameters {
    // === Scoring ===
    /// Bars used for the momentum regression and the gap filter
    pub lookback_period: usize,

    /// Fraction of qualified symbols kept (0-1]
    pub top_percentage: f64,

    /// Capital fraction risked per ATR of movement
    pub risk_factor: f64,

    /// True ranges averaged for ATR
    pub atr_period: usize,

    // === Filters ===
    /// Moving average the last close must stay above
    pub trend_period: usize,

    /// Open-vs-prior-close gap that disqualifies (fraction)
    pub gap_threshold: f64,

    // === Regime ===
    /// Index moving average separating bull from bear
    pub market_regime_period: usize,
}

impl Default for MomentumParameters {
    fn default() -> Self {
        Self {
            // Scoring
            lookback_period: 90,       // ~4.5 months of daily bars
            top_percentage: 0.2,       // top 20%
            risk_factor: 0.001,        // 0.1% per ATR
            atr_period: 20,

            // Filters
            trend_period: 100,
            gap_threshold: 0.15,       // 15% gap

            // Regime
            market_regime_period: 200,
        }
    }
}

impl MomentumParameters {
    fn validate(&self) -> ServiceResult<()> {
        if self.lookback_period < 2 {
            return Err(ServiceError::invalid("lookback_period must be at least 2"));
        }
        if !(self.top_percentage > 0.0 && self.top_percentage <= 1.0) {
            return Err(ServiceError::invalid("top_percentage must be in (0, 1]"));
        }
        if !(self.risk_factor > 0.0 && self.risk_factor.is_finite()) {
            return Err(ServiceError::invalid("risk_factor must be positive"));
        }
        if !(self.gap_threshold > 0.0 && self.gap_threshold.is_finite()) {
            return Err(ServiceError::invalid("gap_threshold must be positive"));
        }
        if self.atr_period == 0 || self.trend_period == 0 || self.market_regime_period == 0 {
            return Err(ServiceError::invalid("periods must be at least 1"));
        }
        Ok(())
    }
}

/// Result of evaluating one symbol.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub qualified: bool,
    pub reason: String,
    pub signal: Option<Signal>,
}

impl Evaluation {
    pub fn accept(signal: Signal) -> Self {
        Self {
            qualified: true,
            reason: "Qualified".to_string(),
            signal: Some(signal),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            qualified: false,
            reason: reason.into(),
            signal: None,
        }
    }
}

/// Regression-momentum ranking strategy.
#[derive(Debug, Clone, Default)]
pub struct MomentumStrategy {
    params: MomentumParameters,
}

impl MomentumStrategy {
    pub const NAME: &'static str = "momentum";

    pub fn new(params: MomentumParameters) -> ServiceResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &MomentumParameters {
        &self.params
    }

    /// Apply the disqualification filters in order and score survivors.
    pub fn evaluate(&self, symbol: &str, series: &[PricePoint]) -> Evaluation {
        let Some(last) = series.last() else {
            return Evaluation::reject("No price data");
        };
        let p = &self.params;

        if Indicators::has_recent_large_gap(series, p.lookback_period, p.gap_threshold) {
            return Evaluation::reject(format!("Gap above {:.0}% in lookback window", p.gap_threshold * 100.0));
        }

        let trend = Indicators::sma(series, p.trend_period);
        if last.close < trend {
            return Evaluation::reject(format!("Close {:.2} below SMA{} {:.2}", last.close, p.trend_period, trend));
        }

        let score = Indicators::momentum_score(series, p.lookback_period);
        if score < 0.0 {
            return Evaluation::reject(format!("Negative momentum {:.4}", score));
        }

        Evaluation::accept(Signal {
            symbol: symbol.to_string(),
            direction: SignalDirection::Buy,
            risk_unit: self.calculate_risk(series),
            momentum_score: score,
            reference_price: last.close,
        })
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn generate_signals(
        &self,
        batch: &HashMap<String, Vec<PricePoint>>,
        index: &[PricePoint],
    ) -> SignalReport {
        let regime = self.detect_regime(index);
        if regime == MarketRegime::Bear {
            info!("Bear regime, no signals");
            return SignalReport {
                regime,
                signals: Vec::new(),
            };
        }

        let mut qualified: Vec<Signal> = batch
            .iter()
            .filter_map(|(symbol, series)| {
                let evaluation = self.evaluate(symbol, series);
                if !evaluation.qualified {
                    debug!(symbol = %symbol, reason = %evaluation.reason, "Disqualified");
                }
                evaluation.signal
            })
            .collect();

        qualified.sort_by(|a, b| {
            b.momentum_score
                .partial_cmp(&a.momentum_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let keep = (qualified.len() as f64 * self.params.top_percentage).floor() as usize;
        qualified.truncate(keep);

        info!(
            regime = ?regime,
            universe = batch.len(),
            signals = qualified.len(),
            "Generated momentum signals"
        );

        SignalReport {
            regime,
            signals: qualified,
        }
    }

    fn calculate_risk(&self, series: &[PricePoint]) -> f64 {
        let atr = Indicators::atr(series, self.params.atr_period);
        Indicators::risk_unit(atr, self.params.risk_factor)
    }

    fn detect_regime(&self, index: &[PricePoint]) -> MarketRegime {
        let period = self.params.market_regime_period;
        let Some(last) = index.last() else {
            return MarketRegime::Neutral;
        };
        if index.len() < period {
            return MarketRegime::Neutral;
        }
        if last.close > Indicators::sma(index, period) {
            MarketRegime::Bull
        } else {
            MarketRegime::Bear
        }
    }

    fn parameters(&self) -> StrategyParameters {
        let p = &self.params;
        StrategyParameters::from([
            ("lookback_period".to_string(), p.lookback_period as f64),
            ("top_percentage".to_string(), p.top_percentage),
            ("risk_factor".to_string(), p.risk_factor),
            ("atr_period".to_string(), p.atr_period as f64),
            ("trend_period".to_string(), p.trend_period as f64),
            ("gap_threshold".to_string(), p.gap_threshold),
            ("market_regime_period".to_string(), p.market_regime_period as f64),
        ])
    }

    fn set_parameters(&mut self, updates: &StrategyParameters) -> ServiceResult<()> {
        let mut next = self.params.clone();
        for (name, &value) in updates {
            match name.as_str() {
                "lookback_period" => next.lookback_period = whole(name, value)?,
                "top_percentage" => next.top_percentage = value,
                "risk_factor" => next.risk_factor = value,
                "atr_period" => next.atr_period = whole(name, value)?,
                "trend_period" => next.trend_period = whole(name, value)?,
                "gap_threshold" => next.gap_threshold = value,
                "market_regime_period" => next.market_regime_period = whole(name, value)?,
                other => return Err(ServiceError::invalid(format!("unknown parameter {}", other))),
            }
        }
        next.validate()?;

        info!(params = ?next, "Updated momentum parameters");
        self.params = next;
        Ok(())
    }
}

fn whole(name: &str, value: f64) -> ServiceResult<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(ServiceError::invalid(format!("{} must be a whole number, got {}", name, value)))
    }
}
