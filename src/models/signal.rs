//! Trading signals and market regime.

use serde::{Deserialize, Serialize};

/// Suggested action for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    Hold,
}

/// Broad market trend derived from the index moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketRegime {
    Bull,
    Bear,
    /// Not enough index history to decide
    Neutral,
}

impl MarketRegime {
    pub fn is_bullish(&self) -> bool {
        matches!(self, MarketRegime::Bull)
    }
}

/// Ranked trade candidate. Generated fresh for every request, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: SignalDirection,
    /// Target shares per unit of capital (risk_factor / ATR)
    pub risk_unit: f64,
    pub momentum_score: f64,
    /// Last close used to price the signal
    pub reference_price: f64,
}

/// Signals together with the regime observed while producing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    pub regime: MarketRegime,
    pub signals: Vec<Signal>,
}

impl SignalReport {
    pub fn find(&self, symbol: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.symbol == symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.find(symbol).is_some()
    }
}
