//! Indicator math over daily bars: SMA, ATR, regression momentum, gap detection.
//!
//! Every indicator returns 0.0 when the series is too short, so callers can
//! treat "not enough data" and "no signal" the same way.

use statrs::statistics::Statistics;

use crate::models::PricePoint;

/// Trading days per year, used to annualize the regression slope.
const TRADING_DAYS: f64 = 252.0;

/// Stateless indicator calculator.
pub struct Indicators;

impl Indicators {
    /// Simple moving average of the last `period` closes.
    pub fn sma(points: &[PricePoint], period: usize) -> f64 {
        if period == 0 || points.len() < period {
            return 0.0;
        }
        points[points.len() - period..]
            .iter()
            .map(|p| p.close)
            .mean()
    }

    /// Average true range over the last `period` true ranges.
    ///
    /// Needs `period + 1` bars because each true range looks at the prior close.
    pub fn atr(points: &[PricePoint], period: usize) -> f64 {
        if period == 0 || points.len() < period + 1 {
            return 0.0;
        }

        let true_ranges: Vec<f64> = points
            .windows(2)
            .map(|w| {
                let prev_close = w[0].close;
                let bar = &w[1];
                (bar.high - bar.low)
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs())
            })
            .collect();

        true_ranges[true_ranges.len() - period..].iter().mean()
    }

    /// Annualized exponential regression slope weighted by fit quality.
    ///
    /// Regresses ln(adjusted close) on the bar index over the last `period`
    /// bars and returns `(exp(slope * 252) - 1) * r_squared`.
    pub fn momentum_score(points: &[PricePoint], period: usize) -> f64 {
        if period < 2 || points.len() < period {
            return 0.0;
        }

        let window = &points[points.len() - period..];
        if window.iter().any(|p| p.adjusted_close <= 0.0) {
            return 0.0;
        }

        let xs: Vec<f64> = (1..=period).map(|i| i as f64).collect();
        let ys: Vec<f64> = window.iter().map(|p| p.adjusted_close.ln()).collect();
        let (slope, r_squared) = linear_regression(&xs, &ys);

        ((slope * TRADING_DAYS).exp() - 1.0) * r_squared
    }

    /// True when any bar in the last `window` bars opened more than
    /// `threshold` (fraction) away from the prior close.
    pub fn has_recent_large_gap(points: &[PricePoint], window: usize, threshold: f64) -> bool {
        if points.len() < 2 {
            return false;
        }
        let start = points.len().saturating_sub(window).max(1);

        (start..points.len()).any(|i| {
            let prev_close = points[i - 1].close;
            prev_close > 0.0 && ((points[i].open - prev_close).abs() / prev_close) > threshold
        })
    }

    /// Shares per unit of capital for a given volatility. Zero when ATR is unusable.
    pub fn risk_unit(atr: f64, risk_factor: f64) -> f64 {
        if atr.is_finite() && atr > 0.0 {
            risk_factor / atr
        } else {
            0.0
        }
    }
}

/// Ordinary least squares fit. Returns (slope, r_squared).
fn linear_regression(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let mean_x = xs.iter().mean();
    let mean_y = ys.iter().mean();

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    if sxx == 0.0 {
        return (0.0, 0.0);
    }
    let slope = sxy / sxx;
    // A flat series has no variance to explain.
    let r_squared = if syy == 0.0 { 0.0 } else { (sxy * sxy) / (sxx * syy) };
    (slope, r_squared)
}
