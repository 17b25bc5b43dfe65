//! Stochastic Oscillator indicator.

use crate::services::signals::{finite_or, Indicator};
use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticOutput {
    /// %K of the latest candle.
    pub k: f64,
    /// %D, the SMA of the last `d_period` %K values.
    pub d: f64,
}

impl Default for StochasticOutput {
    fn default() -> Self {
        Self { k: 50.0, d: 50.0 }
    }
}

/// Stochastic Oscillator.
///
/// Compares closing price to price range over a period:
/// %K = (Current Close - Lowest Low) / (Highest High - Lowest Low) * 100
///
/// Signals:
/// - Below 20: Oversold (bullish)
/// - Above 80: Overbought (bearish)
pub struct Stochastic {
    k_period: usize,
    d_period: usize,
}

impl Default for Stochastic {
    fn default() -> Self {
        Self {
            k_period: 14,
            d_period: 3,
        }
    }
}

impl Stochastic {
    pub fn new(k_period: usize, d_period: usize) -> Self {
        Self {
            k_period: k_period.max(1),
            d_period: d_period.max(1),
        }
    }
}

impl Indicator for Stochastic {
    type Output = StochasticOutput;

    fn id(&self) -> &str {
        "stochastic"
    }

    fn min_periods(&self) -> usize {
        self.k_period + self.d_period - 1
    }

    fn calculate(&self, candles: &[Candle]) -> StochasticOutput {
        if candles.len() < self.min_periods() {
            return StochasticOutput::default();
        }

        let k_values: Vec<f64> = candles
            .windows(self.k_period)
            .map(|window| {
                let lowest_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
                let highest_high = window
                    .iter()
                    .map(|c| c.high)
                    .fold(f64::NEG_INFINITY, f64::max);
                let close = window[window.len() - 1].close;
                let range = highest_high - lowest_low;
                if range > 0.0 {
                    finite_or((close - lowest_low) / range * 100.0, 50.0)
                } else {
                    50.0
                }
            })
            .collect();

        let k = k_values.last().copied().unwrap_or(50.0);
        let d = k_values.iter().rev().take(self.d_period).sum::<f64>() / self.d_period as f64;

        StochasticOutput {
            k: k.clamp(0.0, 100.0),
            d: d.clamp(0.0, 100.0),
        }
    }
}
