//! On-Balance Volume (OBV) indicator.

use super::ema::ema_last;
use crate::services::signals::Indicator;
use crate::types::{Candle, DivergenceKind, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObvOutput {
    pub value: f64,
    /// EMA(fast) of OBV against EMA(slow).
    pub trend: Trend,
    /// Price and OBV moving in opposite directions over the lookback.
    pub divergence: DivergenceKind,
}

/// OBV (On-Balance Volume) indicator.
///
/// Cumulative volume indicator:
/// - If close > previous close: OBV += volume
/// - If close < previous close: OBV -= volume
pub struct Obv {
    fast_period: usize,
    slow_period: usize,
    divergence_lookback: usize,
}

impl Default for Obv {
    fn default() -> Self {
        Self {
            fast_period: 5,
            slow_period: 20,
            divergence_lookback: 10,
        }
    }
}

impl Obv {
    /// Cumulative OBV aligned with the input candles.
    pub fn series(candles: &[Candle]) -> Vec<f64> {
        let mut obv = 0.0;
        let mut values = Vec::with_capacity(candles.len());
        if !candles.is_empty() {
            values.push(0.0);
        }
        for pair in candles.windows(2) {
            let volume = if pair[1].volume.is_finite() {
                pair[1].volume
            } else {
                0.0
            };
            if pair[1].close > pair[0].close {
                obv += volume;
            } else if pair[1].close < pair[0].close {
                obv -= volume;
            }
            values.push(obv);
        }
        values
    }
}

impl Indicator for Obv {
    type Output = ObvOutput;

    fn id(&self) -> &str {
        "obv"
    }

    fn min_periods(&self) -> usize {
        self.slow_period.max(self.divergence_lookback)
    }

    fn calculate(&self, candles: &[Candle]) -> ObvOutput {
        let values = Self::series(candles);
        let value = values.last().copied().unwrap_or(0.0);
        if candles.len() < self.min_periods() {
            return ObvOutput {
                value,
                ..ObvOutput::default()
            };
        }

        let trend = match (
            ema_last(&values, self.fast_period),
            ema_last(&values, self.slow_period),
        ) {
            (Some(fast), Some(slow)) if fast > slow => Trend::Rising,
            (Some(fast), Some(slow)) if fast < slow => Trend::Falling,
            _ => Trend::Flat,
        };

        let n = candles.len();
        let start = n - self.divergence_lookback;
        let price_change = candles[n - 1].close - candles[start].close;
        let obv_change = values[n - 1] - values[start];
        let divergence = if price_change > 0.0 && obv_change < 0.0 {
            DivergenceKind::Bearish
        } else if price_change < 0.0 && obv_change > 0.0 {
            DivergenceKind::Bullish
        } else {
            DivergenceKind::None
        };

        ObvOutput {
            value,
            trend,
            divergence,
        }
    }
}
