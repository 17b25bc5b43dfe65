//! Relative Strength Index (RSI) indicator.

use crate::services::signals::Indicator;
use crate::types::Candle;

/// Neutral RSI reported with insufficient history.
pub const RSI_NEUTRAL: f64 = 50.0;

/// RSI (Relative Strength Index) indicator.
///
/// Measures momentum by comparing the magnitude of recent gains to recent losses.
/// Values range from 0-100:
/// - Below 30: Oversold (potential buy signal)
/// - Above 70: Overbought (potential sell signal)
pub struct Rsi {
    period: usize,
}

impl Default for Rsi {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }

    /// RSI at every candle, aligned with the input. Entries before the
    /// first full lookback hold the neutral value.
    pub fn series(&self, candles: &[Candle]) -> Vec<f64> {
        let period = self.period;
        let mut out = vec![RSI_NEUTRAL; candles.len()];
        if candles.len() < period + 1 {
            return out;
        }

        let mut gains = Vec::with_capacity(candles.len() - 1);
        let mut losses = Vec::with_capacity(candles.len() - 1);
        for pair in candles.windows(2) {
            let change = pair[1].close - pair[0].close;
            if change > 0.0 {
                gains.push(change);
                losses.push(0.0);
            } else {
                gains.push(0.0);
                losses.push(-change);
            }
        }

        let mut avg_gain = gains.iter().take(period).sum::<f64>() / period as f64;
        let mut avg_loss = losses.iter().take(period).sum::<f64>() / period as f64;
        out[period] = Self::from_averages(avg_gain, avg_loss);

        // Wilder smoothing for the remainder
        for i in period..gains.len() {
            avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
            avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
            out[i + 1] = Self::from_averages(avg_gain, avg_loss);
        }

        out
    }

    fn from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_loss <= 0.0 {
            return if avg_gain <= 0.0 { RSI_NEUTRAL } else { 100.0 };
        }
        let rs = avg_gain / avg_loss;
        let rsi = 100.0 - (100.0 / (1.0 + rs));
        if rsi.is_finite() {
            rsi
        } else {
            RSI_NEUTRAL
        }
    }
}

impl Indicator for Rsi {
    type Output = f64;

    fn id(&self) -> &str {
        "rsi"
    }

    fn min_periods(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> f64 {
        self.series(candles).last().copied().unwrap_or(RSI_NEUTRAL)
    }
}
