//! Moving Average Convergence Divergence (MACD) indicator.

use super::ema::ema_series;
use crate::services::signals::{finite_or, Indicator};
use crate::types::Candle;

/// MACD line, signal line and histogram for the latest candle, plus the
/// previous values so crossovers can be detected.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_macd: f64,
    pub prev_signal: f64,
}

impl MacdOutput {
    /// MACD crossed above its signal line on the last candle.
    pub fn bullish_crossover(&self) -> bool {
        self.prev_macd <= self.prev_signal && self.macd > self.signal
    }

    /// MACD crossed below its signal line on the last candle.
    pub fn bearish_crossover(&self) -> bool {
        self.prev_macd >= self.prev_signal && self.macd < self.signal
    }
}

/// MACD indicator.
///
/// - MACD Line: EMA(fast) - EMA(slow)
/// - Signal Line: EMA(signal) of the MACD line
/// - Histogram: MACD - Signal
pub struct Macd {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

impl Default for Macd {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
            signal_period,
        }
    }
}

impl Indicator for Macd {
    type Output = MacdOutput;

    fn id(&self) -> &str {
        "macd"
    }

    fn min_periods(&self) -> usize {
        // +1 so a previous value exists for crossover detection
        self.slow_period + self.signal_period
    }

    fn calculate(&self, candles: &[Candle]) -> MacdOutput {
        if candles.len() < self.min_periods() || self.fast_period >= self.slow_period {
            return MacdOutput::default();
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast_ema = ema_series(&closes, self.fast_period);
        let slow_ema = ema_series(&closes, self.slow_period);

        // Align the fast EMA with the slow one
        let offset = self.slow_period - self.fast_period;
        let macd_line: Vec<f64> = slow_ema
            .iter()
            .enumerate()
            .map(|(i, slow)| fast_ema[i + offset] - slow)
            .collect();

        let signal_line = ema_series(&macd_line, self.signal_period);
        if signal_line.len() < 2 {
            return MacdOutput::default();
        }

        let n = macd_line.len();
        let s = signal_line.len();
        let macd = finite_or(macd_line[n - 1], 0.0);
        let signal = finite_or(signal_line[s - 1], 0.0);

        MacdOutput {
            macd,
            signal,
            histogram: macd - signal,
            prev_macd: finite_or(macd_line[n - 2], 0.0),
            prev_signal: finite_or(signal_line[s - 2], 0.0),
        }
    }
}
