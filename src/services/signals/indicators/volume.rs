//! Volume profile: current volume against its rolling average.

use super::ema::mean;
use crate::services::signals::{finite_or, Indicator};
use crate::types::Candle;

/// Ratio above which the current volume counts as an anomaly.
pub const ANOMALY_RATIO: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeOutput {
    pub current: f64,
    pub average: f64,
    pub ratio: f64,
    pub anomaly: bool,
    /// Short-term (5) average volume above the long-term average.
    pub rising: bool,
}

impl VolumeOutput {
    fn neutral(current: f64) -> Self {
        Self {
            current,
            average: current,
            ratio: 1.0,
            anomaly: false,
            rising: false,
        }
    }
}

/// Volume profile indicator.
pub struct VolumeProfile {
    period: usize,
    short_period: usize,
}

impl Default for VolumeProfile {
    fn default() -> Self {
        Self {
            period: 20,
            short_period: 5,
        }
    }
}

impl Indicator for VolumeProfile {
    type Output = VolumeOutput;

    fn id(&self) -> &str {
        "volume"
    }

    fn min_periods(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> VolumeOutput {
        let current = candles.last().map(|c| c.volume).unwrap_or(0.0);
        if candles.len() < self.min_periods() {
            return VolumeOutput::neutral(current);
        }

        // Average of the candles preceding the current one
        let n = candles.len();
        let history: Vec<f64> = candles[n - 1 - self.period..n - 1]
            .iter()
            .map(|c| c.volume)
            .collect();
        let average = mean(&history);
        if average <= 0.0 {
            return VolumeOutput::neutral(current);
        }

        let short: Vec<f64> = candles[n - self.short_period..]
            .iter()
            .map(|c| c.volume)
            .collect();
        let ratio = finite_or(current / average, 1.0);

        VolumeOutput {
            current,
            average,
            ratio,
            anomaly: ratio > ANOMALY_RATIO,
            rising: mean(&short) > average,
        }
    }
}
