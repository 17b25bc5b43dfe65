//! Average True Range (ATR) indicator.

use crate::services::signals::Indicator;
use crate::types::Candle;

/// Fraction of the latest close reported when history is too short.
const FALLBACK_FRACTION: f64 = 0.02;

/// ATR (Average True Range) indicator.
///
/// Measures market volatility by calculating the average of true ranges:
/// TR = max(High-Low, |High-PrevClose|, |Low-PrevClose|)
///
/// With `period = 1` this is the true range of the last candle, which the
/// scoring engine uses as a short-horizon volatility proxy.
pub struct Atr {
    period: usize,
}

impl Default for Atr {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }

    /// Calculate True Range.
    fn true_range(current: &Candle, previous: &Candle) -> f64 {
        let hl = current.high - current.low;
        let hc = (current.high - previous.close).abs();
        let lc = (current.low - previous.close).abs();
        hl.max(hc).max(lc)
    }
}

impl Indicator for Atr {
    type Output = f64;

    fn id(&self) -> &str {
        "atr"
    }

    fn min_periods(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> f64 {
        let Some(last) = candles.last() else {
            return 0.0;
        };
        let fallback = last.close.abs() * FALLBACK_FRACTION;
        if candles.len() < self.min_periods() {
            return fallback;
        }

        let true_ranges: Vec<f64> = candles
            .windows(2)
            .map(|pair| Self::true_range(&pair[1], &pair[0]))
            .collect();

        // Wilder's smoothing
        let mut atr = true_ranges.iter().take(self.period).sum::<f64>() / self.period as f64;
        for tr in true_ranges.iter().skip(self.period) {
            atr = (atr * (self.period - 1) as f64 + tr) / self.period as f64;
        }

        if atr.is_finite() && atr >= 0.0 {
            atr
        } else {
            fallback
        }
    }
}
