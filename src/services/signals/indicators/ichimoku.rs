//! Ichimoku Kinko Hyo indicator.

use crate::services::signals::Indicator;
use crate::types::{Candle, CloudPosition};

/// Ichimoku lines evaluated at the latest candle (undisplaced).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IchimokuOutput {
    pub tenkan: f64,
    pub kijun: f64,
    pub senkou_a: f64,
    pub senkou_b: f64,
    /// Latest close, plotted `kijun_period` candles back.
    pub chikou: f64,
    /// Close `kijun_period` candles ago, the chikou's reference.
    pub chikou_reference: f64,
    pub close: f64,
    pub cloud: CloudPosition,
}

impl IchimokuOutput {
    fn neutral(price: f64) -> Self {
        Self {
            tenkan: price,
            kijun: price,
            senkou_a: price,
            senkou_b: price,
            chikou: price,
            chikou_reference: price,
            close: price,
            cloud: CloudPosition::Inside,
        }
    }

    /// Tenkan above kijun.
    pub fn tk_bullish(&self) -> bool {
        self.tenkan > self.kijun
    }
}

/// Ichimoku indicator.
///
/// - Tenkan-sen: midpoint of the `tenkan_period` high/low range
/// - Kijun-sen: midpoint of the `kijun_period` range
/// - Senkou A: (tenkan + kijun) / 2
/// - Senkou B: midpoint of the `senkou_b_period` range (or all history if shorter)
/// - Chikou: close compared with the close `kijun_period` candles ago
pub struct Ichimoku {
    tenkan_period: usize,
    kijun_period: usize,
    senkou_b_period: usize,
}

impl Default for Ichimoku {
    fn default() -> Self {
        Self {
            tenkan_period: 9,
            kijun_period: 26,
            senkou_b_period: 52,
        }
    }
}

impl Ichimoku {
    fn midpoint(window: &[Candle]) -> f64 {
        let high = window
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        (high + low) / 2.0
    }
}

impl Indicator for Ichimoku {
    type Output = IchimokuOutput;

    fn id(&self) -> &str {
        "ichimoku"
    }

    fn min_periods(&self) -> usize {
        self.kijun_period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> IchimokuOutput {
        let close = candles.last().map(|c| c.close).unwrap_or(0.0);
        if candles.len() < self.min_periods() {
            return IchimokuOutput::neutral(close);
        }

        let n = candles.len();
        let tenkan = Self::midpoint(&candles[n - self.tenkan_period..]);
        let kijun = Self::midpoint(&candles[n - self.kijun_period..]);
        let senkou_a = (tenkan + kijun) / 2.0;
        let senkou_b = Self::midpoint(&candles[n.saturating_sub(self.senkou_b_period)..]);

        let values = [tenkan, kijun, senkou_a, senkou_b];
        if values.iter().any(|v| !v.is_finite()) {
            return IchimokuOutput::neutral(close);
        }

        let cloud_top = senkou_a.max(senkou_b);
        let cloud_bottom = senkou_a.min(senkou_b);
        let cloud = if close > cloud_top {
            CloudPosition::Above
        } else if close < cloud_bottom {
            CloudPosition::Below
        } else {
            CloudPosition::Inside
        };

        IchimokuOutput {
            tenkan,
            kijun,
            senkou_a,
            senkou_b,
            chikou: close,
            chikou_reference: candles[n - 1 - self.kijun_period].close,
            close,
            cloud,
        }
    }
}
