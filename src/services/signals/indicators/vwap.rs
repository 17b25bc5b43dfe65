//! Volume Weighted Average Price (VWAP) indicator.

use crate::services::signals::{finite_or, Indicator};
use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VwapOutput {
    pub vwap: f64,
    /// (close - vwap) / vwap
    pub deviation: f64,
}

/// VWAP (Volume Weighted Average Price) indicator.
///
/// Average price weighted by volume over a rolling window:
/// VWAP = Sum(TP * Volume) / Sum(Volume)
///
/// Signals:
/// - Price above VWAP = bullish
/// - Price below VWAP = bearish
pub struct Vwap {
    period: usize,
}

impl Default for Vwap {
    fn default() -> Self {
        Self { period: 20 }
    }
}

impl Vwap {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }
}

impl Indicator for Vwap {
    type Output = VwapOutput;

    fn id(&self) -> &str {
        "vwap"
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> VwapOutput {
        let close = candles.last().map(|c| c.close).unwrap_or(0.0);
        let neutral = VwapOutput {
            vwap: close,
            deviation: 0.0,
        };
        if candles.len() < self.period {
            return neutral;
        }

        let (cum_tp_vol, cum_vol) = candles[candles.len() - self.period..]
            .iter()
            .fold((0.0, 0.0), |(tp_vol, vol), c| {
                (tp_vol + c.typical_price() * c.volume, vol + c.volume)
            });

        if cum_vol <= 0.0 {
            return neutral;
        }
        let vwap = cum_tp_vol / cum_vol;
        if !vwap.is_finite() || vwap <= 0.0 {
            return neutral;
        }

        VwapOutput {
            vwap,
            deviation: finite_or((close - vwap) / vwap, 0.0),
        }
    }
}
