//! Technical indicator implementations.
//!
//! Every indicator is a pure function of an ordered candle slice and
//! falls back to a neutral output when the history is too short.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod ichimoku;
pub mod macd;
pub mod obv;
pub mod rsi;
pub mod stochastic;
pub mod volume;
pub mod vwap;

pub use atr::Atr;
pub use bollinger::{BollingerBands, BollingerOutput};
pub use ichimoku::{Ichimoku, IchimokuOutput};
pub use macd::{Macd, MacdOutput};
pub use obv::{Obv, ObvOutput};
pub use rsi::{Rsi, RSI_NEUTRAL};
pub use stochastic::{Stochastic, StochasticOutput};
pub use volume::{VolumeOutput, VolumeProfile};
pub use vwap::{Vwap, VwapOutput};

use super::Indicator;
use crate::types::Candle;

/// Raw outputs of the full indicator library for one candle snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorOutputs {
    pub rsi: f64,
    /// RSI aligned with the input candles, for divergence detection.
    pub rsi_series: Vec<f64>,
    pub macd: MacdOutput,
    pub bollinger: BollingerOutput,
    pub stochastic: StochasticOutput,
    pub atr: f64,
    pub volume: VolumeOutput,
    pub obv: ObvOutput,
    pub ichimoku: IchimokuOutput,
    pub vwap: VwapOutput,
}

/// The standard indicator set with default periods.
#[derive(Default)]
pub struct IndicatorLibrary {
    rsi: Rsi,
    macd: Macd,
    bollinger: BollingerBands,
    stochastic: Stochastic,
    atr: Atr,
    volume: VolumeProfile,
    obv: Obv,
    ichimoku: Ichimoku,
    vwap: Vwap,
}

impl IndicatorLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every indicator over `candles` (oldest first).
    pub fn compute(&self, candles: &[Candle]) -> IndicatorOutputs {
        let rsi_series = self.rsi.series(candles);
        IndicatorOutputs {
            rsi: rsi_series.last().copied().unwrap_or(RSI_NEUTRAL),
            rsi_series,
            macd: self.macd.calculate(candles),
            bollinger: self.bollinger.calculate(candles),
            stochastic: self.stochastic.calculate(candles),
            atr: self.atr.calculate(candles),
            volume: self.volume.calculate(candles),
            obv: self.obv.calculate(candles),
            ichimoku: self.ichimoku.calculate(candles),
            vwap: self.vwap.calculate(candles),
        }
    }

    /// Longest lookback among the indicators.
    pub fn max_lookback(&self) -> usize {
        [
            self.rsi.min_periods(),
            self.macd.min_periods(),
            self.bollinger.min_periods(),
            self.stochastic.min_periods(),
            self.atr.min_periods(),
            self.volume.min_periods(),
            self.obv.min_periods(),
            self.ichimoku.min_periods(),
            self.vwap.min_periods(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}
