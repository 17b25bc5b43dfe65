//! Normalized per-indicator features derived from one candle snapshot.

use serde::{Deserialize, Serialize};

/// Names of the indicators that carry a weight in the ensemble.
pub const INDICATOR_NAMES: [&str; 8] = [
    "rsi",
    "macd",
    "bollinger",
    "stochastic",
    "volume",
    "obv",
    "ichimoku",
    "vwap",
];

/// Kind of price/oscillator divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    Bullish,
    Bearish,
    #[default]
    None,
}

/// Divergence between price and an oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub present: bool,
    #[serde(rename = "type")]
    pub kind: DivergenceKind,
    /// 0 when absent, otherwise in [0.5, 1].
    pub strength: f64,
}

impl Divergence {
    pub fn none() -> Self {
        Self::default()
    }

    /// Signed direction: +1 bullish, -1 bearish, 0 none.
    pub fn sign(&self) -> f64 {
        match self.kind {
            DivergenceKind::Bullish if self.present => 1.0,
            DivergenceKind::Bearish if self.present => -1.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsiFeature {
    pub value: f64,
    pub oversold: bool,
    pub overbought: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacdFeature {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub bullish_crossover: bool,
    pub bearish_crossover: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BollingerFeature {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Close position inside the bands, 0 = lower, 1 = upper.
    pub position: f64,
    pub bandwidth: f64,
    pub squeeze: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StochasticFeature {
    pub k: f64,
    pub d: f64,
    pub oversold: bool,
    pub overbought: bool,
    pub divergence: Divergence,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeFeature {
    pub current: f64,
    pub average: f64,
    pub ratio: f64,
    pub anomaly: bool,
    pub rising: bool,
    pub score: f64,
}

/// Direction of a smoothed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    #[default]
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObvFeature {
    pub value: f64,
    pub trend: Trend,
    pub divergence: DivergenceKind,
    pub score: f64,
}

/// Close relative to the Ichimoku cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CloudPosition {
    Above,
    Below,
    #[default]
    Inside,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IchimokuFeature {
    pub tenkan: f64,
    pub kijun: f64,
    pub senkou_a: f64,
    pub senkou_b: f64,
    pub chikou: f64,
    pub cloud: CloudPosition,
    pub tk_bullish: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VwapFeature {
    pub vwap: f64,
    /// (close - vwap) / vwap
    pub deviation: f64,
    pub above: bool,
    pub score: f64,
}

/// Full feature record for one candle snapshot. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    pub rsi: RsiFeature,
    pub macd: MacdFeature,
    pub bollinger: BollingerFeature,
    pub stochastic: StochasticFeature,
    pub volume: VolumeFeature,
    pub obv: ObvFeature,
    pub ichimoku: IchimokuFeature,
    pub vwap: VwapFeature,
}

impl FeatureSet {
    /// Feature set with every indicator at its neutral reading.
    pub fn neutral() -> Self {
        Self {
            rsi: RsiFeature {
                value: 50.0,
                oversold: false,
                overbought: false,
                score: 0.0,
            },
            macd: MacdFeature {
                macd: 0.0,
                signal: 0.0,
                histogram: 0.0,
                bullish_crossover: false,
                bearish_crossover: false,
                score: 0.0,
            },
            bollinger: BollingerFeature {
                upper: 0.0,
                middle: 0.0,
                lower: 0.0,
                position: 0.5,
                bandwidth: 0.0,
                squeeze: false,
                score: 0.0,
            },
            stochastic: StochasticFeature {
                k: 50.0,
                d: 50.0,
                oversold: false,
                overbought: false,
                divergence: Divergence::none(),
                score: 0.0,
            },
            volume: VolumeFeature {
                current: 0.0,
                average: 0.0,
                ratio: 1.0,
                anomaly: false,
                rising: false,
                score: 0.0,
            },
            obv: ObvFeature {
                value: 0.0,
                trend: Trend::Flat,
                divergence: DivergenceKind::None,
                score: 0.0,
            },
            ichimoku: IchimokuFeature {
                tenkan: 0.0,
                kijun: 0.0,
                senkou_a: 0.0,
                senkou_b: 0.0,
                chikou: 0.0,
                cloud: CloudPosition::Inside,
                tk_bullish: false,
                score: 0.0,
            },
            vwap: VwapFeature {
                vwap: 0.0,
                deviation: 0.0,
                above: false,
                score: 0.0,
            },
        }
    }

    /// Score of an indicator by name.
    pub fn score_of(&self, indicator: &str) -> Option<f64> {
        match indicator {
            "rsi" => Some(self.rsi.score),
            "macd" => Some(self.macd.score),
            "bollinger" => Some(self.bollinger.score),
            "stochastic" => Some(self.stochastic.score),
            "volume" => Some(self.volume.score),
            "obv" => Some(self.obv.score),
            "ichimoku" => Some(self.ichimoku.score),
            "vwap" => Some(self.vwap.score),
            _ => None,
        }
    }

    /// Scores in `INDICATOR_NAMES` order.
    pub fn scores(&self) -> [f64; 8] {
        [
            self.rsi.score,
            self.macd.score,
            self.bollinger.score,
            self.stochastic.score,
            self.volume.score,
            self.obv.score,
            self.ichimoku.score,
            self.vwap.score,
        ]
    }

    /// Divergence detected on the momentum oscillators, if any.
    pub fn divergence(&self) -> Option<Divergence> {
        self.stochastic
            .divergence
            .present
            .then_some(self.stochastic.divergence)
    }
}
