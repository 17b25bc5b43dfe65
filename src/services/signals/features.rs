//! Conversion of raw indicator outputs into normalized feature scores.
//!
//! Every score is clamped to [-1, 1]; positive values are bullish.

use super::indicators::{IndicatorLibrary, IndicatorOutputs, Rsi};
use super::{clamp_unit, Indicator};
use crate::types::{
    BollingerFeature, Candle, CandleColor, CloudPosition, Divergence, DivergenceKind, FeatureSet,
    IchimokuFeature, MacdFeature, ObvFeature, RsiFeature, StochasticFeature, Trend, VolumeFeature,
    VwapFeature,
};

/// Number of trailing periods inspected for RSI divergence.
pub const DIVERGENCE_WINDOW: usize = 10;
/// Reference index inside the divergence window.
const DIVERGENCE_PIVOT: usize = 3;
/// Bandwidth under which the Bollinger bands count as squeezed.
const SQUEEZE_BANDWIDTH: f64 = 0.02;

/// Builds a [`FeatureSet`] from a candle snapshot.
#[derive(Default)]
pub struct FeatureExtractor {
    library: IndicatorLibrary,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library(&self) -> &IndicatorLibrary {
        &self.library
    }

    /// Compute indicators and extract features in one pass.
    pub fn extract_candles(&self, candles: &[Candle]) -> (IndicatorOutputs, FeatureSet) {
        let outputs = self.library.compute(candles);
        let features = self.extract(candles, &outputs);
        (outputs, features)
    }

    /// Score every indicator output.
    pub fn extract(&self, candles: &[Candle], outputs: &IndicatorOutputs) -> FeatureSet {
        let divergence = detect_divergence(candles, &outputs.rsi_series);
        let last_color = candles.last().map(|c| c.color());

        FeatureSet {
            rsi: rsi_feature(outputs.rsi),
            macd: macd_feature(outputs),
            bollinger: bollinger_feature(outputs),
            stochastic: stochastic_feature(outputs, divergence),
            volume: volume_feature(outputs, last_color),
            obv: obv_feature(outputs),
            ichimoku: ichimoku_feature(outputs),
            vwap: vwap_feature(outputs),
        }
    }
}

fn rsi_feature(rsi: f64) -> RsiFeature {
    let score = if rsi < 30.0 {
        0.8
    } else if rsi > 70.0 {
        -0.8
    } else {
        (50.0 - rsi) / 20.0 * 0.3
    };
    RsiFeature {
        value: rsi,
        oversold: rsi < 30.0,
        overbought: rsi > 70.0,
        score: clamp_unit(score),
    }
}

fn macd_feature(outputs: &IndicatorOutputs) -> MacdFeature {
    let m = &outputs.macd;
    let bullish = m.bullish_crossover();
    let bearish = m.bearish_crossover();
    let score = if bullish && m.histogram > 0.0 {
        0.7
    } else if bearish && m.histogram < 0.0 {
        -0.7
    } else if m.histogram > 0.0 {
        0.3
    } else if m.histogram < 0.0 {
        -0.3
    } else {
        0.0
    };
    MacdFeature {
        macd: m.macd,
        signal: m.signal,
        histogram: m.histogram,
        bullish_crossover: bullish,
        bearish_crossover: bearish,
        score: clamp_unit(score),
    }
}

fn bollinger_feature(outputs: &IndicatorOutputs) -> BollingerFeature {
    let b = &outputs.bollinger;
    let score = if b.position < 0.2 {
        0.6
    } else if b.position > 0.8 {
        -0.6
    } else {
        0.5 - b.position
    };
    BollingerFeature {
        upper: b.upper,
        middle: b.middle,
        lower: b.lower,
        position: b.position,
        bandwidth: b.bandwidth,
        squeeze: b.bandwidth > 0.0 && b.bandwidth < SQUEEZE_BANDWIDTH,
        score: clamp_unit(score),
    }
}

fn stochastic_feature(outputs: &IndicatorOutputs, divergence: Divergence) -> StochasticFeature {
    let s = &outputs.stochastic;
    let mut score = 0.0;
    if s.k < 20.0 {
        score += 0.5;
    } else if s.k > 80.0 {
        score -= 0.5;
    }
    if s.k > s.d {
        score += 0.2;
    } else if s.k < s.d {
        score -= 0.2;
    }
    score += divergence.sign() * 0.3 * divergence.strength;

    StochasticFeature {
        k: s.k,
        d: s.d,
        oversold: s.k < 20.0,
        overbought: s.k > 80.0,
        divergence,
        score: clamp_unit(score),
    }
}

fn volume_feature(outputs: &IndicatorOutputs, last_color: Option<CandleColor>) -> VolumeFeature {
    let v = &outputs.volume;
    let direction = match last_color {
        Some(CandleColor::Green) => 1.0,
        Some(CandleColor::Red) => -1.0,
        _ => 0.0,
    };
    let mut score = 0.0;
    if v.anomaly {
        score += 0.5 * direction;
    }
    if v.rising {
        score += 0.2 * direction;
    }
    VolumeFeature {
        current: v.current,
        average: v.average,
        ratio: v.ratio,
        anomaly: v.anomaly,
        rising: v.rising,
        score: clamp_unit(score),
    }
}

fn obv_feature(outputs: &IndicatorOutputs) -> ObvFeature {
    let o = &outputs.obv;
    let mut score = match o.trend {
        Trend::Rising => 0.4,
        Trend::Falling => -0.4,
        Trend::Flat => 0.0,
    };
    score += match o.divergence {
        DivergenceKind::Bullish => 0.3,
        DivergenceKind::Bearish => -0.3,
        DivergenceKind::None => 0.0,
    };
    ObvFeature {
        value: o.value,
        trend: o.trend,
        divergence: o.divergence,
        score: clamp_unit(score),
    }
}

fn ichimoku_feature(outputs: &IndicatorOutputs) -> IchimokuFeature {
    let i = &outputs.ichimoku;
    let tk_bullish = i.tk_bullish();
    let mut score = match i.cloud {
        CloudPosition::Above if tk_bullish => 0.7,
        CloudPosition::Above => 0.4,
        CloudPosition::Below if i.tenkan < i.kijun => -0.7,
        CloudPosition::Below => -0.4,
        CloudPosition::Inside => 0.0,
    };
    if i.chikou > i.chikou_reference {
        score += 0.1;
    } else if i.chikou < i.chikou_reference {
        score -= 0.1;
    }
    IchimokuFeature {
        tenkan: i.tenkan,
        kijun: i.kijun,
        senkou_a: i.senkou_a,
        senkou_b: i.senkou_b,
        chikou: i.chikou,
        cloud: i.cloud,
        tk_bullish,
        score: clamp_unit(score),
    }
}

fn vwap_feature(outputs: &IndicatorOutputs) -> VwapFeature {
    let w = &outputs.vwap;
    // 2% away from VWAP saturates the score
    let score = (w.deviation * 30.0).clamp(-0.6, 0.6);
    VwapFeature {
        vwap: w.vwap,
        deviation: w.deviation,
        above: w.deviation > 0.0,
        score: clamp_unit(score),
    }
}

/// Price/RSI divergence over the trailing window.
///
/// Bullish when the lowest low falls after the pivot while RSI at that low
/// sits above RSI at the pivot; bearish mirrors it with highs.
pub fn detect_divergence(candles: &[Candle], rsi_series: &[f64]) -> Divergence {
    let n = candles.len();
    // The window must lie entirely past the RSI warm-up
    if n != rsi_series.len() || n < Rsi::default().min_periods() + DIVERGENCE_WINDOW - 1 {
        return Divergence::none();
    }

    let window = &candles[n - DIVERGENCE_WINDOW..];
    let rsi = &rsi_series[n - DIVERGENCE_WINDOW..];

    let low_idx = index_of(window.iter().map(|c| c.low), |a, b| a < b);
    let high_idx = index_of(window.iter().map(|c| c.high), |a, b| a > b);

    let bullish_gap = match low_idx {
        Some(i) if i > DIVERGENCE_PIVOT && rsi[i] > rsi[DIVERGENCE_PIVOT] => {
            rsi[i] - rsi[DIVERGENCE_PIVOT]
        }
        _ => 0.0,
    };
    let bearish_gap = match high_idx {
        Some(i) if i > DIVERGENCE_PIVOT && rsi[i] < rsi[DIVERGENCE_PIVOT] => {
            rsi[DIVERGENCE_PIVOT] - rsi[i]
        }
        _ => 0.0,
    };

    let (kind, gap) = if bullish_gap <= 0.0 && bearish_gap <= 0.0 {
        return Divergence::none();
    } else if bullish_gap >= bearish_gap {
        (DivergenceKind::Bullish, bullish_gap)
    } else {
        (DivergenceKind::Bearish, bearish_gap)
    };

    Divergence {
        present: true,
        kind,
        strength: (gap / 20.0).clamp(0.5, 1.0),
    }
}

/// Index of the extreme value; the last occurrence wins ties.
fn index_of<I, F>(values: I, better: F) -> Option<usize>
where
    I: Iterator<Item = f64>,
    F: Fn(f64, f64) -> bool,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if better(b, v) => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
