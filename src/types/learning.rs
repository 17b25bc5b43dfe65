//! Mutable learning state: indicator weights, level ratios, performance.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::{SignalStatus, Timeframe, INDICATOR_NAMES};

/// Indicator name -> weight in [0, 1], normalized to sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorWeights(BTreeMap<String, f64>);

impl Default for IndicatorWeights {
    fn default() -> Self {
        let defaults = [
            ("rsi", 0.12),
            ("macd", 0.14),
            ("bollinger", 0.12),
            ("stochastic", 0.12),
            ("volume", 0.10),
            ("obv", 0.12),
            ("ichimoku", 0.14),
            ("vwap", 0.14),
        ];
        let mut weights = Self(
            defaults
                .iter()
                .map(|(name, w)| (name.to_string(), *w))
                .collect(),
        );
        weights.normalize();
        weights
    }
}

impl IndicatorWeights {
    /// Build from explicit pairs; the result is normalized.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut weights = Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.clamp(0.0, 1.0)))
                .collect(),
        );
        weights.normalize();
        weights
    }

    /// Equal weight on every ensemble indicator.
    pub fn uniform() -> Self {
        let w = 1.0 / INDICATOR_NAMES.len() as f64;
        Self(INDICATOR_NAMES.iter().map(|n| (n.to_string(), w)).collect())
    }

    pub fn get(&self, indicator: &str) -> Option<f64> {
        self.0.get(indicator).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    /// Set a weight, clamped to [0, 1]. Call `normalize` afterwards.
    pub fn set(&mut self, indicator: &str, weight: f64) {
        if let Some(w) = self.0.get_mut(indicator) {
            *w = weight.clamp(0.0, 1.0);
        }
    }

    /// Rescale so the weights sum to 1. Falls back to uniform when every
    /// weight collapsed to zero.
    pub fn normalize(&mut self) {
        let sum = self.sum();
        if self.0.is_empty() {
            return;
        }
        if !sum.is_finite() || sum <= f64::EPSILON {
            let w = 1.0 / self.0.len() as f64;
            self.0.values_mut().for_each(|v| *v = w);
            return;
        }
        self.0.values_mut().for_each(|v| *v /= sum);
    }
}

/// Take-profit / stop-loss ATR multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatioPair {
    pub take_profit_multiplier: f64,
    pub stop_loss_multiplier: f64,
}

impl RatioPair {
    pub fn new(take_profit_multiplier: f64, stop_loss_multiplier: f64) -> Self {
        Self {
            take_profit_multiplier,
            stop_loss_multiplier,
        }
    }
}

/// Per-timeframe level multipliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalRatios(HashMap<Timeframe, RatioPair>);

impl Default for OptimalRatios {
    fn default() -> Self {
        let mut ratios = HashMap::new();
        ratios.insert(Timeframe::M1, RatioPair::new(1.5, 1.0));
        ratios.insert(Timeframe::M5, RatioPair::new(2.0, 1.0));
        ratios.insert(Timeframe::M15, RatioPair::new(2.5, 1.2));
        Self(ratios)
    }
}

impl OptimalRatios {
    pub fn get(&self, timeframe: Timeframe) -> RatioPair {
        self.0
            .get(&timeframe)
            .copied()
            .unwrap_or_else(|| RatioPair::new(2.0, 1.0))
    }

    pub fn set(&mut self, timeframe: Timeframe, pair: RatioPair) {
        self.0.insert(timeframe, pair);
    }
}

/// Aggregate outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub resolved: u64,
    pub wins: u64,
    pub losses: u64,
    pub ties: u64,
    pub expired: u64,
    pub total_pnl: f64,
}

impl PerformanceStats {
    pub fn record(&mut self, status: SignalStatus, pnl: f64) {
        match status {
            SignalStatus::Win => self.wins += 1,
            SignalStatus::Loss => self.losses += 1,
            SignalStatus::Tie => self.ties += 1,
            SignalStatus::Expired => self.expired += 1,
            SignalStatus::Pending | SignalStatus::Canceled => return,
        }
        self.resolved += 1;
        self.total_pnl += pnl;
    }

    /// Undo a previously recorded outcome, e.g. a provisional EXPIRED that
    /// was later superseded.
    pub fn revert(&mut self, status: SignalStatus, pnl: f64) {
        let counter = match status {
            SignalStatus::Win => &mut self.wins,
            SignalStatus::Loss => &mut self.losses,
            SignalStatus::Tie => &mut self.ties,
            SignalStatus::Expired => &mut self.expired,
            SignalStatus::Pending | SignalStatus::Canceled => return,
        };
        *counter = counter.saturating_sub(1);
        self.resolved = self.resolved.saturating_sub(1);
        self.total_pnl -= pnl;
    }

    /// Wins over decisive outcomes, in [0, 1].
    pub fn win_rate(&self) -> f64 {
        let decisive = self.wins + self.losses;
        if decisive == 0 {
            0.0
        } else {
            self.wins as f64 / decisive as f64
        }
    }
}

/// Periodic persisted view of the learning state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightsSnapshot {
    pub weights: IndicatorWeights,
    pub performance: PerformanceStats,
    pub created_at: i64,
}
