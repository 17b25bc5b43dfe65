//! Ensemble scoring: weighted indicator vote blended with the classifier.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::indicators::Atr;
use super::{Classifier, FeatureExtractor, Indicator, LevelOptimizer};
use crate::error::{AppError, Result};
use crate::services::clock::Clock;
use crate::services::learning::WeightAdaptationLoop;
use crate::services::sqlite_store::AuditSink;
use crate::types::{
    sanitize_series, Candle, Direction, FeatureSet, IndicatorWeights, MlConfidence, Signal,
    SignalStatus, Timeframe, INDICATOR_NAMES,
};

/// Normalized scores below this are too weak to act on.
pub const MIN_NORMALIZED_SCORE: f64 = 25.0;
/// Share of the hybrid score taken from the indicator ensemble.
const ENSEMBLE_SHARE: f64 = 0.6;
/// Minimum |score| for an indicator to count as a contributor.
const CONTRIBUTOR_THRESHOLD: f64 = 0.1;
const NEUTRAL_PROBABILITY: f64 = 0.5;

/// Weighted sum of indicator scores, in [-1, 1] when weights sum to 1.
pub fn weighted_score(features: &FeatureSet, weights: &IndicatorWeights) -> f64 {
    weights
        .iter()
        .filter_map(|(name, weight)| features.score_of(name).map(|score| score * weight))
        .sum()
}

/// Map a raw ensemble score from [-1, 1] onto [0, 100].
pub fn normalize_score(raw: f64) -> f64 {
    ((raw + 1.0) * 50.0).clamp(0.0, 100.0)
}

/// Blend the normalized ensemble score with the classifier probability.
pub fn hybrid_score(normalized: f64, probability: f64) -> u8 {
    let blended = normalized * ENSEMBLE_SHARE + probability * 100.0 * (1.0 - ENSEMBLE_SHARE);
    blended.round().clamp(0.0, 100.0) as u8
}

/// Indicators whose score magnitude exceeds the contributor threshold, sorted.
pub fn contributors(features: &FeatureSet) -> Vec<String> {
    let mut names: Vec<String> = INDICATOR_NAMES
        .iter()
        .zip(features.scores())
        .filter(|(_, score)| score.abs() > CONTRIBUTOR_THRESHOLD)
        .map(|(name, _)| name.to_string())
        .collect();
    names.sort();
    names
}

/// Turns a candle snapshot into a candidate signal.
pub struct ScoringEngine {
    timeframe: Timeframe,
    extractor: FeatureExtractor,
    classifier: Arc<dyn Classifier>,
    levels: Arc<LevelOptimizer>,
    learning: Arc<WeightAdaptationLoop>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl ScoringEngine {
    pub fn new(
        timeframe: Timeframe,
        classifier: Arc<dyn Classifier>,
        levels: Arc<LevelOptimizer>,
        learning: Arc<WeightAdaptationLoop>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            timeframe,
            extractor: FeatureExtractor::new(),
            classifier,
            levels,
            learning,
            audit,
            clock,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Candles needed for every indicator to leave its neutral default.
    pub fn required_history(&self) -> usize {
        self.extractor.library().max_lookback()
    }

    /// Score a candle series.
    ///
    /// `Ok(None)` means no signal: empty or invalid input, or a normalized
    /// score under the floor. Errors are reserved for misconfiguration.
    pub async fn score(&self, candles: &[Candle], symbol: &str) -> Result<Option<Signal>> {
        if symbol.trim().is_empty() {
            return Err(AppError::BadRequest("symbol must not be empty".into()));
        }
        let weights = self.learning.weights().await;
        if weights.is_empty() {
            return Err(AppError::Internal("indicator weights are empty".into()));
        }

        let candles = sanitize_series(candles.to_vec());
        let Some(last) = candles.last().copied() else {
            debug!("No candles to score for {}", symbol);
            return Ok(None);
        };
        if !last.is_valid() {
            debug!("Latest {} candle is invalid, skipping", symbol);
            return Ok(None);
        }

        let (_, features) = self.extractor.extract_candles(&candles);
        if features.scores().iter().any(|s| !s.is_finite()) {
            debug!("Non-finite feature scores for {}, skipping", symbol);
            return Ok(None);
        }

        let raw = weighted_score(&features, &weights);
        if !raw.is_finite() {
            return Ok(None);
        }
        let normalized = normalize_score(raw);
        if normalized < MIN_NORMALIZED_SCORE {
            debug!(
                "{} score {:.1} below floor {}",
                symbol, normalized, MIN_NORMALIZED_SCORE
            );
            return Ok(None);
        }

        let direction = if raw > 0.0 {
            Direction::Buy
        } else {
            Direction::Sell
        };
        let probability = match self.classifier.predict(&features).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Classifier prediction failed, using neutral probability: {}", e);
                NEUTRAL_PROBABILITY
            }
        };
        let score = hybrid_score(normalized, probability);

        let now = self.clock.now_ms();
        let entry_time = self.timeframe.next_period_start(now);
        let atr = Atr::new(1).calculate(&candles);
        let plan = self
            .levels
            .get_optimal_levels(last.close, atr, self.timeframe, direction, &candles)
            .await;

        let signal = Signal {
            id: Uuid::now_v7(),
            generated_at: now,
            symbol: symbol.to_string(),
            direction,
            timeframe: self.timeframe,
            score,
            ml_probability: probability,
            ml_confidence: MlConfidence::from_probability(probability),
            price: last.close,
            entry_time,
            expiration_time: entry_time + self.timeframe.period_ms(),
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
            risk_reward: plan.risk_reward,
            contributors: contributors(&features),
            divergence: features.divergence(),
            features,
            status: SignalStatus::Pending,
            pnl: 0.0,
            final_price: None,
            executed: false,
            execution_details: None,
            resolved_at: None,
            resolution_reason: None,
            outcome_candle_time: None,
            chained_entry_price: None,
        };

        debug!(
            "Candidate {} {} {} score {} (ensemble {:.1}, p {:.2}) entry {}",
            signal.id,
            symbol,
            direction.as_option_side(),
            score,
            normalized,
            probability,
            entry_time
        );

        if let Err(e) = self.audit.log_signal_generation(&signal).await {
            warn!("Failed to audit candidate {}: {}", signal.id, e);
        }
        Ok(Some(signal))
    }
}
