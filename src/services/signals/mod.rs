//! Signal generation: indicator library, feature extraction, classifier,
//! ensemble scoring and level computation.

pub mod classifier;
pub mod features;
pub mod indicators;
pub mod levels;
pub mod scoring;

pub use classifier::{
    feature_vector, Classifier, LabeledExample, LogisticClassifier, TrainingReport,
    FEATURE_VECTOR_LEN,
};
pub use features::FeatureExtractor;
pub use indicators::{IndicatorLibrary, IndicatorOutputs};
pub use levels::{LevelOptimizer, LevelPlan};
pub use scoring::ScoringEngine;

use crate::types::Candle;

/// Trait implemented by every technical indicator.
///
/// `calculate` never fails: when the history is shorter than
/// `min_periods` it returns the indicator's neutral output.
pub trait Indicator: Send + Sync {
    type Output: Clone + std::fmt::Debug;

    /// Unique identifier for this indicator.
    fn id(&self) -> &str;

    /// Minimum number of candles required for a non-neutral result.
    fn min_periods(&self) -> usize;

    /// Calculate from candles ordered oldest first.
    fn calculate(&self, candles: &[Candle]) -> Self::Output;
}

/// Clamp a score to [-1, 1], mapping non-finite values to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Replace a non-finite value by a fallback.
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
