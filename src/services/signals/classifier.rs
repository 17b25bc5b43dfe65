//! Trainable classifier estimating the probability of a favorable outcome.
//!
//! The engine only talks to the [`Classifier`] trait. The bundled
//! [`LogisticClassifier`] is a logistic regression trained with shuffled
//! mini-batch gradient descent and persisted as JSON.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::types::{FeatureSet, Signal, SignalStatus};

/// Eight indicator scores plus the divergence flag.
pub const FEATURE_VECTOR_LEN: usize = 9;
/// Below this many labeled examples training is skipped.
pub const MIN_TRAINING_EXAMPLES: usize = 20;

/// Map a feature set into the classifier input space.
///
/// Each score moves from [-1, 1] to [0, 1]; the last slot is 1 when a
/// divergence is present.
pub fn feature_vector(features: &FeatureSet) -> [f64; FEATURE_VECTOR_LEN] {
    let mut vector = [0.0; FEATURE_VECTOR_LEN];
    for (slot, score) in vector.iter_mut().zip(features.scores()) {
        *slot = ((score + 1.0) / 2.0).clamp(0.0, 1.0);
    }
    vector[FEATURE_VECTOR_LEN - 1] = if features.divergence().is_some() {
        1.0
    } else {
        0.0
    };
    vector
}

/// One training row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub features: [f64; FEATURE_VECTOR_LEN],
    /// 1.0 for WIN, 0.0 for LOSS.
    pub label: f64,
}

impl LabeledExample {
    /// Build from a resolved signal. Only WIN and LOSS produce examples.
    pub fn from_signal(signal: &Signal) -> Option<Self> {
        let label = match signal.status {
            SignalStatus::Win => 1.0,
            SignalStatus::Loss => 0.0,
            _ => return None,
        };
        Some(Self {
            features: feature_vector(&signal.features),
            label,
        })
    }
}

/// Outcome of a `train` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    /// False when training was skipped.
    pub trained: bool,
    pub examples: usize,
    pub epochs: usize,
    pub final_loss: Option<f64>,
    pub accuracy: Option<f64>,
    pub message: Option<String>,
}

impl TrainingReport {
    fn insufficient(examples: usize) -> Self {
        Self {
            trained: false,
            examples,
            epochs: 0,
            final_loss: None,
            accuracy: None,
            message: Some(format!(
                "insufficient training data: {} examples, need {}",
                examples, MIN_TRAINING_EXAMPLES
            )),
        }
    }
}

/// Binary classifier contract used by the scoring engine and learning loop.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Probability in [0, 1] that a signal with these features wins.
    async fn predict(&self, features: &FeatureSet) -> Result<f64>;

    /// Fit on labeled examples. A no-op report below the minimum count.
    async fn train(
        &self,
        examples: Vec<LabeledExample>,
        epochs: usize,
        batch_size: usize,
    ) -> Result<TrainingReport>;

    /// Save the current model.
    async fn persist(&self) -> Result<()>;

    /// Restore a saved model. Returns false when none exists.
    async fn load(&self) -> Result<bool>;
}

/// Serialized model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub trained_examples: usize,
    pub trained_at: Option<i64>,
}

impl Default for LogisticModel {
    fn default() -> Self {
        // Zero weights predict exactly 0.5 until trained
        Self {
            weights: vec![0.0; FEATURE_VECTOR_LEN],
            bias: 0.0,
            trained_examples: 0,
            trained_at: None,
        }
    }
}

impl LogisticModel {
    fn probability(&self, x: &[f64; FEATURE_VECTOR_LEN]) -> f64 {
        let z = self
            .weights
            .iter()
            .zip(x.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.bias;
        sigmoid(z)
    }

    fn is_valid(&self) -> bool {
        self.weights.len() == FEATURE_VECTOR_LEN
            && self.weights.iter().all(|w| w.is_finite())
            && self.bias.is_finite()
    }

    /// Mini-batch gradient descent with L2 regularization.
    fn fit(
        &mut self,
        mut examples: Vec<LabeledExample>,
        epochs: usize,
        batch_size: usize,
        learning_rate: f64,
        l2: f64,
    ) -> TrainingReport {
        let batch_size = batch_size.max(1);
        let mut rng = rand::thread_rng();

        for _ in 0..epochs {
            examples.shuffle(&mut rng);
            for batch in examples.chunks(batch_size) {
                let mut grad_w = [0.0; FEATURE_VECTOR_LEN];
                let mut grad_b = 0.0;
                for example in batch {
                    let error = self.probability(&example.features) - example.label;
                    for (g, v) in grad_w.iter_mut().zip(example.features.iter()) {
                        *g += error * v;
                    }
                    grad_b += error;
                }
                let n = batch.len() as f64;
                for (w, g) in self.weights.iter_mut().zip(grad_w.iter()) {
                    *w -= learning_rate * (g / n + l2 * *w);
                }
                self.bias -= learning_rate * grad_b / n;
            }
        }

        let (loss, correct) = examples.iter().fold((0.0, 0usize), |(loss, correct), e| {
            let p = self.probability(&e.features).clamp(1e-12, 1.0 - 1e-12);
            let l = -(e.label * p.ln() + (1.0 - e.label) * (1.0 - p).ln());
            let hit = (p >= 0.5) == (e.label >= 0.5);
            (loss + l, correct + usize::from(hit))
        });
        let n = examples.len() as f64;
        self.trained_examples = examples.len();
        self.trained_at = Some(chrono::Utc::now().timestamp_millis());

        TrainingReport {
            trained: true,
            examples: examples.len(),
            epochs,
            final_loss: Some(loss / n),
            accuracy: Some(correct as f64 / n),
            message: None,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Logistic-regression classifier.
pub struct LogisticClassifier {
    model: RwLock<LogisticModel>,
    model_path: Option<PathBuf>,
    learning_rate: f64,
    l2: f64,
}

impl LogisticClassifier {
    pub fn new(model_path: Option<PathBuf>) -> Self {
        Self {
            model: RwLock::new(LogisticModel::default()),
            model_path,
            learning_rate: 0.1,
            l2: 0.001,
        }
    }

    /// Classifier that never touches disk.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub async fn snapshot(&self) -> LogisticModel {
        self.model.read().await.clone()
    }
}

#[async_trait]
impl Classifier for LogisticClassifier {
    async fn predict(&self, features: &FeatureSet) -> Result<f64> {
        let x = feature_vector(features);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Classifier("non-finite feature vector".into()));
        }
        let p = self.model.read().await.probability(&x);
        if p.is_finite() {
            Ok(p.clamp(0.0, 1.0))
        } else {
            Err(AppError::Classifier("non-finite probability".into()))
        }
    }

    async fn train(
        &self,
        examples: Vec<LabeledExample>,
        epochs: usize,
        batch_size: usize,
    ) -> Result<TrainingReport> {
        if examples.len() < MIN_TRAINING_EXAMPLES {
            debug!(
                "Skipping classifier training: {} examples (need {})",
                examples.len(),
                MIN_TRAINING_EXAMPLES
            );
            return Ok(TrainingReport::insufficient(examples.len()));
        }

        // Train a copy off the async runtime, then swap it in
        let mut candidate = self.model.read().await.clone();
        let learning_rate = self.learning_rate;
        let l2 = self.l2;
        let (candidate, report) = tokio::task::spawn_blocking(move || {
            let report = candidate.fit(examples, epochs, batch_size, learning_rate, l2);
            (candidate, report)
        })
        .await
        .map_err(|e| AppError::Classifier(format!("training task failed: {}", e)))?;

        if !candidate.is_valid() {
            return Err(AppError::Classifier("training diverged".into()));
        }

        *self.model.write().await = candidate;
        info!(
            "Classifier trained on {} examples (loss {:.4}, accuracy {:.2})",
            report.examples,
            report.final_loss.unwrap_or(0.0),
            report.accuracy.unwrap_or(0.0)
        );
        Ok(report)
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.model_path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&*self.model.read().await)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, json).await?;
        debug!("Classifier model saved to {}", path.display());
        Ok(())
    }

    async fn load(&self) -> Result<bool> {
        let Some(path) = &self.model_path else {
            return Ok(false);
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let model: LogisticModel = serde_json::from_slice(&bytes)?;
        if !model.is_valid() {
            warn!("Ignoring invalid classifier model at {}", path.display());
            return Ok(false);
        }
        info!(
            "Loaded classifier model ({} training examples) from {}",
            model.trained_examples,
            path.display()
        );
        *self.model.write().await = model;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::signals::test_support::{downtrend, uptrend};
    use crate::services::signals::FeatureExtractor;

    fn example(bullish: bool) -> LabeledExample {
        let mut features = [0.5; FEATURE_VECTOR_LEN];
        features[0] = if bullish { 0.9 } else { 0.1 };
        features[FEATURE_VECTOR_LEN - 1] = 0.0;
        LabeledExample {
            features,
            label: if bullish { 1.0 } else { 0.0 },
        }
    }

    #[test]
    fn test_feature_vector_bounds() {
        let (_, features) = FeatureExtractor::new().extract_candles(&uptrend(60));
        let v = feature_vector(&features);
        assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[tokio::test]
    async fn test_untrained_predicts_neutral() {
        let classifier = LogisticClassifier::in_memory();
        let (_, features) = FeatureExtractor::new().extract_candles(&downtrend(60));
        let p = classifier.predict(&features).await.unwrap();
        assert!((p - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_train_requires_minimum_examples() {
        let classifier = LogisticClassifier::in_memory();
        let examples: Vec<_> = (0..10).map(|i| example(i % 2 == 0)).collect();
        let report = classifier.train(examples, 10, 4).await.unwrap();
        assert!(!report.trained);
        assert_eq!(report.examples, 10);
        assert_eq!(classifier.snapshot().await, LogisticModel::default());
    }

    #[tokio::test]
    async fn test_train_learns_separable_data() {
        let classifier = LogisticClassifier::in_memory();
        let examples: Vec<_> = (0..60).map(|i| example(i % 2 == 0)).collect();
        let report = classifier.train(examples, 200, 8).await.unwrap();
        assert!(report.trained);
        assert!(report.accuracy.unwrap() > 0.9);

        let model = classifier.snapshot().await;
        assert!(model.probability(&example(true).features) > 0.5);
        assert!(model.probability(&example(false).features) < 0.5);
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let dir = std::env::temp_dir().join(format!("augur-model-{}", uuid::Uuid::new_v4()));
        let path = dir.join("model.json");

        let classifier = LogisticClassifier::new(Some(path.clone()));
        assert!(!classifier.load().await.unwrap());
        let examples: Vec<_> = (0..40).map(|i| example(i % 3 == 0)).collect();
        classifier.train(examples, 20, 8).await.unwrap();
        classifier.persist().await.unwrap();

        let restored = LogisticClassifier::new(Some(path));
        assert!(restored.load().await.unwrap());
        let (a, b) = (restored.snapshot().await, classifier.snapshot().await);
        assert_eq!(a.trained_examples, b.trained_examples);
        for (x, y) in a.weights.iter().zip(b.weights.iter()) {
            assert!((x - y).abs() < 1e-12);
        }

        let _ = std::fs::remove_dir_all(dir);
    }
}
