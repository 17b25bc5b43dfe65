//! Online indicator weight adaptation and periodic model maintenance.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::signals::{Classifier, LabeledExample, LevelOptimizer, TrainingReport};
use super::sqlite_store::SignalRepository;
use crate::config::LearningConfig;
use crate::error::Result;
use crate::types::{
    IndicatorWeights, PerformanceStats, RatioPair, Signal, SignalStatus, Timeframe,
};

#[derive(Default)]
struct LearningState {
    performance: PerformanceStats,
    /// Resolved signals, oldest first.
    history: VecDeque<Signal>,
    resolved_count: u64,
}

/// Adapts indicator weights from realized outcomes.
///
/// Weight updates are serialized by a single write lock, so concurrent
/// resolutions never interleave a read-modify-write. Every
/// `snapshot_every` resolutions the weights are persisted together with
/// the performance counters; every `retrain_every` resolutions the
/// classifier is retrained in the background.
pub struct WeightAdaptationLoop {
    config: LearningConfig,
    weights: RwLock<IndicatorWeights>,
    state: Mutex<LearningState>,
    store: Arc<dyn SignalRepository>,
    classifier: Arc<dyn Classifier>,
    levels: Arc<LevelOptimizer>,
    retraining: AtomicBool,
}

impl WeightAdaptationLoop {
    pub fn new(
        config: LearningConfig,
        store: Arc<dyn SignalRepository>,
        classifier: Arc<dyn Classifier>,
        levels: Arc<LevelOptimizer>,
    ) -> Self {
        Self {
            config,
            weights: RwLock::new(IndicatorWeights::default()),
            state: Mutex::new(LearningState::default()),
            store,
            classifier,
            levels,
            retraining: AtomicBool::new(false),
        }
    }

    /// Restore weights, counters and recent history from the store.
    pub async fn restore(&self) -> Result<()> {
        if let Some(snapshot) = self.store.latest_weights_snapshot().await? {
            info!(
                "Restored weights snapshot from {} ({} resolved)",
                snapshot.created_at, snapshot.performance.resolved
            );
            *self.weights.write().await = snapshot.weights;
            let mut state = self.state.lock().await;
            state.resolved_count = snapshot.performance.resolved;
            state.performance = snapshot.performance;
        }

        let resolved: Vec<Signal> = self
            .store
            .get_all_signals()
            .await?
            .into_iter()
            .filter(|s| s.status.is_resolved())
            .collect();
        let skip = resolved.len().saturating_sub(self.config.history_limit);

        let mut state = self.state.lock().await;
        state.history = resolved.into_iter().skip(skip).collect();
        debug!("Loaded {} resolved signals into learning history", state.history.len());
        Ok(())
    }

    pub async fn weights(&self) -> IndicatorWeights {
        self.weights.read().await.clone()
    }

    pub async fn performance(&self) -> PerformanceStats {
        self.state.lock().await.performance.clone()
    }

    /// Resolved signals seen so far, including restored ones.
    pub async fn history(&self) -> Vec<Signal> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    /// Adjust the weights of the signal's contributing indicators.
    ///
    /// Returns false when `result` carries no feedback (TIE, PENDING,
    /// CANCELED).
    pub async fn learn_from_outcome(&self, signal: &Signal, result: SignalStatus) -> bool {
        let base = self.config.base_rate;
        let multiplier = if signal.divergence.is_some_and(|d| d.present) {
            2.0
        } else {
            1.0
        };

        let (delta, floor) = match result {
            SignalStatus::Win => (base * multiplier, 0.0),
            SignalStatus::Loss => (-base * multiplier, 0.0),
            SignalStatus::Expired => (-base * 0.5, self.config.expired_floor),
            _ => return false,
        };

        let mut weights = self.weights.write().await;
        for name in &signal.contributors {
            let Some(current) = weights.get(name) else {
                continue;
            };
            let updated = if delta >= 0.0 {
                (current + delta).min(1.0)
            } else {
                // A penalty never raises a weight already under the floor
                (current + delta).max(floor.min(current))
            };
            weights.set(name, updated);
        }
        weights.normalize();

        debug!(
            "Applied {} feedback ({:+.3}) to {:?} for signal {}",
            result.as_str(),
            delta,
            signal.contributors,
            signal.id
        );
        true
    }

    /// Record a resolution and drive the snapshot/retrain cadence.
    ///
    /// `previous` is the provisional outcome being superseded, if any; its
    /// counters are reverted and it does not count towards the cadence a
    /// second time.
    pub async fn on_resolved(
        self: &Arc<Self>,
        signal: &Signal,
        feed: bool,
        previous: Option<&Signal>,
    ) {
        if !signal.status.is_resolved() {
            return;
        }

        let (snapshot_due, retrain_due, performance) = {
            let mut state = self.state.lock().await;
            if let Some(previous) = previous {
                state.performance.revert(previous.status, previous.pnl);
            }
            state.performance.record(signal.status, signal.pnl);

            if let Some(existing) = state.history.iter_mut().find(|s| s.id == signal.id) {
                *existing = signal.clone();
            } else {
                state.history.push_back(signal.clone());
                while state.history.len() > self.config.history_limit {
                    state.history.pop_front();
                }
            }

            if previous.is_some() {
                (false, false, state.performance.clone())
            } else {
                state.resolved_count += 1;
                let count = state.resolved_count;
                (
                    count % self.config.snapshot_every.max(1) == 0,
                    count % self.config.retrain_every.max(1) == 0,
                    state.performance.clone(),
                )
            }
        };

        if feed {
            self.learn_from_outcome(signal, signal.status).await;
        }

        if snapshot_due {
            let weights = self.weights().await;
            match self.store.save_weights_snapshot(&weights, &performance).await {
                Ok(()) => info!(
                    "Saved weights snapshot ({} resolved, win rate {:.1}%)",
                    performance.resolved,
                    performance.win_rate() * 100.0
                ),
                Err(e) => warn!("Failed to save weights snapshot: {}", e),
            }
        }

        if retrain_due {
            self.spawn_retrain();
        }
    }

    /// Retrain the classifier in the background unless a run is active.
    pub fn spawn_retrain(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.retraining.swap(true, Ordering::SeqCst) {
            debug!("Retraining already in progress, skipping");
            return None;
        }
        let learner = Arc::clone(self);
        Some(tokio::spawn(async move {
            match learner.retrain().await {
                Ok(report) => info!(
                    "Classifier retraining on {} examples: {}",
                    report.examples,
                    report.message.as_deref().unwrap_or("done")
                ),
                Err(e) => warn!("Classifier retraining failed: {}", e),
            }
            learner.retraining.store(false, Ordering::SeqCst);
        }))
    }

    /// Train the classifier on the WIN/LOSS history and persist it.
    pub async fn retrain(&self) -> Result<TrainingReport> {
        let examples: Vec<LabeledExample> = {
            let state = self.state.lock().await;
            state
                .history
                .iter()
                .filter_map(LabeledExample::from_signal)
                .collect()
        };
        let report = self
            .classifier
            .train(examples, self.config.epochs, self.config.batch_size)
            .await?;
        if report.trained {
            self.classifier.persist().await?;
        }
        Ok(report)
    }

    /// Re-tune level multipliers from the resolved history.
    pub async fn retune(&self) -> Vec<(Timeframe, RatioPair)> {
        let history = self.history().await;
        self.levels.learn_from_results(&history).await
    }

    /// Run `retune` on the configured interval until the handle is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_millis(self.config.retune_interval_ms.max(1));
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let changed = self.retune().await;
                if changed.is_empty() {
                    debug!("Level re-tune made no changes");
                }
            }
        })
    }
}
