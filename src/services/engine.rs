//! Engine orchestration: analysis ticks, commit handling and recovery.

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::arbitration::{CandidateArbitrationCache, SubmitOutcome};
use super::context::EngineContext;
use super::learning::WeightAdaptationLoop;
use super::signals::{Classifier, LevelOptimizer, ScoringEngine};
use super::verification::OutcomeVerificationScheduler;
use crate::config::Config;
use crate::error::Result;
use crate::types::{NotificationEvent, Signal};

/// Owns one symbol's scoring pipeline and the in-flight signal lifecycle.
pub struct SignalEngine {
    config: Config,
    ctx: EngineContext,
    classifier: Arc<dyn Classifier>,
    scoring: ScoringEngine,
    arbitration: Arc<CandidateArbitrationCache>,
    verification: Arc<OutcomeVerificationScheduler>,
    learning: Arc<WeightAdaptationLoop>,
    committed_rx: Mutex<Option<mpsc::UnboundedReceiver<Signal>>>,
    /// Serializes analysis ticks.
    tick_lock: tokio::sync::Mutex<()>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalEngine {
    pub fn new(
        config: Config,
        ctx: EngineContext,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Arc<Self>> {
        config.engine.validate()?;

        let levels = Arc::new(LevelOptimizer::new(config.levels.clone()));
        let learning = Arc::new(WeightAdaptationLoop::new(
            config.learning.clone(),
            ctx.store.clone(),
            classifier.clone(),
            levels.clone(),
        ));
        let scoring = ScoringEngine::new(
            config.engine.timeframe,
            classifier.clone(),
            levels,
            learning.clone(),
            ctx.audit.clone(),
            ctx.clock.clone(),
        );
        let (arbitration, committed_rx) = CandidateArbitrationCache::new(
            config.arbitration.clone(),
            config.engine.min_score,
            config.engine.lead_window_ms,
            ctx.clock.clone(),
        );
        let verification = OutcomeVerificationScheduler::new(
            config.engine.clone(),
            config.verification.clone(),
            ctx.clone(),
            learning.clone(),
        );
        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Arc::new(Self {
            config,
            ctx,
            classifier,
            scoring,
            arbitration,
            verification,
            learning,
            committed_rx: Mutex::new(Some(committed_rx)),
            tick_lock: tokio::sync::Mutex::new(()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn arbitration(&self) -> &Arc<CandidateArbitrationCache> {
        &self.arbitration
    }

    pub fn verification(&self) -> &Arc<OutcomeVerificationScheduler> {
        &self.verification
    }

    pub fn learning(&self) -> &Arc<WeightAdaptationLoop> {
        &self.learning
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// Restore state, recover pending signals and start the background loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        match self.classifier.load().await {
            Ok(true) => info!("Classifier model restored"),
            Ok(false) => info!("No saved classifier model, starting untrained"),
            Err(e) => warn!("Failed to load classifier model: {}", e),
        }
        if let Err(e) = self.learning.restore().await {
            warn!("Failed to restore learning state: {}", e);
        }

        let recovered = self.recover_pending().await?;
        if recovered > 0 {
            info!("Recovered {} pending signals", recovered);
        }

        let mut handles = Vec::new();
        if let Some(rx) = self.committed_rx.lock().ok().and_then(|mut rx| rx.take()) {
            handles.push(self.spawn_commit_consumer(rx));
        } else {
            warn!("Engine already started; not spawning a second commit consumer");
            return Ok(());
        }
        handles.push(self.spawn_tick_loop());
        handles.push(Arc::clone(&self.learning).start());

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
        info!(
            "Signal engine started for {} on {} (min score {}, auto-execute {})",
            self.config.symbol,
            self.config.engine.timeframe,
            self.config.engine.min_score,
            self.config.engine.auto_execute
        );
        Ok(())
    }

    /// Hand every PENDING signal in the store back to the verification
    /// scheduler.
    pub async fn recover_pending(self: &Arc<Self>) -> Result<usize> {
        let pending: Vec<Signal> = self
            .ctx
            .store
            .get_all_signals()
            .await?
            .into_iter()
            .filter(Signal::is_pending)
            .collect();

        let mut recovered = 0;
        for signal in pending {
            debug!("Recovering pending signal {} ({})", signal.id, signal.symbol);
            if self.verification.schedule(signal) {
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// One analysis pass: fetch, score, and hand the candidate to arbitration.
    ///
    /// Ticks never overlap; a concurrent call waits for the running one.
    pub async fn tick(&self) -> Result<Option<SubmitOutcome>> {
        let _guard = self.tick_lock.lock().await;
        let symbol = &self.config.symbol;
        let timeframe = self.config.engine.timeframe;

        let candles = self
            .ctx
            .candles
            .fetch_recent_candles(symbol, timeframe, self.config.engine.candle_history)
            .await?;
        self.ctx.cache.upsert(symbol, timeframe, &candles);
        self.ctx.cache.cleanup();

        let closed: Vec<_> = candles.into_iter().filter(|c| c.closed).collect();
        if closed.len() < self.scoring.required_history() {
            debug!(
                "Only {} closed {} candles for {}, indicators partly neutral",
                closed.len(),
                timeframe,
                symbol
            );
        }

        let Some(candidate) = self.scoring.score(&closed, symbol).await? else {
            return Ok(None);
        };
        let outcome = self.arbitration.submit(candidate);
        debug!("Candidate for {} submitted: {:?}", symbol, outcome);
        Ok(Some(outcome))
    }

    /// Persist a committed signal, optionally execute it, and schedule its
    /// verification.
    pub async fn handle_commit(&self, mut signal: Signal) {
        if self.config.engine.auto_execute {
            match self
                .ctx
                .broker
                .execute_signal(&signal, self.config.engine.risk_amount)
                .await
            {
                Ok(result) => {
                    signal.executed = result.success;
                    if result.success {
                        info!(
                            "Executed signal {} (order {:?})",
                            signal.id, result.order_id
                        );
                        self.ctx.notifier.notify(
                            NotificationEvent::SignalExecuted,
                            json!({ "signalId": signal.id, "orderId": result.order_id }),
                        );
                    } else {
                        warn!(
                            "Broker rejected signal {}: {}",
                            signal.id,
                            result.message.as_deref().unwrap_or("no reason given")
                        );
                    }
                    signal.execution_details = Some(result);
                }
                Err(e) => warn!("Execution of signal {} failed: {}", signal.id, e),
            }
        }

        if let Err(e) = self.ctx.store.save_signal(&signal).await {
            warn!("Failed to persist committed signal {}: {}", signal.id, e);
        }
        self.ctx.notifier.notify(
            NotificationEvent::SignalCommitted,
            json!({
                "signalId": signal.id,
                "symbol": signal.symbol,
                "direction": signal.direction,
                "score": signal.score,
                "entryTime": signal.entry_time,
                "expirationTime": signal.expiration_time,
                "executed": signal.executed,
            }),
        );
        self.verification.schedule(signal);
    }

    /// Cancel a pending signal.
    pub async fn dismiss(&self, id: Uuid, reason: &str) -> bool {
        self.verification.dismiss(id, reason).await
    }

    fn spawn_commit_consumer(
        self: &Arc<Self>,
        mut committed_rx: mpsc::UnboundedReceiver<Signal>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    committed = committed_rx.recv() => match committed {
                        Some(signal) => engine.handle_commit(signal).await,
                        None => break,
                    },
                }
            }
            debug!("Commit consumer stopped");
        })
    }

    fn spawn_tick_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = Duration::from_millis(self.config.engine.tick_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = engine.tick().await {
                            if e.is_transient() {
                                warn!("Analysis tick failed: {}", e);
                            } else {
                                error!("Analysis tick errored: {}", e);
                            }
                        }
                    }
                }
            }
            debug!("Tick loop stopped");
        })
    }

    /// Stop the loops and cancel every pending timer.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.arbitration.shutdown();
        self.verification.shutdown();
        info!("Signal engine stopped");
    }
}
