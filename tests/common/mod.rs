//! Shared fixtures: scripted collaborators and signal builders.

#![allow(dead_code)]

use async_trait::async_trait;
use augur::config::Config;
use augur::error::{AppError, Result};
use augur::services::sqlite_store::{AuditSink, SignalRepository};
use augur::services::{
    CandleCache, EngineContext, Notifier, Priority, SqliteStore, TokioClock,
};
use augur::sources::{BrokerExecutor, CandleSource};
use augur::types::{
    AuditLog, Candle, Direction, ExecutionResult, FeatureSet, IndicatorWeights, MlConfidence,
    NotificationEvent, PerformanceStats, Signal, SignalStatus, Timeframe, WeightsSnapshot,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Period-aligned base time (a multiple of 15 minutes).
pub const BASE: i64 = 1_699_999_200_000;
/// Test start: ten seconds into the first M5 period.
pub const NOW: i64 = BASE + 10_000;
pub const PERIOD: i64 = 300_000;

pub fn candle(timestamp: i64, open: f64, close: f64) -> Candle {
    Candle {
        timestamp,
        open,
        high: open.max(close) + 0.001,
        low: open.min(close) - 0.001,
        close,
        volume: 100.0,
        closed: true,
    }
}

/// Steadily rising closed M5 candles ending with the period before `BASE`.
pub fn history(count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let base = 100.0 + i as f64 * 1.5;
            Candle {
                timestamp: BASE - (count - i) as i64 * PERIOD,
                open: base,
                high: base + 2.0,
                low: base - 1.0,
                close: base + 1.0,
                volume: 1000.0,
                closed: true,
            }
        })
        .collect()
}

/// A pending M5 signal generated at `generated_at`.
pub fn pending_signal(direction: Direction, generated_at: i64) -> Signal {
    let timeframe = Timeframe::M5;
    let entry_time = timeframe.next_period_start(generated_at);
    Signal {
        id: Uuid::now_v7(),
        generated_at,
        symbol: "EURUSD".to_string(),
        direction,
        timeframe,
        score: 72,
        ml_probability: 0.6,
        ml_confidence: MlConfidence::Low,
        price: 1.1,
        entry_time,
        expiration_time: entry_time + timeframe.period_ms(),
        stop_loss: 1.09,
        take_profit: 1.12,
        risk_reward: 2.0,
        contributors: vec!["macd".to_string(), "rsi".to_string()],
        divergence: None,
        features: FeatureSet::neutral(),
        status: SignalStatus::Pending,
        pnl: 0.0,
        final_price: None,
        executed: false,
        execution_details: None,
        resolved_at: None,
        resolution_reason: None,
        outcome_candle_time: None,
        chained_entry_price: None,
    }
}

/// Candle source answering from scripted data.
#[derive(Default)]
pub struct ScriptedSource {
    pub recent: Mutex<Vec<Candle>>,
    pub at: Mutex<HashMap<i64, Candle>>,
    /// Exact-timestamp calls that fail before data is served.
    pub failures_left: AtomicUsize,
    pub always_fail: AtomicBool,
    /// Artificial latency of exact-timestamp calls.
    pub latency: Mutex<Duration>,
    pub at_calls: AtomicUsize,
    pub recent_calls: AtomicUsize,
    pub priorities: Mutex<Vec<Priority>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_recent(&self, candles: Vec<Candle>) {
        *self.recent.lock().unwrap() = candles;
    }

    pub fn set_candle(&self, candle: Candle) {
        self.at.lock().unwrap().insert(candle.timestamp, candle);
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }
}

#[async_trait]
impl CandleSource for ScriptedSource {
    async fn fetch_recent_candles(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        let recent = self.recent.lock().unwrap().clone();
        let skip = recent.len().saturating_sub(count);
        Ok(recent.into_iter().skip(skip).collect())
    }

    async fn fetch_candle_at(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        timestamp: i64,
        priority: Priority,
    ) -> Result<Option<Candle>> {
        self.at_calls.fetch_add(1, Ordering::SeqCst);
        self.priorities.lock().unwrap().push(priority);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(AppError::ExternalApi("bridge unreachable".into()));
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::ExternalApi("timeout".into()));
        }
        Ok(self.at.lock().unwrap().get(&timestamp).copied())
    }
}

/// Broker that records calls and either fills or errors.
#[derive(Default)]
pub struct ScriptedBroker {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl BrokerExecutor for ScriptedBroker {
    async fn execute_signal(&self, signal: &Signal, risk_amount: f64) -> Result<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::ExternalApi("broker offline".into()));
        }
        Ok(ExecutionResult {
            success: true,
            order_id: Some(format!("order-{}", signal.id)),
            executed_price: Some(signal.price),
            executed_qty: Some(risk_amount),
            message: None,
            executed_at: signal.generated_at,
        })
    }
}

/// Notifier that keeps every event.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(NotificationEvent, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub fn count(&self, event: NotificationEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == event)
            .count()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == NotificationEvent::SignalResolved)
            .filter_map(|(_, payload)| payload["status"].as_str().map(str::to_string))
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: NotificationEvent, payload: serde_json::Value) {
        self.events.lock().unwrap().push((event, payload));
    }
}

/// SQLite store whose writes can be switched off.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::new_in_memory().unwrap(),
            fail_writes: AtomicBool::new(false),
        })
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(AppError::Internal("disk full".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SignalRepository for FlakyStore {
    async fn save_signal(&self, signal: &Signal) -> Result<()> {
        self.check()?;
        self.inner.save_signal(signal).await
    }

    async fn get_all_signals(&self) -> Result<Vec<Signal>> {
        self.inner.get_all_signals().await
    }

    async fn save_weights_snapshot(
        &self,
        weights: &IndicatorWeights,
        performance: &PerformanceStats,
    ) -> Result<()> {
        self.check()?;
        self.inner.save_weights_snapshot(weights, performance).await
    }

    async fn latest_weights_snapshot(&self) -> Result<Option<WeightsSnapshot>> {
        self.inner.latest_weights_snapshot().await
    }

    async fn get_recent_audit_logs(&self, limit: usize) -> Result<Vec<AuditLog>> {
        self.inner.get_recent_audit_logs(limit).await
    }
}

#[async_trait]
impl AuditSink for FlakyStore {
    async fn log_signal_generation(&self, signal: &Signal) -> Result<()> {
        self.check()?;
        self.inner.log_signal_generation(signal).await
    }

    async fn update_signal_outcome(
        &self,
        id: Uuid,
        outcome: SignalStatus,
        final_price: Option<f64>,
        pnl: f64,
        execution_details: Option<&ExecutionResult>,
    ) -> Result<()> {
        self.check()?;
        self.inner
            .update_signal_outcome(id, outcome, final_price, pnl, execution_details)
            .await
    }
}

/// Everything a test needs to drive the engine components.
pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub broker: Arc<ScriptedBroker>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<FlakyStore>,
    pub cache: Arc<CandleCache>,
    pub ctx: EngineContext,
}

impl Harness {
    /// Must be called inside a paused-time runtime.
    pub fn new(config: &Config) -> Self {
        let source = ScriptedSource::new();
        let broker = Arc::new(ScriptedBroker::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let store = FlakyStore::new();
        let cache = Arc::new(CandleCache::default());
        let ctx = EngineContext::new(
            source.clone(),
            store.clone(),
            store.clone(),
            broker.clone(),
        )
        .with_clock(Arc::new(TokioClock::starting_at(NOW)))
        .with_notifier(notifier.clone())
        .with_cache(cache.clone());

        Self {
            source,
            broker,
            notifier,
            store,
            cache,
            ctx,
        }
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.symbol = "EURUSD".to_string();
    config.engine.timeframe = Timeframe::M5;
    config
}

/// Advance paused time in small steps so spawned timers get polled.
pub async fn advance(total: Duration) {
    let step = Duration::from_millis(500);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        let next = step.min(total - elapsed);
        tokio::time::advance(next).await;
        tokio::task::yield_now().await;
        elapsed += next;
    }
}
