//! Deferred outcome verification.
//!
//! Every committed signal gets four timers: entry (chaining check),
//! pre-fetch (cache warm-up), verification (resolve against the closed
//! candle) and safety (force EXPIRED if still pending). All of them check
//! the tracked state before acting, so a timer firing after dismissal or
//! resolution is a no-op.

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::EngineContext;
use super::learning::WeightAdaptationLoop;
use super::rate_governor::Priority;
use super::timers::{spawn_after, TimerSet};
use crate::config::{EngineConfig, VerificationConfig};
use crate::types::{
    Candle, CandleColor, Direction, NotificationEvent, Signal, SignalStatus, Timeframe,
};

/// Where a tracked signal is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPhase {
    AwaitingEntry,
    AwaitingExpiration,
    Verifying,
    Resolved,
}

/// Exit of the most recent resolution, consulted by the next entry timer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainRecord {
    pub signal_id: Uuid,
    pub exit_price: f64,
    /// True timestamp of the candle the exit came from.
    pub candle_time: i64,
    pub resolved_at: i64,
}

impl ChainRecord {
    /// Whether the record's candle matches `expected_candle_time` within
    /// tolerance and the record is still fresh.
    pub fn applies_to(
        &self,
        expected_candle_time: i64,
        now_ms: i64,
        tolerance_ms: i64,
        staleness_ms: i64,
    ) -> bool {
        now_ms - self.resolved_at <= staleness_ms
            && (self.candle_time - expected_candle_time).abs() <= tolerance_ms
    }
}

struct Tracked {
    signal: Signal,
    phase: VerificationPhase,
    /// EXPIRED written by the safety timer while verification was still running.
    provisional: bool,
}

/// Classify a closed candle against the signal direction.
///
/// A doji (`open == close` exactly) is a TIE for either direction.
pub fn evaluate_outcome(
    direction: Direction,
    candle: &Candle,
    risk_amount: f64,
    payout_rate: f64,
) -> (SignalStatus, f64) {
    let won = match (candle.color(), direction) {
        (CandleColor::Doji, _) => return (SignalStatus::Tie, 0.0),
        (CandleColor::Green, Direction::Buy) | (CandleColor::Red, Direction::Sell) => true,
        (CandleColor::Green, Direction::Sell) | (CandleColor::Red, Direction::Buy) => false,
    };
    if won {
        (SignalStatus::Win, risk_amount * payout_rate)
    } else {
        (SignalStatus::Loss, -risk_amount)
    }
}

/// Per-signal verification state machine.
pub struct OutcomeVerificationScheduler {
    engine: EngineConfig,
    config: VerificationConfig,
    ctx: EngineContext,
    learning: Arc<WeightAdaptationLoop>,
    tracked: DashMap<Uuid, Tracked>,
    timers: DashMap<Uuid, TimerSet>,
    chain: Mutex<Option<ChainRecord>>,
}

impl OutcomeVerificationScheduler {
    pub fn new(
        engine: EngineConfig,
        config: VerificationConfig,
        ctx: EngineContext,
        learning: Arc<WeightAdaptationLoop>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            config,
            ctx,
            learning,
            tracked: DashMap::new(),
            timers: DashMap::new(),
            chain: Mutex::new(None),
        })
    }

    /// Start tracking a pending signal. Returns false if it is not pending
    /// or already tracked.
    pub fn schedule(self: &Arc<Self>, signal: Signal) -> bool {
        if !signal.is_pending() {
            warn!("Not scheduling {} signal {}", signal.status.as_str(), signal.id);
            return false;
        }
        if self.tracked.contains_key(&signal.id) {
            debug!("Signal {} already scheduled", signal.id);
            return false;
        }

        let id = signal.id;
        let now = self.ctx.clock.now_ms();
        let buffer = self.engine.verification_buffer_ms;
        let verify_delay = buffer.max(signal.expiration_time - now + buffer);
        let safety_delay = verify_delay + self.config.safety_timeout_ms as i64;
        let entry_delay = signal.entry_time - now;
        let prefetch_delay = signal.generated_at + self.config.prefetch_delay_ms as i64 - now;

        info!(
            "Scheduling verification for {} {} {} (entry in {}ms, verify in {}ms)",
            signal.id,
            signal.symbol,
            signal.direction.as_option_side(),
            entry_delay.max(0),
            verify_delay
        );

        let phase = if entry_delay > 0 {
            VerificationPhase::AwaitingEntry
        } else {
            VerificationPhase::AwaitingExpiration
        };
        self.tracked.insert(
            id,
            Tracked {
                signal,
                phase,
                provisional: false,
            },
        );

        let timers = TimerSet {
            entry: Some(self.timer(entry_delay, id, |s, id| async move { s.on_entry(id).await })),
            prefetch: Some(self.timer(prefetch_delay, id, |s, id| async move {
                s.prefetch(id).await
            })),
            verification: Some(self.timer(verify_delay, id, |s, id| async move {
                s.verify(id).await
            })),
            safety: Some(self.timer(safety_delay, id, |s, id| async move {
                s.safety_expire(id).await
            })),
        };
        self.timers.insert(id, timers);

        // Resolved before the timers were registered
        if !self.tracked.contains_key(&id) {
            self.timers.remove(&id);
        }
        true
    }

    fn timer<F, Fut>(self: &Arc<Self>, delay_ms: i64, id: Uuid, task: F) -> JoinHandle<()>
    where
        F: FnOnce(Arc<Self>, Uuid) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        spawn_after(delay_ms, task(Arc::clone(self), id))
    }

    /// Entry timer: move to awaiting expiration and try chaining.
    async fn on_entry(&self, id: Uuid) {
        {
            let Some(mut tracked) = self.tracked.get_mut(&id) else {
                return;
            };
            if !tracked.signal.is_pending() {
                return;
            }
            if tracked.phase == VerificationPhase::AwaitingEntry {
                tracked.phase = VerificationPhase::AwaitingExpiration;
            }
        }
        self.try_chain(id).await;
    }

    /// Attach the previous resolution's exit price when that resolution
    /// came from the candle right before this signal's entry period.
    ///
    /// Purely analytical: outcome computation never reads it. Also retried
    /// at verification time, since the previous signal usually resolves a
    /// few seconds after this one's entry.
    async fn try_chain(&self, id: Uuid) -> bool {
        let (timeframe, entry_time, reference) = match self.tracked.get(&id) {
            Some(tracked)
                if tracked.signal.is_pending() && tracked.signal.chained_entry_price.is_none() =>
            {
                (
                    tracked.signal.timeframe,
                    tracked.signal.entry_time,
                    tracked.signal.price,
                )
            }
            _ => return false,
        };

        let expected = timeframe.period_start(entry_time) - timeframe.period_ms();
        let now = self.ctx.clock.now_ms();
        let record = *self.chain.lock().await;
        let Some(record) = record else {
            debug!("No chain record for signal {}", id);
            return false;
        };
        if record.signal_id == id
            || !record.applies_to(
                expected,
                now,
                self.config.chain_tolerance_ms,
                self.config.chain_staleness_ms,
            )
        {
            debug!(
                "Chain record from {} does not precede signal {} (candle {} vs expected {})",
                record.signal_id, id, record.candle_time, expected
            );
            return false;
        }

        match self.tracked.get_mut(&id) {
            Some(mut tracked) if tracked.signal.is_pending() => {
                tracked.signal.chained_entry_price = Some(record.exit_price);
            }
            _ => return false,
        }
        let drift = if reference > 0.0 {
            (record.exit_price - reference) / reference * 100.0
        } else {
            0.0
        };
        info!(
            "Signal {} chained to {} exit {:.5} (drift {:+.3}% from reference)",
            id, record.signal_id, record.exit_price, drift
        );
        true
    }

    /// Pre-fetch timer: warm the candle cache. Failures are only logged.
    async fn prefetch(&self, id: Uuid) {
        let Some((symbol, timeframe)) = self.pending_key(id) else {
            return;
        };
        match self
            .ctx
            .candles
            .fetch_recent_candles(&symbol, timeframe, 3)
            .await
        {
            Ok(candles) => {
                self.ctx.cache.upsert(&symbol, timeframe, &candles);
                debug!("Pre-fetched {} candles for signal {}", candles.len(), id);
            }
            Err(e) => debug!("Pre-fetch for signal {} failed: {}", id, e),
        }
    }

    fn pending_key(&self, id: Uuid) -> Option<(String, Timeframe)> {
        let tracked = self.tracked.get(&id)?;
        tracked
            .signal
            .is_pending()
            .then(|| (tracked.signal.symbol.clone(), tracked.signal.timeframe))
    }

    /// Verification timer: resolve against the candle preceding the
    /// expiration period.
    async fn verify(&self, id: Uuid) {
        let signal = {
            let Some(mut tracked) = self.tracked.get_mut(&id) else {
                return;
            };
            let runnable = tracked.signal.is_pending() || tracked.provisional;
            if !runnable || tracked.phase == VerificationPhase::Verifying {
                return;
            }
            if tracked.signal.is_pending() {
                tracked.phase = VerificationPhase::Verifying;
            }
            tracked.signal.clone()
        };

        if signal.chained_entry_price.is_none() {
            self.try_chain(id).await;
        }

        let timeframe = signal.timeframe;
        let outcome_ts =
            timeframe.period_start(signal.expiration_time) - timeframe.period_ms();

        match self.fetch_outcome_candle(&signal, outcome_ts).await {
            Some(candle) => {
                let (status, pnl) = evaluate_outcome(
                    signal.direction,
                    &candle,
                    self.engine.risk_amount,
                    self.engine.payout_rate,
                );
                info!(
                    "Signal {} resolved {}: candle {} open {} close {} pnl {:.2}",
                    id,
                    status.as_str(),
                    candle.timestamp,
                    candle.open,
                    candle.close,
                    pnl
                );
                self.finalize(id, status, pnl, Some(candle), None, false)
                    .await;
            }
            None => {
                let reason = format!(
                    "outcome candle {} unavailable after {} attempts",
                    outcome_ts, self.engine.max_retries
                );
                warn!("Signal {} expired: {}", id, reason);
                self.ctx.notifier.notify(
                    NotificationEvent::VerificationFailed,
                    json!({ "signalId": id, "reason": reason }),
                );
                self.finalize(id, SignalStatus::Expired, 0.0, None, Some(reason), false)
                    .await;
            }
        }
    }

    /// Fetch the outcome candle from the authoritative source with linear
    /// backoff, falling back once to a locally known closed copy of the same
    /// period.
    async fn fetch_outcome_candle(&self, signal: &Signal, outcome_ts: i64) -> Option<Candle> {
        let timeframe = signal.timeframe;
        let attempts = self.engine.max_retries.max(1);

        for attempt in 1..=attempts {
            let now = self.ctx.clock.now_ms();
            match self
                .ctx
                .candles
                .fetch_candle_at(&signal.symbol, timeframe, outcome_ts, Priority::Critical)
                .await
            {
                Ok(Some(candle))
                    if candle.closed
                        && candle.timestamp == outcome_ts
                        && candle.close_time(timeframe) <= now =>
                {
                    self.ctx.cache.upsert(&signal.symbol, timeframe, &[candle]);
                    return Some(candle);
                }
                Ok(Some(candle)) => debug!(
                    "Outcome candle {} for {} not final yet (attempt {}/{})",
                    candle.timestamp, signal.id, attempt, attempts
                ),
                Ok(None) => debug!(
                    "Outcome candle {} for {} not returned (attempt {}/{})",
                    outcome_ts, signal.id, attempt, attempts
                ),
                Err(e) => warn!(
                    "Outcome fetch for {} failed (attempt {}/{}): {}",
                    signal.id, attempt, attempts, e
                ),
            }

            if attempt < attempts {
                let delay = self.config.retry_base_delay_ms * attempt as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        let fallback = self.ctx.cache.closed_at(
            &signal.symbol,
            timeframe,
            outcome_ts,
            self.ctx.clock.now_ms(),
        );
        if let Some(candle) = fallback {
            warn!(
                "Using cached candle {} as outcome fallback for {}",
                candle.timestamp, signal.id
            );
        }
        fallback
    }

    /// Safety timer: force EXPIRED if the signal is still pending.
    async fn safety_expire(&self, id: Uuid) {
        match self.tracked.get(&id) {
            Some(tracked) if tracked.signal.is_pending() => {}
            _ => return,
        }

        let verifying = self
            .timers
            .get(&id)
            .and_then(|t| t.verification.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false);
        let reason = "safety timeout reached while pending".to_string();
        warn!(
            "Signal {} force-expired by safety timer{}",
            id,
            if verifying { " (verification still running)" } else { "" }
        );
        self.finalize(id, SignalStatus::Expired, 0.0, None, Some(reason), verifying)
            .await;
    }

    /// Apply a terminal outcome and run its side effects.
    ///
    /// Only a pending signal, or a provisional EXPIRED being superseded, is
    /// updated. Side-effect failures are logged and never change the
    /// outcome. Timer cleanup runs last because it aborts the calling timer.
    async fn finalize(
        &self,
        id: Uuid,
        status: SignalStatus,
        pnl: f64,
        candle: Option<Candle>,
        reason: Option<String>,
        provisional: bool,
    ) {
        let now = self.ctx.clock.now_ms();
        let (signal, previous) = {
            let Some(mut tracked) = self.tracked.get_mut(&id) else {
                return;
            };
            let previous = if tracked.signal.is_pending() {
                None
            } else if tracked.provisional && !provisional {
                Some(tracked.signal.clone())
            } else {
                return;
            };

            let signal = &mut tracked.signal;
            signal.status = status;
            signal.pnl = pnl;
            signal.final_price = candle.map(|c| c.close);
            signal.outcome_candle_time = candle.map(|c| c.timestamp);
            signal.resolved_at = Some(now);
            signal.resolution_reason = reason;
            let signal = signal.clone();
            tracked.provisional = provisional;
            tracked.phase = VerificationPhase::Resolved;
            (signal, previous)
        };

        if let Err(e) = self.ctx.store.save_signal(&signal).await {
            warn!("Failed to persist outcome of {}: {}", id, e);
        }
        if let Err(e) = self
            .ctx
            .audit
            .update_signal_outcome(
                id,
                signal.status,
                signal.final_price,
                signal.pnl,
                signal.execution_details.as_ref(),
            )
            .await
        {
            warn!("Failed to audit outcome of {}: {}", id, e);
        }
        self.ctx.notifier.notify(
            NotificationEvent::SignalResolved,
            json!({
                "signalId": id,
                "symbol": signal.symbol,
                "status": signal.status.as_str(),
                "pnl": signal.pnl,
                "finalPrice": signal.final_price,
                "provisional": provisional,
            }),
        );

        if let Some(candle) = candle {
            *self.chain.lock().await = Some(ChainRecord {
                signal_id: id,
                exit_price: candle.close,
                candle_time: candle.timestamp,
                resolved_at: now,
            });
        }

        let feed = match signal.status {
            SignalStatus::Win | SignalStatus::Loss => true,
            // A provisional expiry may still be superseded, and weight
            // updates are not reverted
            SignalStatus::Expired => self.config.expired_feedback && !provisional,
            _ => false,
        };
        self.learning
            .on_resolved(&signal, feed, previous.as_ref())
            .await;

        if !provisional {
            self.tracked.remove(&id);
            self.timers.remove(&id);
        }
    }

    /// Cancel a pending signal and all of its timers.
    pub async fn dismiss(&self, id: Uuid, reason: &str) -> bool {
        let now = self.ctx.clock.now_ms();
        let signal = {
            let Some(mut tracked) = self.tracked.get_mut(&id) else {
                return false;
            };
            if !tracked.signal.is_pending() {
                return false;
            }
            tracked.signal.status = SignalStatus::Canceled;
            tracked.signal.resolved_at = Some(now);
            tracked.signal.resolution_reason = Some(reason.to_string());
            tracked.phase = VerificationPhase::Resolved;
            tracked.signal.clone()
        };
        self.timers.remove(&id);
        self.tracked.remove(&id);
        info!("Dismissed signal {}: {}", id, reason);

        if let Err(e) = self.ctx.store.save_signal(&signal).await {
            warn!("Failed to persist dismissal of {}: {}", id, e);
        }
        if let Err(e) = self
            .ctx
            .audit
            .update_signal_outcome(id, SignalStatus::Canceled, None, 0.0, None)
            .await
        {
            warn!("Failed to audit dismissal of {}: {}", id, e);
        }
        self.ctx.notifier.notify(
            NotificationEvent::SignalDismissed,
            json!({ "signalId": id, "reason": reason }),
        );
        true
    }

    /// Current tracked copy of a signal.
    pub fn get(&self, id: Uuid) -> Option<Signal> {
        self.tracked.get(&id).map(|t| t.signal.clone())
    }

    pub fn phase(&self, id: Uuid) -> Option<VerificationPhase> {
        self.tracked.get(&id).map(|t| t.phase)
    }

    /// Signals still awaiting an outcome.
    pub fn pending_count(&self) -> usize {
        self.tracked
            .iter()
            .filter(|t| t.signal.is_pending())
            .count()
    }

    /// Signals with timers still registered.
    pub fn scheduled_count(&self) -> usize {
        self.timers.len()
    }

    pub async fn chain_record(&self) -> Option<ChainRecord> {
        *self.chain.lock().await
    }

    /// Abort every timer and forget all tracked signals.
    pub fn shutdown(&self) {
        self.timers.clear();
        self.tracked.clear();
    }
}
