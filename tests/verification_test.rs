//! Outcome verification lifecycle tests.
//!
//! All tests run on paused tokio time; the engine clock is anchored to it so
//! timers and timestamps advance together.

mod common;

use augur::config::Config;
use augur::services::sqlite_store::SignalRepository;
use augur::services::{
    LevelOptimizer, LogisticClassifier, OutcomeVerificationScheduler, Priority,
    VerificationPhase, WeightAdaptationLoop,
};
use augur::types::{Direction, NotificationEvent, Signal, SignalStatus};
use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Delay from `NOW` until the first verification attempt for a signal
/// generated at `NOW`.
const VERIFY_AFTER: Duration = Duration::from_millis(598_000);

fn scheduler(
    config: &Config,
    harness: &Harness,
) -> (Arc<OutcomeVerificationScheduler>, Arc<WeightAdaptationLoop>) {
    let classifier = Arc::new(LogisticClassifier::in_memory());
    let learning = Arc::new(WeightAdaptationLoop::new(
        config.learning.clone(),
        harness.store.clone(),
        classifier,
        Arc::new(LevelOptimizer::new(config.levels.clone())),
    ));
    let scheduler = OutcomeVerificationScheduler::new(
        config.engine.clone(),
        config.verification.clone(),
        harness.ctx.clone(),
        learning.clone(),
    );
    (scheduler, learning)
}

async fn stored(harness: &Harness, signal: &Signal) -> Signal {
    harness
        .store
        .get_all_signals()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.id == signal.id)
        .expect("signal should be persisted")
}

#[tokio::test(start_paused = true)]
async fn test_buy_on_green_candle_wins() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, learning) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.set_candle(candle(signal.entry_time, 1.1000, 1.1020));
    assert!(scheduler.schedule(signal.clone()));
    assert_eq!(
        scheduler.phase(signal.id),
        Some(VerificationPhase::AwaitingEntry)
    );

    advance(Duration::from_millis(300_000)).await;
    assert_eq!(
        scheduler.phase(signal.id),
        Some(VerificationPhase::AwaitingExpiration)
    );

    advance(VERIFY_AFTER).await;

    let resolved = stored(&harness, &signal).await;
    assert_eq!(resolved.status, SignalStatus::Win);
    assert!((resolved.pnl - 8.5).abs() < 1e-9);
    assert_eq!(resolved.final_price, Some(1.1020));
    assert_eq!(resolved.outcome_candle_time, Some(signal.entry_time));
    assert_eq!(scheduler.scheduled_count(), 0);
    assert_eq!(scheduler.pending_count(), 0);
    assert_eq!(harness.notifier.statuses(), vec!["WIN"]);
    assert_eq!(learning.performance().await.wins, 1);

    let record = scheduler.chain_record().await.unwrap();
    assert_eq!(record.signal_id, signal.id);
    assert_eq!(record.exit_price, 1.1020);
}

#[tokio::test(start_paused = true)]
async fn test_sell_on_green_candle_loses() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, _) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Sell, NOW);
    harness.source.set_candle(candle(signal.entry_time, 1.1000, 1.1020));
    scheduler.schedule(signal.clone());
    advance(VERIFY_AFTER).await;

    let resolved = stored(&harness, &signal).await;
    assert_eq!(resolved.status, SignalStatus::Loss);
    assert!((resolved.pnl + 10.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_doji_is_tie_and_not_learned_from() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, learning) = scheduler(&config, &harness);
    let weights_before = learning.weights().await;

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.set_candle(candle(signal.entry_time, 1.1, 1.1));
    scheduler.schedule(signal.clone());
    advance(VERIFY_AFTER).await;

    let resolved = stored(&harness, &signal).await;
    assert_eq!(resolved.status, SignalStatus::Tie);
    assert_eq!(resolved.pnl, 0.0);
    assert_eq!(learning.weights().await, weights_before);
    assert_eq!(learning.performance().await.ties, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_candle_is_served() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, _) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.set_candle(candle(signal.entry_time, 1.1, 1.2));
    harness.source.fail_next(2);
    scheduler.schedule(signal.clone());

    // two failures, then 2s + 4s of backoff
    advance(VERIFY_AFTER + Duration::from_secs(7)).await;

    assert_eq!(harness.source.at_calls.load(Ordering::SeqCst), 3);
    assert_eq!(stored(&harness, &signal).await.status, SignalStatus::Win);
    assert!(harness
        .source
        .priorities
        .lock()
        .unwrap()
        .iter()
        .all(|p| *p == Priority::Critical));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_source_expires_before_safety_ceiling() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, learning) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.always_fail.store(true, Ordering::SeqCst);
    scheduler.schedule(signal.clone());

    // 5 attempts with 2 + 4 + 6 + 8 seconds of backoff
    advance(VERIFY_AFTER + Duration::from_secs(21)).await;

    let resolved = stored(&harness, &signal).await;
    assert_eq!(resolved.status, SignalStatus::Expired);
    assert!(resolved
        .resolution_reason
        .as_deref()
        .unwrap_or_default()
        .contains("unavailable"));
    assert_eq!(
        harness.source.at_calls.load(Ordering::SeqCst),
        config.engine.max_retries as usize
    );
    assert_eq!(harness.notifier.count(NotificationEvent::VerificationFailed), 1);
    assert_eq!(scheduler.scheduled_count(), 0);
    assert_eq!(learning.performance().await.expired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_fallback_after_retries() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, _) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Sell, NOW);
    harness.source.always_fail.store(true, Ordering::SeqCst);
    scheduler.schedule(signal.clone());

    advance(VERIFY_AFTER - Duration::from_secs(1)).await;
    // known locally, e.g. from an analysis tick
    harness.cache.upsert(
        "EURUSD",
        signal.timeframe,
        &[candle(signal.entry_time, 1.2, 1.1)],
    );
    advance(Duration::from_secs(22)).await;

    let resolved = stored(&harness, &signal).await;
    assert_eq!(resolved.status, SignalStatus::Win);
    assert_eq!(resolved.final_price, Some(1.1));
}

#[tokio::test(start_paused = true)]
async fn test_stale_cache_candle_is_not_used() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, _) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.always_fail.store(true, Ordering::SeqCst);
    harness.cache.upsert(
        "EURUSD",
        signal.timeframe,
        &[candle(signal.entry_time - PERIOD, 1.1, 1.2)],
    );
    scheduler.schedule(signal.clone());
    advance(VERIFY_AFTER + Duration::from_secs(21)).await;

    assert_eq!(
        stored(&harness, &signal).await.status,
        SignalStatus::Expired
    );
}

#[tokio::test(start_paused = true)]
async fn test_newer_cached_candle_is_not_used() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, _) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.always_fail.store(true, Ordering::SeqCst);
    // slow enough that the following period has closed before the fallback
    harness.source.set_latency(Duration::from_secs(60));
    harness.cache.upsert(
        "EURUSD",
        signal.timeframe,
        &[candle(signal.entry_time + PERIOD, 1.1, 1.2)],
    );
    scheduler.schedule(signal.clone());
    advance(VERIFY_AFTER + Duration::from_secs(330)).await;

    let expired = stored(&harness, &signal).await;
    assert_eq!(expired.status, SignalStatus::Expired);
    assert_eq!(expired.final_price, None);
}

#[tokio::test(start_paused = true)]
async fn test_dismiss_cancels_all_timers() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, _) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.set_candle(candle(signal.entry_time, 1.1, 1.2));
    scheduler.schedule(signal.clone());

    advance(Duration::from_secs(60)).await;
    assert!(scheduler.dismiss(signal.id, "manual").await);
    assert!(!scheduler.dismiss(signal.id, "again").await);
    assert_eq!(scheduler.scheduled_count(), 0);

    advance(VERIFY_AFTER + Duration::from_secs(700)).await;

    let dismissed = stored(&harness, &signal).await;
    assert_eq!(dismissed.status, SignalStatus::Canceled);
    assert_eq!(dismissed.resolution_reason.as_deref(), Some("manual"));
    assert_eq!(harness.source.at_calls.load(Ordering::SeqCst), 0);
    assert!(harness.notifier.statuses().is_empty());
    assert_eq!(harness.notifier.count(NotificationEvent::SignalDismissed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_keeps_outcome() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, learning) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.set_candle(candle(signal.entry_time, 1.1, 1.2));
    harness.store.fail_writes.store(true, Ordering::SeqCst);
    scheduler.schedule(signal.clone());
    advance(VERIFY_AFTER).await;

    assert!(harness.store.get_all_signals().await.unwrap().is_empty());
    assert_eq!(harness.notifier.statuses(), vec!["WIN"]);
    assert_eq!(learning.performance().await.wins, 1);
    assert_eq!(scheduler.scheduled_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_signals_chain() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, _) = scheduler(&config, &harness);

    let first = pending_signal(Direction::Buy, NOW);
    harness.source.set_candle(candle(first.entry_time, 1.1, 1.105));
    scheduler.schedule(first.clone());

    // the next signal is generated during the first one's entry period
    advance(Duration::from_millis(300_000)).await;
    let second = pending_signal(Direction::Sell, NOW + PERIOD);
    assert_eq!(second.entry_time, first.expiration_time);
    harness.source.set_candle(candle(second.entry_time, 1.105, 1.101));
    scheduler.schedule(second.clone());

    advance(Duration::from_millis(610_000)).await;

    let first = stored(&harness, &first).await;
    let second = stored(&harness, &second).await;
    assert_eq!(first.status, SignalStatus::Win);
    assert_eq!(first.chained_entry_price, None);
    assert_eq!(second.status, SignalStatus::Win);
    assert_eq!(second.chained_entry_price, Some(1.105));
}

#[tokio::test(start_paused = true)]
async fn test_late_result_supersedes_safety_expiry() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, learning) = scheduler(&config, &harness);

    let signal = pending_signal(Direction::Buy, NOW);
    harness.source.set_candle(candle(signal.entry_time, 1.1, 1.2));
    // longer than the safety timeout
    harness.source.set_latency(Duration::from_secs(700));
    scheduler.schedule(signal.clone());

    advance(VERIFY_AFTER + Duration::from_secs(601)).await;
    let provisional = stored(&harness, &signal).await;
    assert_eq!(provisional.status, SignalStatus::Expired);
    assert_eq!(learning.performance().await.expired, 1);
    assert_eq!(scheduler.scheduled_count(), 1);

    advance(Duration::from_secs(100)).await;
    let resolved = stored(&harness, &signal).await;
    assert_eq!(resolved.status, SignalStatus::Win);
    assert_eq!(harness.notifier.statuses(), vec!["EXPIRED", "WIN"]);

    let performance = learning.performance().await;
    assert_eq!(performance.expired, 0);
    assert_eq!(performance.wins, 1);
    assert_eq!(performance.resolved, 1);
    assert_eq!(scheduler.scheduled_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_expiry_leaves_weights_untouched() {
    let mut config = test_config();
    config.verification.expired_feedback = true;

    let on_time = Harness::new(&config);
    let (on_time_scheduler, on_time_learning) = scheduler(&config, &on_time);
    let late = Harness::new(&config);
    let (late_scheduler, late_learning) = scheduler(&config, &late);

    let signal = pending_signal(Direction::Buy, NOW);
    on_time.source.set_candle(candle(signal.entry_time, 1.1, 1.2));
    late.source.set_candle(candle(signal.entry_time, 1.1, 1.2));
    late.source.set_latency(Duration::from_secs(700));
    on_time_scheduler.schedule(signal.clone());
    late_scheduler.schedule(signal.clone());

    advance(VERIFY_AFTER + Duration::from_secs(701)).await;
    assert_eq!(on_time.notifier.statuses(), vec!["WIN"]);
    assert_eq!(late.notifier.statuses(), vec!["EXPIRED", "WIN"]);
    assert_eq!(
        late_learning.weights().await,
        on_time_learning.weights().await
    );
    assert_eq!(late_learning.performance().await.wins, 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_schedule_verifies_after_buffer() {
    let config = test_config();
    let harness = Harness::new(&config);
    let (scheduler, _) = scheduler(&config, &harness);

    // recovered after a restart, well past its expiration
    let signal = pending_signal(Direction::Buy, NOW - 3 * PERIOD);
    harness.source.set_candle(candle(signal.entry_time, 1.1, 1.2));
    assert!(scheduler.schedule(signal.clone()));
    assert!(!scheduler.schedule(signal.clone()));

    advance(Duration::from_millis(
        config.engine.verification_buffer_ms as u64 + 1,
    ))
    .await;
    assert_eq!(stored(&harness, &signal).await.status, SignalStatus::Win);
}
