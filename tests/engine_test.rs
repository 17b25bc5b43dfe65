//! End-to-end engine tests: analysis tick -> arbitration -> commit ->
//! verification, driven by scripted collaborators on paused time.

mod common;

use augur::config::Config;
use augur::services::sqlite_store::SignalRepository;
use augur::services::{LogisticClassifier, SignalEngine, SubmitOutcome};
use augur::types::{Direction, NotificationEvent, Signal, SignalStatus};
use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn engine_config() -> Config {
    let mut config = test_config();
    config.engine.min_score = 0;
    // one tick per test
    config.engine.tick_interval_ms = 3_600_000;
    config
}

fn engine(config: Config, harness: &Harness) -> Arc<SignalEngine> {
    SignalEngine::new(
        config,
        harness.ctx.clone(),
        Arc::new(LogisticClassifier::in_memory()),
    )
    .unwrap()
}

async fn committed(harness: &Harness) -> Vec<Signal> {
    harness.store.get_all_signals().await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_tick_commits_and_resolves_signal() {
    let config = engine_config();
    let harness = Harness::new(&config);
    harness.source.set_recent(history(100));
    let engine = engine(config, &harness);
    engine.start().await.unwrap();

    // commit happens one lead window before entry
    advance(Duration::from_secs(200)).await;
    assert!(committed(&harness).await.is_empty());
    advance(Duration::from_secs(31)).await;

    let signals = committed(&harness).await;
    assert_eq!(signals.len(), 1);
    let signal = signals[0].clone();
    assert_eq!(signal.status, SignalStatus::Pending);
    assert_eq!(signal.entry_time, BASE + PERIOD);
    assert!(!signal.executed);
    assert_eq!(harness.notifier.count(NotificationEvent::SignalCommitted), 1);
    assert_eq!(engine.verification().pending_count(), 1);

    let outcome = match signal.direction {
        Direction::Buy => candle(signal.entry_time, 250.0, 251.0),
        Direction::Sell => candle(signal.entry_time, 251.0, 250.0),
    };
    harness.source.set_candle(outcome);
    advance(Duration::from_secs(400)).await;

    let resolved = committed(&harness).await;
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].status, SignalStatus::Win);
    assert_eq!(engine.verification().pending_count(), 0);
    assert_eq!(engine.learning().performance().await.wins, 1);

    let audit = harness.store.get_recent_audit_logs(10).await.unwrap();
    assert!(audit.iter().all(|log| log.signal_id == signal.id));
    assert_eq!(audit.len(), 2);

    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_manual_ticks_share_one_slot() {
    let config = engine_config();
    let harness = Harness::new(&config);
    harness.source.set_recent(history(100));
    let engine = engine(config, &harness);

    let first = engine.tick().await.unwrap();
    let second = engine.tick().await.unwrap();
    assert_eq!(first, Some(SubmitOutcome::Opened));
    assert!(matches!(
        second,
        Some(SubmitOutcome::Kept) | Some(SubmitOutcome::Replaced)
    ));
    assert_eq!(engine.arbitration().open_slots(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_history_produces_nothing() {
    let config = engine_config();
    let harness = Harness::new(&config);
    let engine = engine(config, &harness);

    assert_eq!(engine.tick().await.unwrap(), None);
    assert_eq!(engine.arbitration().open_slots(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_candle_is_not_scored() {
    let config = engine_config();
    let harness = Harness::new(&config);
    let mut candles = history(100);
    candles.push(augur::types::Candle {
        closed: false,
        ..candle(BASE, 400.0, 1.0)
    });
    harness.source.set_recent(candles);
    let engine = engine(config, &harness);

    engine.tick().await.unwrap();
    let key = format!("eurusd:{}", BASE + PERIOD);
    let best = engine.arbitration().best_for(&key).unwrap();
    // reference price comes from the last closed candle
    assert_eq!(best.price, history(100)[99].close);
}

#[tokio::test(start_paused = true)]
async fn test_auto_execute_success_is_recorded() {
    let mut config = engine_config();
    config.engine.auto_execute = true;
    let harness = Harness::new(&config);
    harness.source.set_recent(history(100));
    let engine = engine(config, &harness);
    engine.start().await.unwrap();

    advance(Duration::from_secs(231)).await;

    let signal = committed(&harness).await.remove(0);
    assert!(signal.executed);
    let details = signal.execution_details.unwrap();
    assert_eq!(details.order_id, Some(format!("order-{}", signal.id)));
    assert_eq!(details.executed_qty, Some(10.0));
    assert_eq!(harness.broker.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.notifier.count(NotificationEvent::SignalExecuted), 1);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_auto_execute_failure_still_tracks_signal() {
    let mut config = engine_config();
    config.engine.auto_execute = true;
    let harness = Harness::new(&config);
    harness.source.set_recent(history(100));
    harness.broker.fail.store(true, Ordering::SeqCst);
    let engine = engine(config, &harness);
    engine.start().await.unwrap();

    advance(Duration::from_secs(231)).await;

    let signal = committed(&harness).await.remove(0);
    assert!(!signal.executed);
    assert!(signal.execution_details.is_none());
    assert_eq!(harness.broker.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.notifier.count(NotificationEvent::SignalExecuted), 0);
    assert_eq!(engine.verification().pending_count(), 1);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_pending_signals_recovered_on_start() {
    let config = engine_config();
    let harness = Harness::new(&config);

    let pending = pending_signal(Direction::Sell, NOW - 2 * PERIOD);
    let mut finished = pending_signal(Direction::Buy, NOW - 3 * PERIOD);
    finished.status = SignalStatus::Loss;
    harness.store.save_signal(&pending).await.unwrap();
    harness.store.save_signal(&finished).await.unwrap();
    harness
        .source
        .set_candle(candle(pending.entry_time, 1.2, 1.1));

    let engine = engine(config.clone(), &harness);
    engine.start().await.unwrap();
    assert_eq!(engine.verification().pending_count(), 1);
    assert!(engine.verification().get(pending.id).is_some());
    assert!(engine.verification().get(finished.id).is_none());

    advance(Duration::from_millis(
        config.engine.verification_buffer_ms as u64 + 1,
    ))
    .await;

    let stored = committed(&harness).await;
    let recovered = stored.iter().find(|s| s.id == pending.id).unwrap();
    assert_eq!(recovered.status, SignalStatus::Win);
    // restored history plus the new resolution
    assert_eq!(engine.learning().history().await.len(), 2);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_dismiss_through_engine() {
    let config = engine_config();
    let harness = Harness::new(&config);
    let engine = engine(config, &harness);
    let signal = pending_signal(Direction::Buy, NOW);
    engine.handle_commit(signal.clone()).await;

    assert!(engine.dismiss(signal.id, "user request").await);
    assert_eq!(
        committed(&harness).await[0].status,
        SignalStatus::Canceled
    );
    assert_eq!(engine.verification().scheduled_count(), 0);
}
