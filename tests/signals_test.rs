//! Signal pipeline tests: feature bounds on noisy data, ensemble scoring
//! bounds and signal persistence.

mod common;

use augur::services::signals::scoring::{normalize_score, weighted_score};
use augur::services::sqlite_store::SignalRepository;
use augur::services::{FeatureExtractor, LevelOptimizer, SqliteStore};
use augur::types::{
    sanitize_series, Candle, Direction, IndicatorWeights, SignalStatus, Timeframe,
};
use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_walk(seed: u64, count: usize) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price: f64 = 1.1;
    (0..count)
        .map(|i| {
            let open = price;
            let close = (open + rng.gen_range(-0.004..0.004)).max(0.01);
            price = close;
            Candle {
                timestamp: BASE + i as i64 * PERIOD,
                open,
                high: open.max(close) + rng.gen_range(0.0..0.002),
                low: (open.min(close) - rng.gen_range(0.0..0.002)).max(0.001),
                close,
                volume: rng.gen_range(0.0..5_000.0),
                closed: true,
            }
        })
        .collect()
}

#[test]
fn test_feature_scores_bounded_on_random_walks() {
    let extractor = FeatureExtractor::new();
    for seed in 0..25 {
        let candles = random_walk(seed, 30 + seed as usize * 4);
        let (_, features) = extractor.extract_candles(&candles);
        for score in features.scores() {
            assert!(score.is_finite(), "seed {}: non-finite score", seed);
            assert!((-1.0..=1.0).contains(&score), "seed {}: {}", seed, score);
        }
        assert!((0.0..=100.0).contains(&features.rsi.value));
    }
}

#[test]
fn test_short_history_stays_neutral_and_bounded() {
    let extractor = FeatureExtractor::new();
    for len in 0..5 {
        let (_, features) = extractor.extract_candles(&random_walk(7, len));
        assert!(features.scores().iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(features.divergence().is_none());
    }
}

#[test]
fn test_ensemble_score_maps_into_range() {
    let extractor = FeatureExtractor::new();
    let weights = IndicatorWeights::default();
    assert!((weights.sum() - 1.0).abs() < 1e-9);

    for seed in 100..120 {
        let (_, features) = extractor.extract_candles(&random_walk(seed, 80));
        let raw = weighted_score(&features, &weights);
        assert!((-1.0..=1.0).contains(&raw));
        assert!((0.0..=100.0).contains(&normalize_score(raw)));
    }
}

#[test]
fn test_sanitize_orders_and_keeps_closed_duplicates() {
    let mut candles = random_walk(3, 10);
    candles.swap(2, 7);
    let stale = Candle {
        closed: false,
        close: 9.9,
        ..candles[4]
    };
    candles.push(stale);

    let cleaned = sanitize_series(candles);
    assert_eq!(cleaned.len(), 10);
    assert!(cleaned.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(cleaned.iter().all(|c| c.closed));
}

#[tokio::test]
async fn test_levels_bracket_price_on_random_walks() {
    let optimizer = LevelOptimizer::new(Default::default());
    for seed in 200..210 {
        let candles = random_walk(seed, 60);
        let price = candles[59].close;
        for direction in [Direction::Buy, Direction::Sell] {
            let plan = optimizer
                .get_optimal_levels(price, 0.002, Timeframe::M5, direction, &candles)
                .await;
            let (below, above) = match direction {
                Direction::Buy => (plan.stop_loss, plan.take_profit),
                Direction::Sell => (plan.take_profit, plan.stop_loss),
            };
            assert!(below < price && price < above, "seed {}", seed);
            assert!(plan.take_profit > 0.0);
        }
    }
}

#[tokio::test]
async fn test_resolved_signal_survives_reopen() {
    let path = std::env::temp_dir().join(format!("augur-test-{}.db", uuid::Uuid::now_v7()));

    let mut signal = pending_signal(Direction::Sell, NOW);
    let (_, features) = FeatureExtractor::new().extract_candles(&random_walk(42, 60));
    signal.divergence = features.divergence();
    signal.features = features;
    signal.status = SignalStatus::Win;
    signal.pnl = 8.5;
    signal.final_price = Some(1.0987654321);
    signal.outcome_candle_time = Some(signal.entry_time);
    signal.resolved_at = Some(signal.expiration_time + 8_000);

    {
        let store = SqliteStore::new(&path).unwrap();
        store.save_signal(&signal).await.unwrap();
    }
    let reopened = SqliteStore::new(&path).unwrap();
    let loaded = reopened.get_all_signals().await.unwrap();
    assert_eq!(loaded, vec![signal]);

    drop(reopened);
    let _ = std::fs::remove_file(&path);
}
