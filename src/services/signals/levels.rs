//! Stop-loss / take-profit computation with volatility scaling and
//! support/resistance snapping.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::indicators::ema::{mean, std_dev};
use crate::config::LevelConfig;
use crate::types::{Candle, Direction, OptimalRatios, RatioPair, Signal, SignalStatus, Timeframe};

/// Smallest take-profit a SELL level may take.
const MIN_PRICE: f64 = 1e-8;
const LOW_VOLATILITY: f64 = 0.015;
const HIGH_VOLATILITY: f64 = 0.03;

/// Computed protective levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelPlan {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    /// Multipliers after volatility scaling.
    pub multipliers: RatioPair,
    /// Standard deviation of close-to-close returns.
    pub volatility: f64,
}

/// Computes levels from ATR and keeps the per-timeframe multiplier table.
pub struct LevelOptimizer {
    config: LevelConfig,
    ratios: RwLock<OptimalRatios>,
}

impl LevelOptimizer {
    pub fn new(config: LevelConfig) -> Self {
        let mut ratios = config.ratios.clone();
        for timeframe in Timeframe::ALL {
            let pair = ratios.get(timeframe);
            ratios.set(timeframe, clamp_pair(&config, pair));
        }
        Self {
            config,
            ratios: RwLock::new(ratios),
        }
    }

    /// Current multiplier table.
    pub async fn ratios(&self) -> OptimalRatios {
        self.ratios.read().await.clone()
    }

    pub async fn get_optimal_levels(
        &self,
        price: f64,
        atr: f64,
        timeframe: Timeframe,
        direction: Direction,
        recent_candles: &[Candle],
    ) -> LevelPlan {
        let base = self.ratios.read().await.get(timeframe);
        let volatility = return_volatility(recent_candles, self.config.volatility_window);

        let scaled = if volatility < LOW_VOLATILITY {
            RatioPair::new(base.take_profit_multiplier * 1.2, base.stop_loss_multiplier * 0.9)
        } else if volatility > HIGH_VOLATILITY {
            RatioPair::new(base.take_profit_multiplier * 0.8, base.stop_loss_multiplier * 1.2)
        } else {
            base
        };
        let multipliers = clamp_pair(&self.config, scaled);

        let atr = if atr.is_finite() { atr.max(0.0) } else { 0.0 };
        let sign = direction.sign();
        let raw_stop = price - sign * atr * multipliers.stop_loss_multiplier;
        let raw_target = price + sign * atr * multipliers.take_profit_multiplier;

        let clusters = find_clusters(
            recent_candles,
            self.config.volatility_window,
            self.config.cluster_tolerance,
            self.config.cluster_min_neighbors,
        );
        let stop_loss = snap_level(raw_stop, price, &clusters, self.config.cluster_tolerance * 2.0);
        let mut take_profit =
            snap_level(raw_target, price, &clusters, self.config.cluster_tolerance * 2.0);
        if direction == Direction::Sell {
            take_profit = take_profit.max(MIN_PRICE);
        }

        let risk = (price - stop_loss).abs();
        let reward = (take_profit - price).abs();
        let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

        LevelPlan {
            stop_loss,
            take_profit,
            risk_reward,
            multipliers,
            volatility,
        }
    }

    /// Re-tune multipliers from resolved signals.
    ///
    /// Returns the timeframes whose multipliers changed.
    pub async fn learn_from_results(&self, signals: &[Signal]) -> Vec<(Timeframe, RatioPair)> {
        let mut by_timeframe: HashMap<Timeframe, OutcomeCounts> = HashMap::new();
        for signal in signals.iter().filter(|s| s.status.is_resolved()) {
            by_timeframe
                .entry(signal.timeframe)
                .or_default()
                .record(signal.status);
        }

        let mut changed = Vec::new();
        let mut ratios = self.ratios.write().await;
        for timeframe in Timeframe::ALL {
            let Some(counts) = by_timeframe.get(&timeframe) else {
                continue;
            };
            if counts.total < self.config.min_resolved_for_tuning {
                continue;
            }

            let current = ratios.get(timeframe);
            let total = counts.total as f64;
            let expiry_rate = counts.expired as f64 / total;
            let win_rate = counts.wins as f64 / total;
            let loss_rate = counts.losses as f64 / total;

            let adjusted = if expiry_rate > 0.6 {
                RatioPair::new(
                    current.take_profit_multiplier * 0.9,
                    current.stop_loss_multiplier,
                )
            } else if loss_rate > win_rate && win_rate < 0.4 {
                RatioPair::new(
                    current.take_profit_multiplier,
                    current.stop_loss_multiplier * 1.1,
                )
            } else if win_rate > 0.6 {
                RatioPair::new(
                    current.take_profit_multiplier * 1.05,
                    current.stop_loss_multiplier * 0.95,
                )
            } else {
                continue;
            };

            let adjusted = clamp_pair(&self.config, adjusted);
            if adjusted != current {
                info!(
                    "Re-tuned {} multipliers: tp {:.3} -> {:.3}, sl {:.3} -> {:.3} (win {:.0}%, expiry {:.0}%)",
                    timeframe,
                    current.take_profit_multiplier,
                    adjusted.take_profit_multiplier,
                    current.stop_loss_multiplier,
                    adjusted.stop_loss_multiplier,
                    win_rate * 100.0,
                    expiry_rate * 100.0
                );
                ratios.set(timeframe, adjusted);
                changed.push((timeframe, adjusted));
            } else {
                debug!("{} multipliers already at bounds", timeframe);
            }
        }
        changed
    }
}

#[derive(Default)]
struct OutcomeCounts {
    total: usize,
    wins: usize,
    losses: usize,
    expired: usize,
}

impl OutcomeCounts {
    fn record(&mut self, status: SignalStatus) {
        self.total += 1;
        match status {
            SignalStatus::Win => self.wins += 1,
            SignalStatus::Loss => self.losses += 1,
            SignalStatus::Expired => self.expired += 1,
            _ => {}
        }
    }
}

fn clamp_pair(config: &LevelConfig, pair: RatioPair) -> RatioPair {
    RatioPair::new(
        clamp_to(pair.take_profit_multiplier, config.take_profit_bounds),
        clamp_to(pair.stop_loss_multiplier, config.stop_loss_bounds),
    )
}

fn clamp_to(value: f64, (a, b): (f64, f64)) -> f64 {
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    if value.is_finite() {
        value.max(min).min(max)
    } else {
        min
    }
}

/// Standard deviation of close-to-close returns over the last `window` closes.
pub fn return_volatility(candles: &[Candle], window: usize) -> f64 {
    let start = candles.len().saturating_sub(window);
    let returns: Vec<f64> = candles[start..]
        .windows(2)
        .filter(|pair| pair[0].close > 0.0)
        .map(|pair| (pair[1].close - pair[0].close) / pair[0].close)
        .filter(|r| r.is_finite())
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    std_dev(&returns, mean(&returns))
}

/// Price levels among recent highs and lows with at least `min_neighbors`
/// other points within `tolerance` (relative).
pub fn find_clusters(
    candles: &[Candle],
    window: usize,
    tolerance: f64,
    min_neighbors: usize,
) -> Vec<f64> {
    let start = candles.len().saturating_sub(window);
    let points: Vec<f64> = candles[start..]
        .iter()
        .flat_map(|c| [c.high, c.low])
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();

    let mut clusters: Vec<f64> = Vec::new();
    for (i, &p) in points.iter().enumerate() {
        let neighbors: Vec<f64> = points
            .iter()
            .enumerate()
            .filter(|(j, q)| *j != i && ((*q - p).abs() / p) <= tolerance)
            .map(|(_, q)| *q)
            .collect();
        if neighbors.len() < min_neighbors {
            continue;
        }
        let level = (p + neighbors.iter().sum::<f64>()) / (neighbors.len() + 1) as f64;
        if !clusters.iter().any(|c| ((c - level).abs() / level) <= tolerance) {
            clusters.push(level);
        }
    }
    clusters
}

/// Move `level` onto the closest cluster within `reach` (relative), as long
/// as it stays on the same side of `price`.
fn snap_level(level: f64, price: f64, clusters: &[f64], reach: f64) -> f64 {
    if level == price || level <= 0.0 {
        return level;
    }
    let above = level > price;
    clusters
        .iter()
        .copied()
        .filter(|c| if above { *c > price } else { *c < price })
        .filter(|c| ((c - level).abs() / level) <= reach)
        .min_by(|a, b| {
            (a - level)
                .abs()
                .partial_cmp(&(b - level).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::signals::test_support::{flat, uptrend};

    fn optimizer() -> LevelOptimizer {
        LevelOptimizer::new(LevelConfig::default())
    }

    fn resolved(timeframe: Timeframe, status: SignalStatus) -> Signal {
        crate::types::test_signal(timeframe, status)
    }

    #[tokio::test]
    async fn test_buy_levels_bracket_price() {
        let plan = optimizer()
            .get_optimal_levels(100.0, 1.0, Timeframe::M5, Direction::Buy, &flat(5, 100.0))
            .await;
        assert!(plan.stop_loss < 100.0);
        assert!(plan.take_profit > 100.0);
        assert!(plan.risk_reward > 0.0);
    }

    #[tokio::test]
    async fn test_low_volatility_scales_multipliers() {
        // flat candles: zero volatility, M5 base 2.0 / 1.0
        let plan = optimizer()
            .get_optimal_levels(100.0, 1.0, Timeframe::M5, Direction::Buy, &[])
            .await;
        assert!((plan.multipliers.take_profit_multiplier - 2.4).abs() < 1e-12);
        assert!((plan.multipliers.stop_loss_multiplier - 0.9).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_sell_take_profit_never_non_positive() {
        let plan = optimizer()
            .get_optimal_levels(1.0, 5.0, Timeframe::M15, Direction::Sell, &[])
            .await;
        assert!(plan.take_profit > 0.0);
        assert!(plan.stop_loss > 1.0);
    }

    #[tokio::test]
    async fn test_snap_never_crosses_price() {
        let mut candles = flat(20, 100.0);
        // dense cluster just above price
        for c in candles.iter_mut().take(6) {
            c.high = 100.2;
        }
        let plan = optimizer()
            .get_optimal_levels(100.0, 0.1, Timeframe::M1, Direction::Sell, &candles)
            .await;
        assert!(plan.take_profit < 100.0);
        assert!(plan.stop_loss > 100.0);
    }

    #[test]
    fn test_find_clusters() {
        let candles = flat(10, 50.0);
        let clusters = find_clusters(&candles, 20, 0.005, 3);
        assert_eq!(clusters, vec![50.0]);
        assert!(find_clusters(&uptrend(10), 20, 0.0001, 3).is_empty());
    }

    #[test]
    fn test_snap_level_moves_to_cluster() {
        assert_eq!(snap_level(101.0, 100.0, &[101.5], 0.01), 101.5);
        // would cross the price
        assert_eq!(snap_level(99.5, 100.0, &[100.2], 0.01), 99.5);
        // too far away
        assert_eq!(snap_level(101.0, 100.0, &[110.0], 0.01), 101.0);
    }

    #[tokio::test]
    async fn test_learn_shrinks_take_profit_on_high_expiry() {
        let optimizer = optimizer();
        let mut signals: Vec<Signal> = (0..7)
            .map(|_| resolved(Timeframe::M5, SignalStatus::Expired))
            .collect();
        signals.extend((0..3).map(|_| resolved(Timeframe::M5, SignalStatus::Win)));

        let changed = optimizer.learn_from_results(&signals).await;
        assert_eq!(changed.len(), 1);
        let pair = optimizer.ratios().await.get(Timeframe::M5);
        assert!((pair.take_profit_multiplier - 1.8).abs() < 1e-12);
        assert!((pair.stop_loss_multiplier - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_learn_needs_minimum_sample() {
        let optimizer = optimizer();
        let signals: Vec<Signal> = (0..9)
            .map(|_| resolved(Timeframe::M5, SignalStatus::Loss))
            .collect();
        assert!(optimizer.learn_from_results(&signals).await.is_empty());
    }

    #[tokio::test]
    async fn test_learn_respects_bounds() {
        let optimizer = optimizer();
        let signals: Vec<Signal> = (0..20)
            .map(|_| resolved(Timeframe::M1, SignalStatus::Loss))
            .collect();
        for _ in 0..50 {
            optimizer.learn_from_results(&signals).await;
        }
        let pair = optimizer.ratios().await.get(Timeframe::M1);
        assert!((pair.stop_loss_multiplier - 3.0).abs() < 1e-12);
        assert!(pair.take_profit_multiplier >= 1.0 && pair.take_profit_multiplier <= 5.0);
    }
}
