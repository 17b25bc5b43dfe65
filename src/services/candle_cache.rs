use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{Candle, Timeframe};

/// A thread-safe cache of recent candles per symbol and timeframe.
///
/// Every fetch from the candle source is written through here. A closed
/// candle is never replaced once cached. Series not refreshed within the
/// TTL are dropped by `cleanup`.
pub struct CandleCache {
    data: DashMap<String, SeriesEntry>,
    ttl: Duration,
    max_per_series: usize,
}

struct SeriesEntry {
    candles: BTreeMap<i64, Candle>,
    updated_at: Instant,
}

impl CandleCache {
    /// Create a new cache with the given TTL and per-series capacity.
    pub fn new(ttl: Duration, max_per_series: usize) -> Self {
        Self {
            data: DashMap::new(),
            ttl,
            max_per_series: max_per_series.max(1),
        }
    }

    fn key(symbol: &str, timeframe: Timeframe) -> String {
        format!("{}:{}", symbol.to_lowercase(), timeframe.as_str())
    }

    /// Merge candles into the cached series.
    pub fn upsert(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) {
        if candles.is_empty() {
            return;
        }
        let mut entry = self
            .data
            .entry(Self::key(symbol, timeframe))
            .or_insert_with(|| SeriesEntry {
                candles: BTreeMap::new(),
                updated_at: Instant::now(),
            });

        for candle in candles {
            match entry.candles.get(&candle.timestamp) {
                Some(existing) if existing.closed => {}
                _ => {
                    entry.candles.insert(candle.timestamp, *candle);
                }
            }
        }
        while entry.candles.len() > self.max_per_series {
            entry.candles.pop_first();
        }
        entry.updated_at = Instant::now();
    }

    /// Closed candle at an exact period start that ended at or before
    /// `now_ms`, regardless of freshness. Used as a last-resort fallback.
    pub fn closed_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        timestamp: i64,
        now_ms: i64,
    ) -> Option<Candle> {
        let entry = self.data.get(&Self::key(symbol, timeframe))?;
        entry
            .candles
            .get(&timestamp)
            .filter(|c| c.closed && c.close_time(timeframe) <= now_ms)
            .copied()
    }

    /// Remove series that have not been refreshed within the TTL.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.data.retain(|_, entry| entry.updated_at.elapsed() <= ttl);
    }

    /// Number of cached series.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for CandleCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(120), 500)
    }
}
