//! External collaborators: candle data and order execution.

pub mod bridge;

pub use bridge::BridgeClient;
pub use crate::services::rate_governor::Priority;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Candle, ExecutionResult, Signal, Timeframe};

/// Provider of OHLCV candles.
///
/// Candles whose close time lies in the future relative to the caller must
/// come back with `closed = false`.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Most recent `count` candles, oldest first.
    async fn fetch_recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>>;

    /// The candle starting exactly at `timestamp`, if the provider has it.
    async fn fetch_candle_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        timestamp: i64,
        priority: Priority,
    ) -> Result<Option<Candle>>;
}

/// Places orders for committed signals.
#[async_trait]
pub trait BrokerExecutor: Send + Sync {
    async fn execute_signal(&self, signal: &Signal, risk_amount: f64) -> Result<ExecutionResult>;
}
