pub mod audit;
pub mod candle;
pub mod features;
pub mod learning;
pub mod signal;

pub use audit::*;
pub use candle::*;
pub use features::*;
pub use learning::*;
pub use signal::*;

#[cfg(test)]
pub(crate) fn test_signal(timeframe: Timeframe, status: SignalStatus) -> Signal {
    let entry_time = timeframe.next_period_start(1_700_000_000_000);
    Signal {
        id: uuid::Uuid::now_v7(),
        generated_at: 1_700_000_000_000,
        symbol: "EURUSD".to_string(),
        direction: Direction::Buy,
        timeframe,
        score: 70,
        ml_probability: 0.5,
        ml_confidence: MlConfidence::Low,
        price: 1.1,
        entry_time,
        expiration_time: entry_time + timeframe.period_ms(),
        stop_loss: 1.09,
        take_profit: 1.12,
        risk_reward: 2.0,
        contributors: vec!["rsi".to_string()],
        divergence: None,
        features: FeatureSet::neutral(),
        status,
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
