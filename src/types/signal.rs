use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Divergence, FeatureSet, Timeframe};

/// Direction of a binary-style contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Bridge wire name ("call" / "put").
    pub fn as_option_side(&self) -> &'static str {
        match self {
            Direction::Buy => "call",
            Direction::Sell => "put",
        }
    }

    /// +1 for BUY, -1 for SELL.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

/// Lifecycle status. Only `Pending` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    #[default]
    Pending,
    Win,
    Loss,
    Tie,
    Expired,
    Canceled,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignalStatus::Pending)
    }

    /// Terminal through verification (anything but a dismissal).
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            SignalStatus::Win | SignalStatus::Loss | SignalStatus::Tie | SignalStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Pending => "PENDING",
            SignalStatus::Win => "WIN",
            SignalStatus::Loss => "LOSS",
            SignalStatus::Tie => "TIE",
            SignalStatus::Expired => "EXPIRED",
            SignalStatus::Canceled => "CANCELED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(SignalStatus::Pending),
            "WIN" => Some(SignalStatus::Win),
            "LOSS" => Some(SignalStatus::Loss),
            "TIE" => Some(SignalStatus::Tie),
            "EXPIRED" => Some(SignalStatus::Expired),
            "CANCELED" => Some(SignalStatus::Canceled),
            _ => None,
        }
    }
}

/// Categorical confidence of the classifier probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MlConfidence {
    Low,
    Medium,
    High,
}

impl MlConfidence {
    /// Band a probability by its distance from 0.5.
    pub fn from_probability(p: f64) -> Self {
        let distance = (p - 0.5).abs();
        if distance >= 0.3 {
            MlConfidence::High
        } else if distance >= 0.15 {
            MlConfidence::Medium
        } else {
            MlConfidence::Low
        }
    }
}

/// Result reported by the broker executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub executed_price: Option<f64>,
    pub executed_qty: Option<f64>,
    pub message: Option<String>,
    pub executed_at: i64,
}

/// A directional trading signal and its verification state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Time-ordered unique ID.
    pub id: Uuid,
    pub generated_at: i64,
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: Timeframe,
    /// Hybrid score 0-100.
    pub score: u8,
    pub ml_probability: f64,
    pub ml_confidence: MlConfidence,
    /// Reference close at generation.
    pub price: f64,
    /// Start of the next period after generation.
    pub entry_time: i64,
    /// `entry_time` + one period.
    pub expiration_time: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    /// Indicators with |score| > 0.1, sorted.
    pub contributors: Vec<String>,
    pub divergence: Option<Divergence>,
    pub features: FeatureSet,
    pub status: SignalStatus,
    pub pnl: f64,
    pub final_price: Option<f64>,
    pub executed: bool,
    pub execution_details: Option<ExecutionResult>,
    #[serde(default)]
    pub resolved_at: Option<i64>,
    /// Why the signal ended the way it did (set for EXPIRED and CANCELED).
    #[serde(default)]
    pub resolution_reason: Option<String>,
    /// True timestamp of the candle the outcome was computed from.
    #[serde(default)]
    pub outcome_candle_time: Option<i64>,
    /// Exit price of the previous signal when it resolved one period earlier.
    #[serde(default)]
    pub chained_entry_price: Option<f64>,
}

impl Signal {
    pub fn is_pending(&self) -> bool {
        self.status == SignalStatus::Pending
    }

    /// Cache/dedup key shared by candidates for the same entry slot.
    pub fn slot_key(&self) -> String {
        format!("{}:{}", self.symbol.to_lowercase(), self.entry_time)
    }
}
