use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::types::{OptimalRatios, Timeframe};

/// Engine options recognized at construction time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Minimum hybrid score a candidate needs to be committed.
    pub min_score: u8,
    /// Stake per executed signal; also the loss on a LOSS outcome.
    pub risk_amount: f64,
    /// Analysis and expiration timeframe.
    pub timeframe: Timeframe,
    /// Fraction of the stake paid out on a WIN.
    pub payout_rate: f64,
    /// How long before entry the arbitration window commits (ms).
    pub lead_window_ms: i64,
    /// Delay after expiration before the outcome candle is fetched (ms).
    pub verification_buffer_ms: i64,
    /// Attempts at fetching the outcome candle.
    pub max_retries: u32,
    /// Send committed signals to the broker executor.
    pub auto_execute: bool,
    /// Interval between analysis ticks (ms).
    pub tick_interval_ms: u64,
    /// Candles requested per analysis tick.
    pub candle_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_score: 60,
            risk_amount: 10.0,
            timeframe: Timeframe::M5,
            payout_rate: 0.85,
            lead_window_ms: 60_000,
            verification_buffer_ms: 8_000,
            max_retries: 5,
            auto_execute: false,
            tick_interval_ms: 30_000,
            candle_history: 100,
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.min_score > 100 {
            return Err(AppError::BadRequest(format!(
                "minScore must be 0-100, got {}",
                self.min_score
            )));
        }
        if !(self.risk_amount.is_finite() && self.risk_amount > 0.0) {
            return Err(AppError::BadRequest("riskAmount must be positive".into()));
        }
        if !(self.payout_rate.is_finite() && self.payout_rate > 0.0) {
            return Err(AppError::BadRequest("payoutRate must be positive".into()));
        }
        if self.lead_window_ms < 0 || self.verification_buffer_ms < 0 {
            return Err(AppError::BadRequest(
                "leadWindow and verificationBufferMs must not be negative".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(AppError::BadRequest("maxRetries must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome verification timing.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationConfig {
    /// Linear backoff unit between outcome candle fetch attempts (ms).
    pub retry_base_delay_ms: u64,
    /// Delay after commit before the outcome candle is pre-fetched (ms).
    pub prefetch_delay_ms: u64,
    /// Safety ceiling after the verification time (ms).
    pub safety_timeout_ms: u64,
    /// Allowed drift when chaining to the previous resolution (ms).
    pub chain_tolerance_ms: i64,
    /// Chain records older than this are ignored (ms).
    pub chain_staleness_ms: i64,
    /// Feed EXPIRED outcomes to the learning loop.
    pub expired_feedback: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: 2_000,
            prefetch_delay_ms: 30_000,
            safety_timeout_ms: 600_000,
            chain_tolerance_ms: 10_000,
            chain_staleness_ms: 600_000,
            expired_feedback: false,
        }
    }
}

/// Ranking used to pick the best candidate of an entry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparator {
    /// Highest hybrid score.
    #[default]
    Score,
    /// Classifier probability furthest from 0.5.
    Confidence,
    /// Blend of score and classifier confidence.
    Weighted,
}

impl Comparator {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "score" => Some(Self::Score),
            "confidence" => Some(Self::Confidence),
            "weighted" => Some(Self::Weighted),
            _ => None,
        }
    }
}

/// Candidate arbitration settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationConfig {
    pub comparator: Comparator,
    /// Share of the hybrid score in the weighted comparator (0-1).
    pub score_share: f64,
    /// Time a decided entry lingers before removal (ms).
    pub grace_ms: u64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            comparator: Comparator::Score,
            score_share: 0.7,
            grace_ms: 5_000,
        }
    }
}

/// Stop-loss / take-profit computation.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelConfig {
    /// Starting multipliers per timeframe.
    pub ratios: OptimalRatios,
    pub take_profit_bounds: (f64, f64),
    pub stop_loss_bounds: (f64, f64),
    /// Closes used for return volatility.
    pub volatility_window: usize,
    /// Relative distance within which two prices belong to one cluster.
    pub cluster_tolerance: f64,
    /// Neighbors a price needs to form a cluster.
    pub cluster_min_neighbors: usize,
    /// Resolved signals a timeframe needs before it is re-tuned.
    pub min_resolved_for_tuning: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            ratios: OptimalRatios::default(),
            take_profit_bounds: (1.0, 5.0),
            stop_loss_bounds: (0.5, 3.0),
            volatility_window: 20,
            cluster_tolerance: 0.005,
            cluster_min_neighbors: 3,
            min_resolved_for_tuning: 10,
        }
    }
}

/// Weight adaptation and retraining cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningConfig {
    pub base_rate: f64,
    /// Floor applied by the EXPIRED penalty.
    pub expired_floor: f64,
    /// Persist a weights snapshot every N resolved signals.
    pub snapshot_every: u64,
    /// Retrain the classifier every N resolved signals.
    pub retrain_every: u64,
    /// Interval between level ratio re-tunes (ms).
    pub retune_interval_ms: u64,
    /// Resolved signals kept in memory for re-tuning and training.
    pub history_limit: usize,
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            base_rate: 0.1,
            expired_floor: 0.05,
            snapshot_every: 10,
            retrain_every: 30,
            retune_interval_ms: 300_000,
            history_limit: 500,
            epochs: 50,
            batch_size: 16,
        }
    }
}

/// Request budget towards the candle/broker bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub capacity: usize,
    pub window_ms: u64,
    /// Slots only critical callers may use.
    pub reserved: usize,
    /// Longest a routine caller waits before giving up (ms).
    pub routine_max_wait_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            window_ms: 60_000,
            reserved: 5,
            routine_max_wait_ms: 10_000,
        }
    }
}

/// Broker login forwarded to the bridge's `/api/connect`.
#[derive(Clone, PartialEq)]
pub struct BridgeCredentials {
    pub email: String,
    pub password: String,
    /// Trade on the practice account instead of the real one.
    pub practice: bool,
}

impl BridgeCredentials {
    /// Read `BRIDGE_EMAIL`/`BRIDGE_PASSWORD`; both must be non-empty.
    pub fn from_env() -> Option<Self> {
        let email = env::var("BRIDGE_EMAIL").ok().filter(|v| !v.trim().is_empty())?;
        let password = env::var("BRIDGE_PASSWORD").ok().filter(|v| !v.is_empty())?;
        Some(Self {
            email: email.trim().to_string(),
            password,
            practice: flag_env("BRIDGE_PRACTICE", true),
        })
    }
}

impl std::fmt::Debug for BridgeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("practice", &self.practice)
            .finish()
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Instrument analysed by the engine.
    pub symbol: String,
    /// Base URL of the broker bridge service.
    pub bridge_url: String,
    /// Bridge request timeout (ms).
    pub bridge_timeout_ms: u64,
    /// Broker login used when the bridge reports no session.
    pub bridge_credentials: Option<BridgeCredentials>,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Classifier model file.
    pub model_path: PathBuf,
    pub engine: EngineConfig,
    pub verification: VerificationConfig,
    pub arbitration: ArbitrationConfig,
    pub levels: LevelConfig,
    pub learning: LearningConfig,
    pub rate_limit: RateLimitConfig,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let engine_defaults = EngineConfig::default();
        let verification_defaults = VerificationConfig::default();
        let arbitration_defaults = ArbitrationConfig::default();
        let level_defaults = LevelConfig::default();
        let learning_defaults = LearningConfig::default();
        let rate_defaults = RateLimitConfig::default();

        let timeframe = env::var("TIMEFRAME")
            .ok()
            .and_then(|v| Timeframe::from_str(&v))
            .unwrap_or(engine_defaults.timeframe);

        Self {
            symbol: env::var("SYMBOL").unwrap_or_else(|_| "EURUSD".to_string()),
            bridge_url: env::var("BRIDGE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string()),
            bridge_timeout_ms: parse_env("BRIDGE_TIMEOUT_MS", 10_000),
            bridge_credentials: BridgeCredentials::from_env(),
            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/augur.db")),
            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/classifier.json")),
            engine: EngineConfig {
                min_score: parse_env("MIN_SCORE", engine_defaults.min_score),
                risk_amount: parse_env("RISK_AMOUNT", engine_defaults.risk_amount),
                timeframe,
                payout_rate: parse_env("PAYOUT_RATE", engine_defaults.payout_rate),
                lead_window_ms: parse_env("LEAD_WINDOW_MS", engine_defaults.lead_window_ms),
                verification_buffer_ms: parse_env(
                    "VERIFICATION_BUFFER_MS",
                    engine_defaults.verification_buffer_ms,
                ),
                max_retries: parse_env("MAX_RETRIES", engine_defaults.max_retries),
                auto_execute: flag_env("AUTO_EXECUTE", engine_defaults.auto_execute),
                tick_interval_ms: parse_env("TICK_INTERVAL_MS", engine_defaults.tick_interval_ms),
                candle_history: parse_env("CANDLE_HISTORY", engine_defaults.candle_history),
            },
            verification: VerificationConfig {
                retry_base_delay_ms: parse_env(
                    "RETRY_BASE_DELAY_MS",
                    verification_defaults.retry_base_delay_ms,
                ),
                prefetch_delay_ms: parse_env(
                    "PREFETCH_DELAY_MS",
                    verification_defaults.prefetch_delay_ms,
                ),
                safety_timeout_ms: parse_env(
                    "SAFETY_TIMEOUT_MS",
                    verification_defaults.safety_timeout_ms,
                ),
                chain_tolerance_ms: parse_env(
                    "CHAIN_TOLERANCE_MS",
                    verification_defaults.chain_tolerance_ms,
                ),
                chain_staleness_ms: parse_env(
                    "CHAIN_STALENESS_MS",
                    verification_defaults.chain_staleness_ms,
                ),
                expired_feedback: flag_env(
                    "EXPIRED_FEEDBACK",
                    verification_defaults.expired_feedback,
                ),
            },
            arbitration: ArbitrationConfig {
                comparator: env::var("ARBITRATION_COMPARATOR")
                    .ok()
                    .and_then(|v| Comparator::from_str(&v))
                    .unwrap_or(arbitration_defaults.comparator),
                score_share: parse_env("ARBITRATION_SCORE_SHARE", arbitration_defaults.score_share)
                    .clamp(0.0, 1.0),
                grace_ms: parse_env("ARBITRATION_GRACE_MS", arbitration_defaults.grace_ms),
            },
            levels: LevelConfig {
                take_profit_bounds: (
                    parse_env("TP_MULTIPLIER_MIN", level_defaults.take_profit_bounds.0),
                    parse_env("TP_MULTIPLIER_MAX", level_defaults.take_profit_bounds.1),
                ),
                stop_loss_bounds: (
                    parse_env("SL_MULTIPLIER_MIN", level_defaults.stop_loss_bounds.0),
                    parse_env("SL_MULTIPLIER_MAX", level_defaults.stop_loss_bounds.1),
                ),
                ..level_defaults
            },
            learning: LearningConfig {
                base_rate: parse_env("LEARNING_RATE", learning_defaults.base_rate),
                snapshot_every: parse_env("SNAPSHOT_EVERY", learning_defaults.snapshot_every),
                retrain_every: parse_env("RETRAIN_EVERY", learning_defaults.retrain_every),
                retune_interval_ms: parse_env(
                    "RETUNE_INTERVAL_MS",
                    learning_defaults.retune_interval_ms,
                ),
                ..learning_defaults
            },
            rate_limit: RateLimitConfig {
                capacity: parse_env("RATE_LIMIT_CAPACITY", rate_defaults.capacity),
                window_ms: parse_env("RATE_LIMIT_WINDOW_MS", rate_defaults.window_ms),
                reserved: parse_env("RATE_LIMIT_RESERVED", rate_defaults.reserved),
                routine_max_wait_ms: parse_env(
                    "RATE_LIMIT_MAX_WAIT_MS",
                    rate_defaults.routine_max_wait_ms,
                ),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
