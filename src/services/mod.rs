pub mod arbitration;
pub mod candle_cache;
pub mod clock;
pub mod context;
pub mod engine;
pub mod learning;
pub mod notifier;
pub mod rate_governor;
pub mod signals;
pub mod sqlite_store;
pub mod timers;
pub mod verification;

pub use arbitration::{CandidateArbitrationCache, RejectReason, SubmitOutcome};
pub use candle_cache::CandleCache;
pub use clock::{Clock, SystemClock, TokioClock};
pub use context::EngineContext;
pub use engine::SignalEngine;
pub use learning::WeightAdaptationLoop;
pub use notifier::{Notifier, TracingNotifier};
pub use rate_governor::{Priority, RateGovernor};
pub use signals::{
    Classifier, FeatureExtractor, IndicatorLibrary, LevelOptimizer, LevelPlan, LogisticClassifier,
    ScoringEngine,
};
pub use sqlite_store::{AuditSink, SignalRepository, SqliteStore};
pub use verification::{evaluate_outcome, ChainRecord, OutcomeVerificationScheduler, VerificationPhase};
