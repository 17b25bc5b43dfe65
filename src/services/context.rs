//! Shared collaborators handed to the engine components.

use std::sync::Arc;

use super::candle_cache::CandleCache;
use super::clock::{Clock, SystemClock};
use super::notifier::{Notifier, TracingNotifier};
use super::sqlite_store::{AuditSink, SignalRepository};
use crate::sources::{BrokerExecutor, CandleSource};

/// Explicit dependency bundle for scoring, verification and learning.
#[derive(Clone)]
pub struct EngineContext {
    pub candles: Arc<dyn CandleSource>,
    pub store: Arc<dyn SignalRepository>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
    pub broker: Arc<dyn BrokerExecutor>,
    pub cache: Arc<CandleCache>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    /// Context with the system clock, a tracing notifier and a default cache.
    pub fn new(
        candles: Arc<dyn CandleSource>,
        store: Arc<dyn SignalRepository>,
        audit: Arc<dyn AuditSink>,
        broker: Arc<dyn BrokerExecutor>,
    ) -> Self {
        Self {
            candles,
            store,
            audit,
            notifier: Arc::new(TracingNotifier),
            broker,
            cache: Arc::new(CandleCache::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_cache(mut self, cache: Arc<CandleCache>) -> Self {
        self.cache = cache;
        self
    }
}
