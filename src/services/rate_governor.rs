//! Sliding-window request limiter with a reserved lane for critical calls.
//!
//! Routine traffic may only use `capacity - reserved` slots of a window, so
//! verification fetches marked critical never queue behind polling.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{AppError, Result};

/// Lane a request is admitted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Polling and other deferrable traffic.
    Routine,
    /// Latency-critical calls such as outcome verification.
    Critical,
}

/// Per-provider sliding-log rate limiter.
pub struct RateGovernor {
    config: RateLimitConfig,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateGovernor {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_ms.max(1))
    }

    /// Slots a lane may occupy within one window.
    fn limit(&self, priority: Priority) -> usize {
        let capacity = self.config.capacity.max(1);
        match priority {
            Priority::Critical => capacity,
            Priority::Routine => capacity - self.config.reserved.min(capacity - 1),
        }
    }

    /// Take a slot now, or report how long until one frees up.
    fn try_take(&self, provider: &str, priority: Priority) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let window = self.window();
        let limit = self.limit(priority);

        let mut log = self.windows.entry(provider.to_string()).or_default();
        while let Some(front) = log.front() {
            if now.duration_since(*front) >= window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() < limit {
            log.push_back(now);
            return Ok(());
        }

        // The slot frees when the entry pushing us over the limit ages out
        let blocking = log[log.len() - limit];
        Err((blocking + window).saturating_duration_since(now))
    }

    /// Non-blocking acquire.
    pub fn try_acquire(&self, provider: &str, priority: Priority) -> bool {
        self.try_take(provider, priority).is_ok()
    }

    /// Wait for a slot.
    ///
    /// Routine callers give up with `RateLimited` once the configured
    /// maximum wait would be exceeded; critical callers wait at most one
    /// window.
    pub async fn acquire(&self, provider: &str, priority: Priority) -> Result<()> {
        let max_wait = match priority {
            Priority::Routine => Duration::from_millis(self.config.routine_max_wait_ms),
            Priority::Critical => self.window(),
        };
        let deadline = Instant::now() + max_wait;

        loop {
            let wait = match self.try_take(provider, priority) {
                Ok(()) => return Ok(()),
                Err(wait) => wait.max(Duration::from_millis(1)),
            };

            if Instant::now() + wait > deadline {
                warn!(
                    "Rate limit exhausted for {} ({:?}, {} in window), next slot in {:?}",
                    provider,
                    priority,
                    self.in_flight(provider),
                    wait
                );
                return Err(AppError::RateLimited(format!(
                    "{} request budget exhausted",
                    provider
                )));
            }

            debug!("Rate limited on {} ({:?}), waiting {:?}", provider, priority, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests recorded in the current window.
    pub fn in_flight(&self, provider: &str) -> usize {
        let window = self.window();
        let now = Instant::now();
        self.windows
            .get(provider)
            .map(|log| {
                log.iter()
                    .filter(|t| now.duration_since(**t) < window)
                    .count()
            })
            .unwrap_or(0)
    }
}
