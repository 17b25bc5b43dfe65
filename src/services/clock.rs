//! Wall-clock abstraction so timers can be driven by paused tokio time.

use tokio::time::Instant;

/// Source of epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Epoch clock anchored to tokio's `Instant`.
///
/// Under `start_paused` tests, advancing tokio time advances this clock by
/// exactly the same amount, keeping timestamps and timers consistent.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base_ms: i64,
    started: Instant,
}

impl TokioClock {
    pub fn starting_at(base_ms: i64) -> Self {
        Self {
            base_ms,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        self.base_ms + self.started.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(1_000_000);
        assert_eq!(clock.now_ms(), 1_000_000);
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now_ms(), 1_090_000);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2023-01-01
        assert!(SystemClock.now_ms() > 1_672_531_200_000);
    }
}
