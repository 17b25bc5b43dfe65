//! Delayed task helpers built on tokio tasks.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Run `task` after `delay_ms`. Negative delays run immediately.
pub fn spawn_after<F>(delay_ms: i64, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let delay = Duration::from_millis(delay_ms.max(0) as u64);
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        task.await;
    })
}

/// Timers owned by one in-flight signal.
#[derive(Default)]
pub struct TimerSet {
    pub entry: Option<JoinHandle<()>>,
    pub prefetch: Option<JoinHandle<()>>,
    pub verification: Option<JoinHandle<()>>,
    pub safety: Option<JoinHandle<()>>,
}

impl TimerSet {
    /// Abort every timer that has not fired yet.
    pub fn abort_all(&mut self) {
        for handle in [
            self.entry.take(),
            self.prefetch.take(),
            self.verification.take(),
            self.safety.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }

    /// Number of timers still scheduled.
    pub fn pending(&self) -> usize {
        [&self.entry, &self.prefetch, &self.verification, &self.safety]
            .iter()
            .filter(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
            .count()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.abort_all();
    }
}
