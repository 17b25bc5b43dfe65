//! Best-of buffer for competing candidates of the same entry slot.
//!
//! Candidates are keyed by symbol and entry time. The first submission for
//! a slot schedules a commit `lead_window_ms` before entry; later ones only
//! replace the cached best when strictly better. At commit time the best
//! candidate is pushed downstream if it meets the score floor, otherwise the
//! whole slot is discarded.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::timers::spawn_after;
use crate::config::{ArbitrationConfig, Comparator};
use crate::types::Signal;

/// What happened to a submitted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// First candidate of its slot; a commit is scheduled.
    Opened,
    /// Became the new best candidate.
    Replaced,
    /// Kept the existing best.
    Kept,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Entry time is not in the future.
    SlotPassed,
    /// The slot was already committed or discarded.
    SlotDecided,
}

struct SlotEntry {
    entry_time: i64,
    candidate_ids: Vec<Uuid>,
    best: Signal,
    decided: bool,
    commit_timer: Option<JoinHandle<()>>,
}

/// Time-windowed candidate arbitration.
pub struct CandidateArbitrationCache {
    config: ArbitrationConfig,
    min_score: u8,
    lead_window_ms: i64,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, SlotEntry>,
    /// Decided slots by key, holding their entry time.
    decided: DashMap<String, i64>,
    committed_tx: mpsc::UnboundedSender<Signal>,
}

impl CandidateArbitrationCache {
    /// Create the cache and the receiver committed signals are sent to.
    pub fn new(
        config: ArbitrationConfig,
        min_score: u8,
        lead_window_ms: i64,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Signal>) {
        let (committed_tx, committed_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(Self {
            config,
            min_score,
            lead_window_ms,
            clock,
            entries: DashMap::new(),
            decided: DashMap::new(),
            committed_tx,
        });
        (cache, committed_rx)
    }

    /// Rank used by the configured comparator; higher is better.
    fn rank(&self, signal: &Signal) -> f64 {
        let confidence = (signal.ml_probability - 0.5).abs() * 2.0;
        match self.config.comparator {
            Comparator::Score => signal.score as f64,
            Comparator::Confidence => confidence,
            Comparator::Weighted => {
                let share = self.config.score_share;
                share * (signal.score as f64 / 100.0) + (1.0 - share) * confidence
            }
        }
    }

    /// Offer a candidate for its entry slot.
    pub fn submit(self: &Arc<Self>, signal: Signal) -> SubmitOutcome {
        let now = self.clock.now_ms();
        self.decided.retain(|_, entry_time| *entry_time > now);

        if signal.entry_time <= now {
            debug!("Rejecting candidate {}: entry time already passed", signal.id);
            return SubmitOutcome::Rejected(RejectReason::SlotPassed);
        }

        let key = signal.slot_key();
        if self.decided.contains_key(&key) {
            debug!("Dropping late candidate {} for decided slot {}", signal.id, key);
            return SubmitOutcome::Rejected(RejectReason::SlotDecided);
        }

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.decided {
                    return SubmitOutcome::Rejected(RejectReason::SlotDecided);
                }
                slot.candidate_ids.push(signal.id);
                if self.rank(&signal) > self.rank(&slot.best) {
                    debug!(
                        "Candidate {} (score {}) replaces {} (score {}) for {}",
                        signal.id, signal.score, slot.best.id, slot.best.score, key
                    );
                    slot.best = signal;
                    SubmitOutcome::Replaced
                } else {
                    SubmitOutcome::Kept
                }
            }
            Entry::Vacant(vacant) => {
                // Clock drift can make this negative: commit right away
                let delay = signal.entry_time - self.lead_window_ms - now;
                let cache = Arc::clone(self);
                let commit_key = key.clone();
                let timer = spawn_after(delay, async move {
                    cache.commit(commit_key).await;
                });
                debug!("Opened slot {} (commit in {}ms)", key, delay.max(0));
                vacant.insert(SlotEntry {
                    entry_time: signal.entry_time,
                    candidate_ids: vec![signal.id],
                    best: signal,
                    decided: false,
                    commit_timer: Some(timer),
                });
                SubmitOutcome::Opened
            }
        }
    }

    /// Decide a slot: push the best candidate downstream or discard it.
    async fn commit(self: Arc<Self>, key: String) {
        let (best, candidates, entry_time) = {
            let Some(mut slot) = self.entries.get_mut(&key) else {
                return;
            };
            if slot.decided {
                return;
            }
            slot.decided = true;
            slot.commit_timer = None;
            (slot.best.clone(), slot.candidate_ids.len(), slot.entry_time)
        };
        self.decided.insert(key.clone(), entry_time);

        if best.score >= self.min_score {
            info!(
                "Committing signal {} for {} ({} {} score {}, best of {})",
                best.id,
                key,
                best.symbol,
                best.direction.as_option_side(),
                best.score,
                candidates
            );
            if self.committed_tx.send(best).is_err() {
                warn!("Commit receiver dropped; signal for {} lost", key);
            }
        } else {
            info!(
                "No qualifying signal for {}: best score {} below {} ({} candidates)",
                key, best.score, self.min_score, candidates
            );
        }

        // Let in-flight comparisons settle before dropping the entry
        tokio::time::sleep(Duration::from_millis(self.config.grace_ms)).await;
        self.entries.remove(&key);
    }

    /// Slots still holding an entry (open or within grace).
    pub fn open_slots(&self) -> usize {
        self.entries.len()
    }

    /// Current best candidate for a slot key.
    pub fn best_for(&self, key: &str) -> Option<Signal> {
        self.entries.get(key).map(|slot| slot.best.clone())
    }

    /// Cancel pending commits and drop every entry.
    pub fn shutdown(&self) {
        for mut slot in self.entries.iter_mut() {
            if let Some(timer) = slot.commit_timer.take() {
                timer.abort();
            }
        }
        self.entries.clear();
    }
}
