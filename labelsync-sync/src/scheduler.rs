//! Per-node pass scheduling.
//!
//! State per node:
//! 1. `Unseen` (never admitted)
//! 2. `Fresh` (last pass completed less than `min_sync_period` ago)
//! 3. `Due` (first pass pending, period elapsed, or last pass failed)
//!
//! Admission and the in-flight flag are checked under one lock, so a node
//! never has two passes running at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time source for the tracker.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unseen,
    Fresh { last_synced: DateTime<Utc> },
    Due { last_synced: Option<DateTime<Utc>> },
}

/// Answer to [`SyncTracker::try_begin`].
#[derive(Debug)]
pub enum Admission {
    /// The pass may run; complete the ticket once it succeeds.
    Run(PassTicket),
    /// Synced recently enough; skip without touching any collaborator.
    Fresh { last_synced: DateTime<Utc> },
    /// Another pass for this node has not finished yet.
    InFlight,
}

#[derive(Debug, Default, Clone, Copy)]
struct Entry {
    last_synced: Option<DateTime<Utc>>,
    in_flight: bool,
}

/// Process-local record of when each node last completed a pass.
pub struct SyncTracker {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl std::fmt::Debug for SyncTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTracker")
            .field("nodes", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for SyncTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SyncTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn state(&self, node: &str, period: Duration) -> SyncState {
        let entries = self.lock();
        match entries.get(node) {
            None => SyncState::Unseen,
            Some(entry) => classify(entry.last_synced, self.clock.now(), period),
        }
    }

    /// Atomically check due-ness and mark the node in flight.
    pub fn try_begin(self: &Arc<Self>, node: &str, period: Duration) -> Admission {
        let mut entries = self.lock();
        let now = self.clock.now();
        let entry = entries.entry(node.to_owned()).or_default();
        if entry.in_flight {
            return Admission::InFlight;
        }
        if let SyncState::Fresh { last_synced } = classify(entry.last_synced, now, period) {
            return Admission::Fresh { last_synced };
        }
        entry.in_flight = true;
        Admission::Run(PassTicket {
            tracker: Arc::clone(self),
            node: node.to_owned(),
            done: false,
        })
    }

    pub fn last_synced(&self, node: &str) -> Option<DateTime<Utc>> {
        self.lock().get(node).and_then(|e| e.last_synced)
    }

    /// Every known node with its last completion time, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        let mut rows: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.last_synced))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, node: &str, completed: bool) {
        let now = self.clock.now();
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(node) {
            entry.in_flight = false;
            if completed {
                entry.last_synced = Some(now);
            }
        }
    }
}

fn classify(last: Option<DateTime<Utc>>, now: DateTime<Utc>, period: Duration) -> SyncState {
    let Some(last) = last else {
        return SyncState::Due { last_synced: None };
    };
    // A clock that went backwards counts as no time elapsed.
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    if elapsed >= period {
        SyncState::Due {
            last_synced: Some(last),
        }
    } else {
        SyncState::Fresh { last_synced: last }
    }
}

/// Exclusive right to run one pass for a node.
///
/// Dropping the ticket without [`PassTicket::complete`] leaves the node due.
#[derive(Debug)]
pub struct PassTicket {
    tracker: Arc<SyncTracker>,
    node: String,
    done: bool,
}

impl PassTicket {
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Record a completed pass at the current time.
    pub fn complete(mut self) {
        self.done = true;
        self.tracker.finish(&self.node, true);
    }
}

impl Drop for PassTicket {
    fn drop(&mut self) {
        if !self.done {
            self.tracker.finish(&self.node, false);
        }
    }
}

/// Format an age in the largest whole unit (`42s`, `5m`, `3h`, `2d`).
pub fn format_age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(since).num_seconds().max(0) as u64;
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
