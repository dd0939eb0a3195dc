use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use pipeline_logging::{pipeline_debug, pipeline_info};
use serde::{Deserialize, Serialize};

use crate::LogCategory;

pub const DEFAULT_CAPACITY: usize = 100;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub payload: serde_json::Value,
}

struct Ring {
    entries: VecDeque<LogEntry>,
    next_id: u64,
    capacity: usize,
    debug: bool,
}

/// Bounded, shared log of pipeline decisions. Oldest entries are evicted
/// first once `capacity` is reached. Clones share the same ring.
#[derive(Clone)]
pub struct DiagnosticsLog {
    inner: Arc<Mutex<Ring>>,
    clock: Clock,
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for DiagnosticsLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.lock();
        f.debug_struct("DiagnosticsLog")
            .field("len", &ring.entries.len())
            .field("capacity", &ring.capacity)
            .finish()
    }
}

impl DiagnosticsLog {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(Utc::now))
    }

    pub fn with_clock(capacity: usize, clock: Clock) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                next_id: 1,
                capacity,
                debug: false,
            })),
            clock,
        }
    }

    // A panic while holding the lock cannot leave the ring half-updated, so
    // a poisoned mutex is still usable.
    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Echo every new entry to the process log at info level.
    pub fn set_debug(&self, enabled: bool) {
        self.lock().debug = enabled;
    }

    pub fn record(&self, category: LogCategory, payload: serde_json::Value) -> u64 {
        let timestamp = (self.clock)();
        let mut ring = self.lock();
        let id = ring.next_id;
        ring.next_id += 1;
        if ring.debug {
            pipeline_info!("[{}] {}", category, payload);
        } else {
            pipeline_debug!("diagnostics #{id} {category}");
        }
        if ring.entries.len() >= ring.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(LogEntry {
            id,
            timestamp,
            category,
            payload,
        });
        id
    }

    /// All retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn entries_on(&self, day: NaiveDate) -> Vec<LogEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|entry| entry.timestamp.date_naive() == day)
            .cloned()
            .collect()
    }

    /// Entries recorded on the clock's current day.
    pub fn today(&self) -> Vec<LogEntry> {
        let day = (self.clock)().date_naive();
        self.entries_on(day)
    }

    /// Drops every entry not recorded on `day`.
    pub fn retain_day(&self, day: NaiveDate) {
        self.lock()
            .entries
            .retain(|entry| entry.timestamp.date_naive() == day);
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Replaces the ring with previously persisted entries. Only the newest
    /// `capacity` survive and new ids continue after the highest restored one.
    pub fn restore(&self, entries: Vec<LogEntry>) {
        let mut ring = self.lock();
        let skip = entries.len().saturating_sub(ring.capacity);
        ring.entries = entries.into_iter().skip(skip).collect();
        let max_id = ring.entries.iter().map(|entry| entry.id).max().unwrap_or(0);
        ring.next_id = ring.next_id.max(max_id + 1);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}
