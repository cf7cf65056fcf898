use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

pub type TimerId = u64;

struct TimerEntry {
    id: TimerId,
    handle: JoinHandle<()>,
}

struct TimerTable<P> {
    next_id: TimerId,
    entries: HashMap<P, TimerEntry>,
}

/// At most one pending timer per purpose.
///
/// Scheduling a purpose that already has a pending timer aborts the old one
/// first. A timer leaves the set before its action runs, so the action may
/// schedule the same purpose again.
pub struct RetryTimerSet<P> {
    table: Arc<Mutex<TimerTable<P>>>,
}

impl<P> fmt::Debug for RetryTimerSet<P> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self
            .table
            .lock()
            .map(|table| table.entries.len())
            .unwrap_or_default();
        formatter
            .debug_struct("RetryTimerSet")
            .field("pending", &pending)
            .finish()
    }
}

impl<P> Default for RetryTimerSet<P> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(TimerTable {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<P> RetryTimerSet<P>
where
    P: Copy + Eq + Hash + fmt::Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, purpose: P, delay: Duration, action: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let mut table = self.lock();
        if let Some(previous) = table.entries.remove(&purpose) {
            previous.handle.abort();
        }

        table.next_id = table
            .next_id
            .checked_add(1)
            .expect("retry timer id space exhausted");
        let id = table.next_id;
        let weak = Arc::downgrade(&self.table);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if release_entry(&weak, purpose, id) {
                debug!(?purpose, timer_id = id, "retry timer fired");
                action();
            }
        });
        table.entries.insert(purpose, TimerEntry { id, handle });
        id
    }

    pub fn cancel(&self, purpose: P) -> bool {
        match self.lock().entries.remove(&purpose) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, entry) in self.lock().entries.drain() {
            entry.handle.abort();
        }
    }

    pub fn is_scheduled(&self, purpose: P) -> bool {
        self.lock().entries.contains_key(&purpose)
    }

    pub fn timer_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerTable<P>> {
        self.table.lock().expect("retry timer table lock poisoned")
    }
}

impl<P> Drop for RetryTimerSet<P> {
    fn drop(&mut self) {
        if let Ok(mut table) = self.table.lock() {
            for (_, entry) in table.entries.drain() {
                entry.handle.abort();
            }
        }
    }
}

fn release_entry<P: Eq + Hash>(
    table: &Weak<Mutex<TimerTable<P>>>,
    purpose: P,
    id: TimerId,
) -> bool {
    let Some(table) = table.upgrade() else {
        return false;
    };
    let mut table = table.lock().expect("retry timer table lock poisoned");
    match table.entries.get(&purpose) {
        Some(entry) if entry.id == id => {
            table.entries.remove(&purpose);
            true
        }
        _ => false,
    }
}
