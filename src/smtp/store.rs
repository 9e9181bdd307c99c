//! Mail stores: where sessions put finished messages

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::smtp::error::StoreError;
use crate::smtp::message::MailMessage;

/// Number of messages a [`RollingMailStore`] keeps unless told otherwise
pub const DEFAULT_CAPACITY: usize = 100;

/// Interval between polls in [`MailStore::wait_for_count`]
const POLL_TICK: Duration = Duration::from_millis(1);

/// Sink for messages finished by SMTP sessions.
///
/// Implementations are shared between concurrently running sessions and
/// any number of readers, so every method takes `&self`.
pub trait MailStore: Send + Sync {
    /// Store a finished message. Never fails.
    fn add(&self, message: MailMessage);

    /// Snapshot of the retained messages, oldest first
    fn messages(&self) -> Vec<Arc<MailMessage>>;

    /// Retained message at `index`, oldest first
    fn message(&self, index: usize) -> Result<Arc<MailMessage>, StoreError>;

    /// Number of messages ever added, including any evicted since
    fn email_count(&self) -> usize;

    /// Poll until at least `count` messages have arrived or `ticks`
    /// one-millisecond polls have gone by. Returns whether the count was
    /// reached.
    fn wait_for_count(&self, count: usize, ticks: usize) -> bool {
        let mut remaining = ticks;
        while self.email_count() < count {
            if remaining == 0 {
                return false;
            }
            remaining -= 1;
            thread::sleep(POLL_TICK);
        }
        true
    }
}

#[derive(Debug, Default)]
struct Retained {
    messages: VecDeque<Arc<MailMessage>>,
    total: usize,
}

impl Retained {
    fn get(&self, index: usize) -> Result<Arc<MailMessage>, StoreError> {
        self.messages
            .get(index)
            .cloned()
            .ok_or(StoreError::OutOfRange {
                index,
                len: self.messages.len(),
            })
    }
}

fn lock(retained: &Mutex<Retained>) -> MutexGuard<'_, Retained> {
    // Updates never panic midway, so a poisoned guard still holds consistent data
    retained.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps the most recent `capacity` messages, evicting the oldest first
#[derive(Debug)]
pub struct RollingMailStore {
    capacity: usize,
    retained: Mutex<Retained>,
}

impl RollingMailStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            retained: Mutex::new(Retained {
                messages: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                total: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RollingMailStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MailStore for RollingMailStore {
    fn add(&self, message: MailMessage) {
        let mut retained = lock(&self.retained);
        retained.messages.push_back(Arc::new(message));
        retained.total += 1;
        while retained.messages.len() > self.capacity {
            retained.messages.pop_front();
            trace!(total = retained.total, "evicted oldest message");
        }
    }

    fn messages(&self) -> Vec<Arc<MailMessage>> {
        lock(&self.retained).messages.iter().cloned().collect()
    }

    fn message(&self, index: usize) -> Result<Arc<MailMessage>, StoreError> {
        lock(&self.retained).get(index)
    }

    fn email_count(&self) -> usize {
        lock(&self.retained).total
    }
}

/// Keeps every message for the lifetime of the store
#[derive(Debug, Default)]
pub struct UnboundedMailStore {
    retained: Mutex<Retained>,
}

impl UnboundedMailStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MailStore for UnboundedMailStore {
    fn add(&self, message: MailMessage) {
        let mut retained = lock(&self.retained);
        retained.messages.push_back(Arc::new(message));
        retained.total += 1;
    }

    fn messages(&self) -> Vec<Arc<MailMessage>> {
        lock(&self.retained).messages.iter().cloned().collect()
    }

    fn message(&self, index: usize) -> Result<Arc<MailMessage>, StoreError> {
        lock(&self.retained).get(index)
    }

    fn email_count(&self) -> usize {
        lock(&self.retained).total
    }
}
