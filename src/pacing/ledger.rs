//! Per-recipient pacing and backoff state
//!
//! The ledger remembers, for every recipient, when the last message was
//! delivered and how long the current backoff is. Entries are created on the
//! first send attempt, evicted after a period of inactivity, and owned by a
//! single [`BackoffLedger`] handle that is cloned into every caller.
//!
//! Flight locks live apart from the evictable entries: a lock stays registered
//! while any batch holds or waits for it.

use crate::config::PacingConfig;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Growth factor applied to the backoff on each consecutive rate limit
pub const BACKOFF_MULTIPLIER: u32 = 4;

/// Pacing state of one recipient
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecipientState {
    /// Time of the last successful send
    pub last_sent_at: Option<Instant>,
    /// Current backoff; `None` when the recipient is not backing off
    pub backoff: Option<Duration>,
    /// End of a backoff whose message was given up on; `None` while retrying
    pub backoff_expires_at: Option<Instant>,
}

impl RecipientState {
    /// Spacing that must separate the last send from the next one
    #[must_use]
    pub fn window(&self, base: Duration) -> Duration {
        self.backoff.map_or(base, |backoff| backoff.max(base))
    }

    /// Remaining wait before the next send, zero when eligible
    #[must_use]
    pub fn delay_required(&self, base: Duration, now: Instant) -> Duration {
        let Some(last_sent_at) = self.last_sent_at else {
            return Duration::ZERO;
        };
        self.window(base)
            .saturating_sub(now.saturating_duration_since(last_sent_at))
    }

    /// Whether `now` still falls within the spacing window of the last send
    #[must_use]
    pub fn in_window(&self, base: Duration, now: Instant) -> bool {
        self.last_sent_at
            .is_some_and(|last| now.saturating_duration_since(last) < self.window(base))
    }

    /// Whether a backoff is still in force at `now`
    #[must_use]
    pub fn backing_off(&self, now: Instant) -> bool {
        self.backoff.is_some() && self.backoff_expires_at.map_or(true, |end| now < end)
    }

    /// Backoff that follows one more rate limit
    #[must_use]
    pub fn next_backoff(&self, base: Duration, max: Duration) -> Duration {
        match self.backoff {
            Some(current) if !current.is_zero() => {
                current.saturating_mul(BACKOFF_MULTIPLIER).min(max)
            }
            _ => base.min(max),
        }
    }
}

#[derive(Debug, Default)]
struct RecipientEntry {
    state: Mutex<RecipientState>,
}

type FlightLocks = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Exclusive right to send to one recipient.
///
/// Held by the pacer for a whole batch so two batches for the same recipient
/// never interleave. Dropping it releases the recipient.
#[derive(Debug)]
pub struct RecipientFlight {
    recipient: String,
    locks: FlightLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecipientFlight {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the registry still references the lock: nobody holds or awaits it
        if locks
            .get(&self.recipient)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.recipient);
        }
    }
}

/// Shared store of [`RecipientState`] keyed by recipient
#[derive(Clone)]
pub struct BackoffLedger {
    entries: Cache<String, Arc<RecipientEntry>>,
    flights: FlightLocks,
    base_delay: Duration,
    max_backoff: Duration,
}

impl std::fmt::Debug for BackoffLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffLedger")
            .field("entries", &self.entries.entry_count())
            .field("flights", &self.flights_in_use())
            .field("base_delay", &self.base_delay)
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}

impl BackoffLedger {
    /// Creates an empty ledger.
    ///
    /// Entries not touched for `recipient_idle_ttl` are evicted; at most
    /// `recipient_max_entries` recipients are kept.
    #[must_use]
    pub fn new(config: &PacingConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.recipient_max_entries)
            .time_to_idle(config.recipient_idle_ttl)
            .build();

        Self {
            entries,
            flights: FlightLocks::default(),
            base_delay: config.base_delay,
            max_backoff: config.max_backoff,
        }
    }

    /// Minimum spacing between sends
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Backoff ceiling
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    async fn entry(&self, recipient: &str) -> Arc<RecipientEntry> {
        self.entries
            .get_with_by_ref(recipient, async { Arc::new(RecipientEntry::default()) })
            .await
    }

    /// Time to wait before the next send to `recipient`.
    ///
    /// `max(base, backoff) - (now - last_sent_at)`, floored at zero. Unknown
    /// recipients need no wait and no entry is created for them.
    pub async fn delay_required_for(&self, recipient: &str) -> Duration {
        let Some(entry) = self.entries.get(recipient).await else {
            return Duration::ZERO;
        };
        let state = entry.state.lock().await;
        state.delay_required(self.base_delay, Instant::now())
    }

    /// Marks a successful send: stamps the send time and clears any backoff
    pub async fn record_success(&self, recipient: &str) {
        let entry = self.entry(recipient).await;
        let mut state = entry.state.lock().await;
        state.last_sent_at = Some(Instant::now());
        state.backoff_expires_at = None;
        if let Some(previous) = state.backoff.take() {
            debug!("Backoff for {recipient} cleared (was {}ms)", previous.as_millis());
        }
    }

    /// Escalates the backoff after a rate limit and returns the new delay.
    ///
    /// The first rate limit sets the base delay; each further one multiplies
    /// the current backoff by [`BACKOFF_MULTIPLIER`], capped at the ceiling.
    pub async fn record_rate_limited(&self, recipient: &str) -> Duration {
        let entry = self.entry(recipient).await;
        let mut state = entry.state.lock().await;
        let next = state.next_backoff(self.base_delay, self.max_backoff);
        state.backoff = Some(next);
        state.backoff_expires_at = None;
        next
    }

    /// Stops retrying for `recipient`: the current backoff runs out instead of
    /// waiting for a successful send to clear it
    pub async fn record_gave_up(&self, recipient: &str) {
        let entry = self.entry(recipient).await;
        let mut state = entry.state.lock().await;
        if let Some(backoff) = state.backoff {
            state.backoff_expires_at = Some(Instant::now() + backoff);
        }
    }

    /// Snapshot of the recipient's state, if it is tracked
    pub async fn state_of(&self, recipient: &str) -> Option<RecipientState> {
        let entry = self.entries.get(recipient).await?;
        let state = *entry.state.lock().await;
        Some(state)
    }

    /// Current backoff of `recipient`
    pub async fn backoff_for(&self, recipient: &str) -> Option<Duration> {
        self.state_of(recipient).await.and_then(|s| s.backoff)
    }

    /// Time of the last successful send to `recipient`
    pub async fn last_sent_at(&self, recipient: &str) -> Option<Instant> {
        self.state_of(recipient).await.and_then(|s| s.last_sent_at)
    }

    /// Waits until no other batch is sending to `recipient` and claims it
    pub async fn acquire(&self, recipient: &str) -> RecipientFlight {
        let lock = {
            let mut locks = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(recipient.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        RecipientFlight {
            recipient: recipient.to_string(),
            locks: Arc::clone(&self.flights),
            guard: Some(guard),
        }
    }

    /// Recipients with a batch in flight or waiting for one
    #[must_use]
    pub fn flights_in_use(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops the pacing state for `recipient`; a batch in flight keeps its lock
    pub async fn forget(&self, recipient: &str) {
        self.entries.invalidate(recipient).await;
    }

    /// Number of tracked recipients.
    ///
    /// Approximate until pending cache maintenance has run.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Runs pending eviction and bookkeeping
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }
}
