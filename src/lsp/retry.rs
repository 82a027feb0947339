// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Bounded exponential backoff for failed server instances.
//!
//! Each [`InstanceKey`] has an attempt counter and at most one pending timer.
//! Scheduling again for a key replaces its timer. Once the counter reaches the
//! length of the delay table the scheduler gives up on that key until it is
//! cleared.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::registry::InstanceKey;

/// Delay before retry N is `RETRY_DELAYS[N - 1]`.
pub const RETRY_DELAYS: [Duration; 5] = [
    Duration::from_millis(1000),
    Duration::from_millis(2000),
    Duration::from_millis(4000),
    Duration::from_millis(8000),
    Duration::from_millis(16000),
];

/// Retry budget per instance with the default table.
pub const MAX_RETRIES: usize = RETRY_DELAYS.len();

struct PendingTimer {
    id: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct RetryRecord {
    attempts: u32,
    timer: Option<PendingTimer>,
}

#[derive(Default)]
struct SchedulerState {
    records: HashMap<InstanceKey, RetryRecord>,
    next_timer: u64,
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-instance retry bookkeeping.
pub struct RetryScheduler {
    delays: Vec<Duration>,
    state: Arc<Mutex<SchedulerState>>,
}

impl RetryScheduler {
    /// Creates a scheduler using [`RETRY_DELAYS`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_delays(RETRY_DELAYS.to_vec())
    }

    /// Creates a scheduler with a custom backoff table. The table length is
    /// the retry budget.
    #[must_use]
    pub fn with_delays(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Maximum number of retries per key.
    #[must_use]
    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let index = usize::try_from(attempt.checked_sub(1)?).ok()?;
        self.delays.get(index).copied()
    }

    /// Schedules `action` to run after the next backoff delay for `key`.
    ///
    /// Cancels any timer already pending for the key. The attempt counter is
    /// advanced immediately. Returns the attempt number, or `None` once the
    /// budget is spent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, key: &InstanceKey, action: F) -> Option<u32>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut guard = lock(&self.state);
        let SchedulerState {
            records,
            next_timer,
        } = &mut *guard;
        let record = records.entry(key.clone()).or_default();

        let Some(delay) = usize::try_from(record.attempts)
            .ok()
            .and_then(|i| self.delays.get(i).copied())
        else {
            warn!(
                instance = %key,
                attempts = record.attempts,
                "Retry budget exhausted, giving up"
            );
            return None;
        };

        if let Some(previous) = record.timer.take() {
            previous.handle.abort();
        }

        record.attempts += 1;
        let attempt = record.attempts;
        let timer_id = *next_timer;
        *next_timer += 1;

        debug!(instance = %key, attempt, ?delay, "Scheduling retry");

        let weak = Arc::downgrade(&self.state);
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if detach(&weak, &fired_key, timer_id) {
                action().await;
            }
        });

        record.timer = Some(PendingTimer {
            id: timer_id,
            handle: handle.abort_handle(),
        });

        Some(attempt)
    }

    /// Cancels the pending timer for `key` and forgets its attempts.
    pub fn clear(&self, key: &InstanceKey) {
        if let Some(record) = lock(&self.state).records.remove(key)
            && let Some(timer) = record.timer
        {
            timer.handle.abort();
        }
    }

    /// Clears every key whose server id is `server_id`. Returns how many
    /// keys had bookkeeping.
    pub fn clear_server(&self, server_id: &str) -> usize {
        let mut state = lock(&self.state);
        let keys: Vec<InstanceKey> = state
            .records
            .keys()
            .filter(|k| k.server_id() == server_id)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(record) = state.records.remove(key)
                && let Some(timer) = record.timer
            {
                timer.handle.abort();
            }
        }
        keys.len()
    }

    /// Cancels every pending timer and drops all bookkeeping.
    pub fn cancel_all(&self) {
        let records = std::mem::take(&mut lock(&self.state).records);
        for timer in records.into_values().filter_map(|r| r.timer) {
            timer.handle.abort();
        }
    }

    /// Attempts made so far for `key`.
    #[must_use]
    pub fn retry_count(&self, key: &InstanceKey) -> u32 {
        lock(&self.state)
            .records
            .get(key)
            .map_or(0, |r| r.attempts)
    }

    /// Whether a timer is waiting to fire for `key`.
    #[must_use]
    pub fn is_pending(&self, key: &InstanceKey) -> bool {
        lock(&self.state)
            .records
            .get(key)
            .is_some_and(|r| r.timer.is_some())
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Unhooks a fired timer from its record so the action can reschedule or
/// clear its own key without aborting itself. Returns `false` if the timer
/// was superseded or the scheduler is gone.
fn detach(state: &Weak<Mutex<SchedulerState>>, key: &InstanceKey, timer_id: u64) -> bool {
    let Some(state) = state.upgrade() else {
        return false;
    };
    let mut state = lock(&state);
    match state.records.get_mut(key) {
        Some(record) if record.timer.as_ref().is_some_and(|t| t.id == timer_id) => {
            record.timer = None;
            true
        }
        _ => false,
    }
}
