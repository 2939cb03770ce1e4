// ── Discovery queue ──
//
// Pending joins awaiting descriptor discovery. Entries are kept in FIFO
// order with debounce on insert, capped exponential backoff on failure,
// and a give-up once the retry budget is spent. The engine drives the
// attempts; this type only tracks bookkeeping.

pub mod descriptors;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::clock::{add, elapsed};
use crate::model::ShortAddr;
use crate::retry::RetryPolicy;

pub use descriptors::DiscoveryOptions;

/// One pending discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub short_addr: ShortAddr,
    pub attempt: u32,
    pub queued_at: DateTime<Utc>,
    pub next_try_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Last abandoned or failed attempt, for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryFailure {
    pub short_addr: ShortAddr,
    pub attempt: u32,
    pub error: String,
}

/// Queue counters. Monotonic except `queue_depth`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub queue_depth: usize,
    pub enqueued: u64,
    pub refreshed: u64,
    pub overflow_drop: u64,
    pub debounced: u64,
    pub attempts: u64,
    pub success: u64,
    pub failures: u64,
    pub requeued: u64,
    pub gave_up: u64,
    pub last_error: Option<DiscoveryFailure>,
}

/// What `queue()` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    Enqueued,
    /// Admitted after evicting the oldest entry.
    EnqueuedWithEviction { evicted: ShortAddr },
    /// Already pending; `next_try_at` reset to now.
    Refreshed,
    /// Seen within the debounce window; dropped.
    Debounced,
}

/// What happened to an entry after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Requeued { attempt: u32, backoff: Duration },
    GaveUp { attempt: u32 },
}

/// Summary of one `process()` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub queue_depth: usize,
}

/// Bounded FIFO of pending discoveries.
#[derive(Debug, Clone)]
pub struct DiscoveryQueue {
    entries: IndexMap<ShortAddr, QueueEntry>,
    last_seen: HashMap<ShortAddr, DateTime<Utc>>,
    max_depth: usize,
    debounce: Duration,
    retry: RetryPolicy,
    stats: DiscoveryStats,
}

impl DiscoveryQueue {
    pub const BATCH_MAX: usize = 128;

    pub fn new(max_depth: usize, debounce: Duration, retry: RetryPolicy) -> Self {
        Self {
            entries: IndexMap::new(),
            last_seen: HashMap::new(),
            max_depth: max_depth.max(1),
            debounce,
            retry,
            stats: DiscoveryStats::default(),
        }
    }

    /// Request discovery of `short_addr`.
    pub fn queue(&mut self, now: DateTime<Utc>, short_addr: ShortAddr) -> QueueOutcome {
        let debounce = self.debounce;
        self.last_seen
            .retain(|_, seen| elapsed(now, *seen) < debounce);

        if self.last_seen.contains_key(&short_addr) {
            self.stats.debounced += 1;
            return QueueOutcome::Debounced;
        }
        if !debounce.is_zero() {
            self.last_seen.insert(short_addr, now);
        }

        if let Some(entry) = self.entries.get_mut(&short_addr) {
            entry.next_try_at = now;
            self.stats.refreshed += 1;
            return QueueOutcome::Refreshed;
        }

        let mut outcome = QueueOutcome::Enqueued;
        while self.entries.len() >= self.max_depth {
            let Some((evicted, _)) = self.entries.shift_remove_index(0) else {
                break;
            };
            self.stats.overflow_drop += 1;
            outcome = QueueOutcome::EnqueuedWithEviction { evicted };
        }
        self.entries.insert(
            short_addr,
            QueueEntry {
                short_addr,
                attempt: 0,
                queued_at: now,
                next_try_at: now,
                last_error: None,
            },
        );
        self.stats.enqueued += 1;
        outcome
    }

    /// Up to `max_items` due entries in FIFO order.
    pub fn due(&self, now: DateTime<Utc>, max_items: usize) -> Vec<ShortAddr> {
        self.entries
            .values()
            .filter(|e| e.next_try_at <= now)
            .take(max_items.clamp(1, Self::BATCH_MAX))
            .map(|e| e.short_addr)
            .collect()
    }

    /// Count an attempt; returns the new attempt number.
    pub fn begin_attempt(&mut self, short_addr: ShortAddr) -> Option<u32> {
        let entry = self.entries.get_mut(&short_addr)?;
        entry.attempt += 1;
        self.stats.attempts += 1;
        Some(entry.attempt)
    }

    pub fn complete_success(&mut self, short_addr: ShortAddr) {
        if self.entries.shift_remove(&short_addr).is_some() {
            self.stats.success += 1;
        }
    }

    /// Requeue with backoff, or abandon once the budget is spent.
    pub fn complete_failure(
        &mut self,
        now: DateTime<Utc>,
        short_addr: ShortAddr,
        error: String,
    ) -> Option<FailureOutcome> {
        let attempt = self.entries.get(&short_addr)?.attempt;
        self.stats.failures += 1;
        self.stats.last_error = Some(DiscoveryFailure {
            short_addr,
            attempt,
            error: error.clone(),
        });

        if self.retry.exhausted(attempt) {
            self.entries.shift_remove(&short_addr);
            self.stats.gave_up += 1;
            return Some(FailureOutcome::GaveUp { attempt });
        }

        let backoff = self.retry.backoff_after(attempt);
        let entry = self.entries.get_mut(&short_addr)?;
        entry.next_try_at = add(now, backoff);
        entry.last_error = Some(error);
        self.stats.requeued += 1;
        Some(FailureOutcome::Requeued { attempt, backoff })
    }

    pub fn contains(&self, short_addr: ShortAddr) -> bool {
        self.entries.contains_key(&short_addr)
    }

    pub fn get(&self, short_addr: ShortAddr) -> Option<&QueueEntry> {
        self.entries.get(&short_addr)
    }

    pub fn remove(&mut self, short_addr: ShortAddr) -> Option<QueueEntry> {
        self.entries.shift_remove(&short_addr)
    }

    /// Pending entries in FIFO order.
    pub fn pending(&self) -> Vec<QueueEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> DiscoveryStats {
        DiscoveryStats {
            queue_depth: self.entries.len(),
            ..self.stats.clone()
        }
    }
}
