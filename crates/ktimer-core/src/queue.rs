//! Deadline queue for one-shot timers
//!
//! Ordered set of pending [`DeadlineEntry`]s keyed by `(expiry, seq)`.
//! The sequence number breaks ties in insertion order so equal deadlines
//! fire deterministically, and doubles as a stable handle for removal.
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Remove by key: O(log n), remaining order untouched
//! - Peek minimum: O(log n)
//! - Pop all due: O(k log n) where k = number of due entries
//!
//! The queue itself is not synchronized; the owning scheduler guards it
//! together with its descriptors under a single mutex.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::entry::DeadlineEntry;

/// Stable position of an entry in a [`DeadlineQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey {
    expiry: Instant,
    seq: u64,
}

impl QueueKey {
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Lifetime counters of a deadline queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries currently pending
    pub pending: usize,
    /// Total entries inserted
    pub total_inserted: u64,
    /// Total entries popped as due
    pub total_fired: u64,
    /// Total entries removed by cancel
    pub total_cancelled: u64,
    /// Total entries dropped unfired by drain (scheduler stop)
    pub total_discarded: u64,
}

/// Min-ordered queue of one-shot deadlines
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    entries: BTreeMap<QueueKey, DeadlineEntry>,
    next_seq: u64,
    stats: QueueStats,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning its removal key
    pub fn insert(&mut self, entry: DeadlineEntry) -> QueueKey {
        let key = QueueKey {
            expiry: entry.expiry(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, entry);
        self.stats.total_inserted += 1;
        key
    }

    /// Remove the entry at `key`
    ///
    /// Returns None if it already fired or was already removed.
    pub fn remove(&mut self, key: &QueueKey) -> Option<DeadlineEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.stats.total_cancelled += 1;
        }
        removed
    }

    /// Undo an insert whose scheduling failed
    ///
    /// Unlike [`remove`](Self::remove) this is not counted as a cancellation.
    pub fn retract(&mut self, key: &QueueKey) -> Option<DeadlineEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.stats.total_inserted -= 1;
        }
        removed
    }

    /// Whether `key` still refers to a pending entry
    #[inline]
    pub fn contains(&self, key: &QueueKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Earliest pending expiry
    #[inline]
    pub fn peek_min(&self) -> Option<Instant> {
        self.entries.first_key_value().map(|(k, _)| k.expiry)
    }

    /// Remove and return every entry with expiry <= `now`, ascending
    ///
    /// One descriptor notification can stand for several coalesced
    /// expirations, so everything due is returned in one batch.
    pub fn pop_all_due(&mut self, now: Instant) -> Vec<DeadlineEntry> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().expiry > now {
                break; // Ordered, nothing later is due
            }
            due.push(entry.remove());
        }
        self.stats.total_fired += due.len() as u64;
        due
    }

    /// Remove every pending entry without firing it
    pub fn drain(&mut self) -> Vec<DeadlineEntry> {
        let drained: Vec<_> = std::mem::take(&mut self.entries).into_values().collect();
        self.stats.total_discarded += drained.len() as u64;
        drained
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.entries.len(),
            ..self.stats
        }
    }
}
