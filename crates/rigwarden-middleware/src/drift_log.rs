//! [`DriftLog`] – bounded retention of recent drift events.
//!
//! Keeps the last `capacity` events in arrival order; older ones fall off
//! the front.  A running count per [`DriftKind`] survives eviction so a long
//! session can still be summarised.
//!
//! # Example
//!
//! ```rust
//! use rigwarden_middleware::drift_log::DriftLog;
//! use rigwarden_types::{DriftEvent, DriftKind};
//!
//! let mut log = DriftLog::new(2);
//! log.record(DriftEvent::new(1, "head", DriftKind::Magnitude, Some(0.3), 0.2));
//! log.record(DriftEvent::new(2, "head", DriftKind::Magnitude, Some(0.25), 0.2));
//! log.record(DriftEvent::new(3, "avatar_hips", DriftKind::Missing, None, 0.1));
//!
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.total(), 3);
//! assert_eq!(log.count(DriftKind::Magnitude), 2);
//! ```

use std::collections::{BTreeMap, VecDeque};

use rigwarden_types::{DriftEvent, DriftKind};

pub struct DriftLog {
    capacity: usize,
    events: VecDeque<DriftEvent>,
    counts: BTreeMap<DriftKind, u64>,
}

impl DriftLog {
    /// Create a log retaining at most `capacity` events.  A capacity of 0
    /// keeps only the counters.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            counts: BTreeMap::new(),
        }
    }

    /// Append `event`, evicting the oldest entry when full.
    pub fn record(&mut self, event: DriftEvent) {
        *self.counts.entry(event.kind).or_default() += 1;
        if self.capacity == 0 {
            return;
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Retained events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &DriftEvent> {
        self.events.iter()
    }

    /// The `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &DriftEvent> {
        self.events.iter().skip(self.events.len().saturating_sub(n))
    }

    /// Retained events for `node`, oldest first.
    pub fn for_node<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a DriftEvent> {
        self.events.iter().filter(move |e| e.node == node)
    }

    /// Events of `kind` ever recorded, including evicted ones.
    pub fn count(&self, kind: DriftKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Events ever recorded, including evicted ones.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Per-kind totals in repair-priority order.
    pub fn counts(&self) -> impl Iterator<Item = (DriftKind, u64)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }

    /// Drop retained events and counters.
    pub fn clear(&mut self) {
        self.events.clear();
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(frame: u64, node: &str, kind: DriftKind) -> DriftEvent {
        DriftEvent::new(frame, node, kind, None, 0.1)
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut log = DriftLog::new(3);
        for frame in 0..5 {
            log.record(event(frame, "head", DriftKind::Magnitude));
        }
        let frames: Vec<u64> = log.iter().map(|e| e.frame).collect();
        assert_eq!(frames, vec![2, 3, 4]);
    }

    #[test]
    fn counts_survive_eviction() {
        let mut log = DriftLog::new(1);
        log.record(event(0, "head", DriftKind::Ownership));
        log.record(event(1, "head", DriftKind::Invalid));
        log.record(event(2, "head", DriftKind::Invalid));
        assert_eq!(log.len(), 1);
        assert_eq!(log.count(DriftKind::Ownership), 1);
        assert_eq!(log.count(DriftKind::Invalid), 2);
        assert_eq!(log.count(DriftKind::Missing), 0);
        assert_eq!(log.total(), 3);
    }

    #[test]
    fn counts_iterate_in_priority_order() {
        let mut log = DriftLog::new(8);
        log.record(event(0, "a", DriftKind::Missing));
        log.record(event(0, "b", DriftKind::Ownership));
        let kinds: Vec<DriftKind> = log.counts().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![DriftKind::Ownership, DriftKind::Missing]);
    }

    #[test]
    fn recent_returns_tail() {
        let mut log = DriftLog::new(10);
        for frame in 0..6 {
            log.record(event(frame, "head", DriftKind::Magnitude));
        }
        let frames: Vec<u64> = log.recent(2).map(|e| e.frame).collect();
        assert_eq!(frames, vec![4, 5]);
        assert_eq!(log.recent(100).count(), 6);
    }

    #[test]
    fn filters_by_node() {
        let mut log = DriftLog::new(10);
        log.record(event(0, "head", DriftKind::Magnitude));
        log.record(event(1, "avatar_hips", DriftKind::Magnitude));
        log.record(event(2, "head", DriftKind::Invalid));
        assert_eq!(log.for_node("head").count(), 2);
    }

    #[test]
    fn zero_capacity_keeps_counters_only() {
        let mut log = DriftLog::new(0);
        log.record(event(0, "head", DriftKind::Magnitude));
        assert!(log.is_empty());
        assert_eq!(log.total(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let mut log = DriftLog::new(4);
        log.record(event(0, "head", DriftKind::Magnitude));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.total(), 0);
    }
}
