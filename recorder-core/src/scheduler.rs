//! Ordered timeline of pending transport actions.
//!
//! Entries are keyed by `(tick, priority, sequence)`: earlier ticks first, then
//! lower priority values, then insertion order. Cancelling a sequence is a
//! bulk `clear()`.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    tick: u64,
    priority: u8,
    sequence: u64,
}

#[derive(Debug, Clone)]
pub struct Timeline<A> {
    entries: BTreeMap<Key, A>,
    next_sequence: u64,
}

impl<A> Timeline<A> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    pub fn schedule(&mut self, tick: u64, priority: u8, action: A) {
        let key = Key {
            tick,
            priority,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(key, action);
    }

    /// Removes and returns the earliest entry at or before `limit`.
    pub fn pop_due(&mut self, limit: u64) -> Option<(u64, A)> {
        let first = self.entries.first_key_value().map(|(k, _)| *k)?;
        if first.tick > limit {
            return None;
        }
        self.entries.remove(&first).map(|action| (first.tick, action))
    }

    pub fn next_tick(&self) -> Option<u64> {
        self.entries.keys().next().map(|k| k.tick)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<A> Default for Timeline<A> {
    fn default() -> Self {
        Self::new()
    }
}
