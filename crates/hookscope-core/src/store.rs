//! Bounded, append-only retention of hook events for display.
//!
//! The store is the only place ids are assigned. Ids start at 1, grow by one
//! per accepted record and are never reused, even across [`EventStore::clear`].

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::types::{EventRecord, FilterOptions};

/// Default number of records kept in memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Maximum number of session ids reported by [`EventStore::filter_options`].
pub const MAX_FILTER_SESSIONS: usize = 100;

#[derive(Debug, Clone)]
pub struct EventStore {
    events: VecDeque<EventRecord>,
    capacity: usize,
    /// Next id to hand out.
    next_id: u64,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            next_id: 1,
        }
    }

    /// Accept a batch in arrival order, assigning sequential ids.
    ///
    /// Evicts from the front until the store is back at capacity and returns
    /// the accepted records with their ids filled in.
    pub fn append(&mut self, records: Vec<EventRecord>) -> Vec<EventRecord> {
        let mut accepted = Vec::with_capacity(records.len());
        for mut record in records {
            record.id = Some(self.next_id);
            self.next_id += 1;
            self.events.push_back(record.clone());
            accepted.push(record);
        }

        let excess = self.events.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.events.drain(..excess);
        }

        accepted
    }

    /// The newest `limit` records, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    /// Distinct apps (sorted), sessions (first seen, at most 100) and
    /// event types (sorted) across the retained records.
    pub fn filter_options(&self) -> FilterOptions {
        let mut source_apps = BTreeSet::new();
        let mut hook_event_types = BTreeSet::new();
        let mut seen_sessions = HashSet::new();
        let mut session_ids = Vec::new();

        for event in &self.events {
            if !event.source_app.is_empty() {
                source_apps.insert(event.source_app.as_str());
            }
            if !event.hook_event_type.is_empty() {
                hook_event_types.insert(event.hook_event_type.as_str());
            }
            if !event.session_id.is_empty()
                && session_ids.len() < MAX_FILTER_SESSIONS
                && seen_sessions.insert(event.session_id.as_str())
            {
                session_ids.push(event.session_id.clone());
            }
        }

        FilterOptions {
            source_apps: source_apps.into_iter().map(str::to_owned).collect(),
            session_ids,
            hook_event_types: hook_event_types.into_iter().map(str::to_owned).collect(),
        }
    }

    /// Drop every retained record. The id sequence keeps counting.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total records ever accepted.
    pub fn total_appended(&self) -> u64 {
        self.next_id - 1
    }
}
