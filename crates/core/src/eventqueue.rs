//! Deferred, user-confirmable actions (component I).
//!
//! Distinct from [`crate::event::EventBus`]: the event bus is a
//! fire-and-forget fact stream with arbitrarily many subscribers. An
//! [`EventQueue`] entry models one pending decision — a MUC invite awaiting
//! accept/reject, a whois awaiting a timeout — that fires its callback
//! exactly once and is then removed, matching the exactly-once testable
//! property in SPEC_FULL.md §8.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Reject,
    Cancel,
    Timeout,
}

/// A single outcome delivered to a pending event's callback.
pub struct Firing<P> {
    pub id: EventId,
    pub action: Action,
    pub payload: P,
}

struct Entry<P> {
    description: String,
    expiry: Option<Instant>,
    payload: Option<P>,
}

/// Holds pending confirmable events keyed by [`EventId`]. Payloads are
/// owned directly (no separate destructor callback is needed the way the
/// original C API required one — dropping the `Entry` drops the payload).
pub struct EventQueue<P> {
    next_id: AtomicU64,
    entries: HashMap<EventId, Entry<P>>,
}

impl<P> Default for EventQueue<P> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: HashMap::new(),
        }
    }
}

impl<P> EventQueue<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending event, returning its id.
    pub fn push(&mut self, description: impl Into<String>, ttl: Option<Duration>, payload: P) -> EventId {
        let id = EventId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(
            id,
            Entry {
                description: description.into(),
                expiry: ttl.map(|d| Instant::now() + d),
                payload: Some(payload),
            },
        );
        id
    }

    /// List live events as `(id, description)` pairs.
    pub fn list(&self) -> Vec<(EventId, &str)> {
        self.entries
            .iter()
            .map(|(id, e)| (*id, e.description.as_str()))
            .collect()
    }

    pub fn is_expired(&self, id: EventId, now: Instant) -> bool {
        self.entries
            .get(&id)
            .and_then(|e| e.expiry)
            .is_some_and(|expiry| now >= expiry)
    }

    /// Fire `id` with `action`, removing the entry and returning its
    /// payload exactly once. A second call with the same id returns `None`.
    pub fn fire(&mut self, id: EventId, action: Action) -> Option<Firing<P>> {
        let mut entry = self.entries.remove(&id)?;
        let payload = entry.payload.take()?;
        Some(Firing {
            id,
            action,
            payload,
        })
    }

    /// Fire every live event with `action` (the `"*"` wildcard target in
    /// the original API).
    pub fn fire_all(&mut self, action: Action) -> Vec<Firing<P>> {
        let ids: Vec<EventId> = self.entries.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.fire(id, action)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_removes_entry_and_returns_payload_once() {
        let mut queue: EventQueue<&'static str> = EventQueue::new();
        let id = queue.push("muc invite from alice", None, "payload");

        let firing = queue.fire(id, Action::Accept).unwrap();
        assert_eq!(firing.payload, "payload");
        assert!(matches!(firing.action, Action::Accept));

        assert!(queue.fire(id, Action::Accept).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn list_reports_live_descriptions() {
        let mut queue: EventQueue<()> = EventQueue::new();
        queue.push("a", None, ());
        queue.push("b", None, ());
        assert_eq!(queue.len(), 2);
        let descriptions: Vec<&str> = queue.list().into_iter().map(|(_, d)| d).collect();
        assert!(descriptions.contains(&"a"));
        assert!(descriptions.contains(&"b"));
    }

    #[test]
    fn fire_all_drains_every_entry() {
        let mut queue: EventQueue<u32> = EventQueue::new();
        queue.push("a", None, 1);
        queue.push("b", None, 2);
        let firings = queue.fire_all(Action::Cancel);
        assert_eq!(firings.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn expiry_detection() {
        let mut queue: EventQueue<()> = EventQueue::new();
        let id = queue.push("expires fast", Some(Duration::from_secs(0)), ());
        let now = Instant::now() + Duration::from_millis(1);
        assert!(queue.is_expired(id, now));
    }

    #[test]
    fn no_ttl_never_expires() {
        let mut queue: EventQueue<()> = EventQueue::new();
        let id = queue.push("persistent", None, ());
        assert!(!queue.is_expired(id, Instant::now() + Duration::from_secs(3600)));
    }
}
