//! Bounded per-session priority queue for events that arrive while the
//! client is disconnected.
//!
//! Overflow policy: expired entries go first (lowest priority among
//! them), then the lowest-priority newest entry — which may be the
//! incoming event itself. Drain order is priority descending, FIFO
//! within a priority. Events without an expiry (connection notices)
//! survive every sweep.

use chrono::{DateTime, Duration, Utc};

use i3_domain::Event;

struct Queued {
    event: Event,
    /// Arrival order, monotonic per queue.
    seq: u64,
}

pub struct OfflineQueue {
    capacity: usize,
    ttl: Duration,
    next_seq: u64,
    items: Vec<Queued>,
}

impl OfflineQueue {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            next_seq: 0,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queue one event, applying the queue TTL when the event does not
    /// carry its own expiry. Returns false if the event was dropped.
    pub fn push(&mut self, mut event: Event, now: DateTime<Utc>) -> bool {
        if event.expires_at.is_none() && expirable(&event) {
            event.expires_at = Some(now + self.ttl);
        }
        self.sweep(now);

        if self.items.len() >= self.capacity {
            // Evict the lowest-priority newest entry, unless the incoming
            // event is itself the weakest.
            let victim = self
                .items
                .iter()
                .enumerate()
                .min_by_key(|(_, q)| (q.event.priority, std::cmp::Reverse(q.seq)))
                .map(|(i, _)| i);
            match victim {
                Some(i) if self.items[i].event.priority <= event.priority => {
                    self.items.remove(i);
                }
                _ => return false,
            }
        }

        self.items.push(Queued {
            event,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        true
    }

    /// Remove expired entries.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        self.items.retain(|q| !q.event.is_expired(now));
    }

    /// Take everything, priority descending then FIFO.
    pub fn drain(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        self.sweep(now);
        let mut items = std::mem::take(&mut self.items);
        items.sort_by_key(|q| (std::cmp::Reverse(q.event.priority), q.seq));
        items.into_iter().map(|q| q.event).collect()
    }
}

/// Connection/disconnection notices never expire.
fn expirable(event: &Event) -> bool {
    !matches!(
        event.name.as_str(),
        i3_domain::event::name::MUD_ONLINE | i3_domain::event::name::MUD_OFFLINE
    )
}
