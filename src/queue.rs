use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{PersonId, Reservation};

/// Reservations for one spot, ascending by start-time key.
///
/// Entries with equal keys keep arrival order: a new entry goes after every
/// existing entry whose key is less than or equal to its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationQueue {
    entries: Vec<Reservation>,
}

impl ReservationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reservation: Reservation) {
        let key = reservation.key();
        let pos = self.entries.partition_point(|r| r.key() <= key);
        self.entries.insert(pos, reservation);
    }

    /// Lowest-key entry. Panics on an empty queue; check `is_empty` first.
    pub fn peek_earliest(&self) -> &Reservation {
        self.entries
            .first()
            .expect("peek_earliest on an empty reservation queue")
    }

    /// Remove and return the lowest-key entry. Panics on an empty queue.
    pub fn pop_earliest(&mut self) -> Reservation {
        assert!(
            !self.entries.is_empty(),
            "pop_earliest on an empty reservation queue"
        );
        self.entries.remove(0)
    }

    /// First reservation held by `person`, in queue order.
    pub fn find_by_occupant(&self, person: PersonId) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.person == person)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.entries.iter()
    }

    /// Pop from the front through the first entry held by `person`, discarding
    /// everything before it. An entry whose id is `retain` survives.
    ///
    /// Returns the removed entries, or `None` (queue untouched) when `person`
    /// holds no reservation.
    pub fn drain_through(&mut self, person: PersonId, retain: Option<Ulid>) -> Option<Vec<Reservation>> {
        let idx = self.entries.iter().position(|r| r.person == person)?;
        let mut removed = Vec::with_capacity(idx + 1);
        let mut kept = Vec::new();
        for _ in 0..=idx {
            let r = self.pop_earliest();
            if Some(r.id) == retain {
                kept.push(r);
            } else {
                removed.push(r);
            }
        }
        for r in kept.into_iter().rev() {
            self.entries.insert(0, r);
        }
        Some(removed)
    }
}
