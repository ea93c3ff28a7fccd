use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::queue::ReservationQueue;
use crate::time::{plus_buffer, TimeKey, Timestamp};

/// Personal identity number, e.g. `200405601111`.
pub type PersonId = u64;

/// Index of a spot within its lot, `0..spots.len()`.
pub type SpotId = usize;

/// Closed booking window `[start, end]`. `start == end` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn start_key(&self) -> TimeKey {
        TimeKey::of(&self.start)
    }

    /// Key of the end plus the 15-minute buffer.
    pub fn buffered_end_key(&self) -> TimeKey {
        TimeKey::of(&plus_buffer(&self.end))
    }

    /// `start <= now < end` at minute granularity. The end is exclusive.
    pub fn is_current(&self, now: &Timestamp) -> bool {
        let now = TimeKey::of(now);
        self.start_key() <= now && now < TimeKey::of(&self.end)
    }

    /// True once the window has closed (`now >= end`).
    pub fn has_elapsed(&self, now: &Timestamp) -> bool {
        TimeKey::of(now) >= TimeKey::of(&self.end)
    }
}

/// A claim on one spot for one interval. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub person: PersonId,
    pub interval: Interval,
}

impl Reservation {
    pub fn new(person: PersonId, interval: Interval) -> Self {
        Self {
            id: Ulid::new(),
            person,
            interval,
        }
    }

    pub fn key(&self) -> TimeKey {
        self.interval.start_key()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpotState {
    Free,
    /// Some reservation covers "now" but nobody is parked.
    ReservedNotPresent,
    Occupied,
}

impl SpotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotState::Free => "free",
            SpotState::ReservedNotPresent => "reserved",
            SpotState::Occupied => "occupied",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    pub occupant: Option<PersonId>,
    pub reservations: ReservationQueue,
}

impl Spot {
    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    pub fn state(&self, now: &Timestamp) -> SpotState {
        if self.is_occupied() {
            SpotState::Occupied
        } else if self.reservations.iter().any(|r| r.interval.is_current(now)) {
            SpotState::ReservedNotPresent
        } else {
            SpotState::Free
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingLot {
    pub name: String,
    pub spots: Vec<Spot>,
}

impl ParkingLot {
    /// A lot where every spot is free and has an empty reservation queue.
    pub fn new(name: impl Into<String>, spot_count: usize) -> Self {
        Self {
            name: name.into(),
            spots: vec![Spot::default(); spot_count],
        }
    }

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn spot(&self, spot: SpotId) -> Option<&Spot> {
        self.spots.get(spot)
    }
}

/// Activity on a lot, broadcast to subscribers of that lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Booked {
        lot: String,
        spot: SpotId,
        reservation: Reservation,
    },
    CheckedIn {
        lot: String,
        spot: SpotId,
        person: PersonId,
    },
    Evicted {
        lot: String,
        spot: SpotId,
        person: PersonId,
        notice: String,
    },
    CheckedOut {
        lot: String,
        spot: SpotId,
        person: PersonId,
    },
    Overstayed {
        lot: String,
        spot: SpotId,
        person: PersonId,
        ended_at: Timestamp,
    },
}

impl Event {
    pub fn lot(&self) -> &str {
        match self {
            Event::Booked { lot, .. }
            | Event::CheckedIn { lot, .. }
            | Event::Evicted { lot, .. }
            | Event::CheckedOut { lot, .. }
            | Event::Overstayed { lot, .. } => lot,
        }
    }

    /// JSON payload for log lines and external consumers.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotInfo {
    pub name: String,
    pub spots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotInfo {
    pub spot: SpotId,
    pub state: SpotState,
    pub occupant: Option<PersonId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub spot: SpotId,
    pub person: PersonId,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// An occupied spot whose occupant's reservation has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overstay {
    pub lot: String,
    pub spot: SpotId,
    pub person: PersonId,
    pub reservation_id: Ulid,
    pub ended_at: Timestamp,
}
