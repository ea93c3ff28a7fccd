use crate::ledger::{FineLedger, FineRecord, HistoryRecord};
use crate::model::*;
use crate::time::Timestamp;

/// Why a check-in or check-out was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AlreadyParked,
    NoReservation,
    OutsideWindow,
    /// The current occupant holds no reservation for the spot.
    OccupantWithoutReservation,
    NotOccupant,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rejection::AlreadyParked => "already parked in this spot",
            Rejection::NoReservation => "no reservation for this spot",
            Rejection::OutsideWindow => "outside the reservation window",
            Rejection::OccupantWithoutReservation => "current occupant has no reservation",
            Rejection::NotOccupant => "not parked in this spot",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckIn {
    Parked {
        reservation: Reservation,
    },
    /// Someone else was still parked; they were fined and checked out first.
    ParkedAfterEviction {
        reservation: Reservation,
        evicted: PersonId,
        fine: FineRecord,
    },
    Rejected(Rejection),
}

impl CheckIn {
    pub fn is_success(&self) -> bool {
        !matches!(self, CheckIn::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOut {
    /// Reservations popped from the front of the queue, the departing one last.
    /// Empty when the occupant had no reservation left on the spot.
    Left { released: Vec<Reservation> },
    Rejected(Rejection),
}

impl CheckOut {
    pub fn is_success(&self) -> bool {
        matches!(self, CheckOut::Left { .. })
    }
}

/// Queue a reservation and write its history record.
///
/// Does not check for collisions; callers pick `spot` from
/// `find_available_spots` or accept overlapping bookings.
pub fn book(
    lot: &mut ParkingLot,
    spot: SpotId,
    interval: Interval,
    person: PersonId,
    ledger: &mut FineLedger,
) -> Reservation {
    let reservation = Reservation::new(person, interval);
    lot.spots[spot].reservations.insert(reservation.clone());
    ledger.record_history(person, HistoryRecord::new(&lot.name, spot, interval));
    reservation
}

pub fn check_in(
    lot: &mut ParkingLot,
    spot: SpotId,
    person: PersonId,
    now: &Timestamp,
    ledger: &mut FineLedger,
) -> CheckIn {
    let lot_name = lot.name.clone();
    let target = &mut lot.spots[spot];

    if target.occupant == Some(person) {
        return CheckIn::Rejected(Rejection::AlreadyParked);
    }

    let Some(reservation) = target.reservations.find_by_occupant(person).cloned() else {
        return CheckIn::Rejected(Rejection::NoReservation);
    };
    if !reservation.interval.is_current(now) {
        return CheckIn::Rejected(Rejection::OutsideWindow);
    }

    let mut eviction = None;
    if let Some(ousted) = target.occupant {
        let Some(ousted_res) = target.reservations.find_by_occupant(ousted) else {
            return CheckIn::Rejected(Rejection::OccupantWithoutReservation);
        };
        let record = HistoryRecord::new(&lot_name, spot, ousted_res.interval);
        let fine = FineRecord::new(record.clone());
        ledger.record_history(ousted, record);
        ledger.issue_fine(ousted, fine.clone());

        // Forced checkout. The incoming holder's reservation is never consumed.
        target.occupant = None;
        target.reservations.drain_through(ousted, Some(reservation.id));
        eviction = Some((ousted, fine));
    }

    target.occupant = Some(person);
    ledger.record_history(person, HistoryRecord::new(&lot_name, spot, reservation.interval));

    match eviction {
        Some((evicted, fine)) => CheckIn::ParkedAfterEviction {
            reservation,
            evicted,
            fine,
        },
        None => CheckIn::Parked { reservation },
    }
}

/// Vacate `spot`. Pops the queue through the departing person's first
/// reservation; with no such reservation the queue is left as is.
pub fn check_out(lot: &mut ParkingLot, spot: SpotId, person: PersonId) -> CheckOut {
    let target = &mut lot.spots[spot];
    if target.occupant != Some(person) {
        return CheckOut::Rejected(Rejection::NotOccupant);
    }
    target.occupant = None;
    let released = target
        .reservations
        .drain_through(person, None)
        .unwrap_or_default();
    CheckOut::Left { released }
}
