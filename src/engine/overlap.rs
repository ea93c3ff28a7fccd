use chrono::Datelike;

use crate::limits::*;
use crate::model::*;
use crate::queue::ReservationQueue;

use super::EngineError;

pub(crate) fn validate_interval(interval: &Interval) -> Result<(), EngineError> {
    if interval.end < interval.start {
        return Err(EngineError::InvalidInterval(*interval));
    }
    let in_range = |year: i32| (MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&year);
    if !in_range(interval.start.year()) || !in_range(interval.end.year()) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Does `requested` collide with any reservation in `queue`?
///
/// Both ends are widened by the 15-minute buffer. The scan relies on the
/// queue being sorted by start key: once the request ends before an entry
/// starts, no later entry can collide either.
pub fn conflicts(requested: &Interval, queue: &ReservationQueue) -> bool {
    let req_start = requested.start_key();
    let req_end = requested.buffered_end_key();

    for reservation in queue.iter() {
        let res_start = reservation.interval.start_key();
        let res_end = reservation.interval.buffered_end_key();

        if req_end < res_start {
            return false;
        } else if req_start > res_end {
            continue;
        } else {
            return true;
        }
    }
    false
}

/// Indices of every spot in `lot` that `interval` does not collide with, ascending.
pub fn find_available_spots(interval: &Interval, lot: &ParkingLot) -> Vec<SpotId> {
    lot.spots
        .iter()
        .enumerate()
        .filter(|(_, spot)| !conflicts(interval, &spot.reservations))
        .map(|(i, _)| i)
        .collect()
}
