use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::limits::*;
use crate::model::*;
use crate::time::{local_now, Timestamp};

use super::occupancy::{self, CheckIn, CheckOut};
use super::overlap::{conflicts, validate_interval};
use super::{check_spot, Engine, EngineError, DEFAULT_LOTS};

impl Engine {
    pub async fn create_lot(&self, name: &str, spots: usize) -> Result<(), EngineError> {
        if name.is_empty() || name.len() > MAX_LOT_NAME_LEN {
            return Err(EngineError::LimitExceeded("lot name length"));
        }
        if spots > MAX_SPOTS_PER_LOT {
            return Err(EngineError::LimitExceeded("too many spots in lot"));
        }
        if self.lots.len() >= MAX_LOTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many lots"));
        }
        if self.lots.contains_key(name) {
            return Err(EngineError::LotExists(name.to_string()));
        }

        let lot = ParkingLot::new(name, spots);
        self.persist(Some(&lot), None).await?;
        self.lots.insert(name.to_string(), Arc::new(RwLock::new(lot)));
        info!("created lot {name} with {spots} spots");
        Ok(())
    }

    /// Create whichever of the default lots are missing. Returns how many were created.
    pub async fn seed_default_lots(&self) -> Result<usize, EngineError> {
        let mut created = 0;
        for (name, spots) in DEFAULT_LOTS {
            if self.lots.contains_key(name) {
                continue;
            }
            self.create_lot(name, spots).await?;
            created += 1;
        }
        Ok(created)
    }

    /// Reserve `spot` for `person` over `interval`.
    ///
    /// Colliding with an existing reservation is refused with
    /// [`EngineError::Conflict`]; pick spots from `find_available` first.
    pub async fn book(
        &self,
        lot_name: &str,
        spot: SpotId,
        interval: Interval,
        person: PersonId,
    ) -> Result<Reservation, EngineError> {
        validate_interval(&interval)?;
        let lot = self.require_lot(lot_name)?;
        let mut guard = lot.write().await;
        check_spot(&guard, spot)?;
        if guard.spots[spot].reservations.len() >= MAX_RESERVATIONS_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many reservations on spot"));
        }
        if conflicts(&interval, &guard.spots[spot].reservations) {
            return Err(EngineError::Conflict {
                lot: lot_name.to_string(),
                spot,
            });
        }

        let mut next = guard.clone();
        let mut ledger = self.ledger.lock().await;
        let mut next_ledger = ledger.clone();
        let reservation = occupancy::book(&mut next, spot, interval, person, &mut next_ledger);

        self.persist(Some(&next), Some(&next_ledger)).await?;
        *guard = next;
        *ledger = next_ledger;
        drop(ledger);

        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        info!("booked {lot_name}#{spot} for {person}: {} .. {}", interval.start, interval.end);
        self.notify.send(&Event::Booked {
            lot: lot_name.to_string(),
            spot,
            reservation: reservation.clone(),
        });
        Ok(reservation)
    }

    /// Park `person` in `spot` now. `Ok(false)` when the check-in is refused.
    pub async fn check_in(&self, lot_name: &str, spot: SpotId, person: PersonId) -> Result<bool, EngineError> {
        self.check_in_at(lot_name, spot, person, &local_now()).await
    }

    pub async fn check_in_at(
        &self,
        lot_name: &str,
        spot: SpotId,
        person: PersonId,
        now: &Timestamp,
    ) -> Result<bool, EngineError> {
        let lot = self.require_lot(lot_name)?;
        let mut guard = lot.write().await;
        check_spot(&guard, spot)?;

        let mut next = guard.clone();
        let mut ledger = self.ledger.lock().await;
        let mut next_ledger = ledger.clone();
        let outcome = occupancy::check_in(&mut next, spot, person, now, &mut next_ledger);

        if let CheckIn::Rejected(reason) = outcome {
            metrics::counter!(crate::observability::CHECK_INS_TOTAL, "outcome" => "rejected").increment(1);
            debug!("check-in of {person} at {lot_name}#{spot} refused: {reason}");
            return Ok(false);
        }

        self.persist(Some(&next), Some(&next_ledger)).await?;
        *guard = next;
        *ledger = next_ledger;
        drop(ledger);

        if let CheckIn::ParkedAfterEviction { evicted, fine, .. } = &outcome {
            metrics::counter!(crate::observability::EVICTIONS_TOTAL).increment(1);
            warn!("evicted {evicted} from {lot_name}#{spot} for {person}: {}", fine.notice);
            self.notify.send(&Event::Evicted {
                lot: lot_name.to_string(),
                spot,
                person: *evicted,
                notice: fine.notice.clone(),
            });
        }
        metrics::counter!(crate::observability::CHECK_INS_TOTAL, "outcome" => "parked").increment(1);
        info!("{person} checked in at {lot_name}#{spot}");
        self.notify.send(&Event::CheckedIn {
            lot: lot_name.to_string(),
            spot,
            person,
        });
        Ok(true)
    }

    /// Vacate `spot`. `Ok(false)` when `person` is not the one parked there.
    pub async fn check_out(&self, lot_name: &str, spot: SpotId, person: PersonId) -> Result<bool, EngineError> {
        let lot = self.require_lot(lot_name)?;
        let mut guard = lot.write().await;
        check_spot(&guard, spot)?;

        let mut next = guard.clone();
        let released = match occupancy::check_out(&mut next, spot, person) {
            CheckOut::Left { released } => released,
            CheckOut::Rejected(reason) => {
                debug!("check-out of {person} at {lot_name}#{spot} refused: {reason}");
                return Ok(false);
            }
        };

        self.persist(Some(&next), None).await?;
        *guard = next;

        metrics::counter!(crate::observability::CHECK_OUTS_TOTAL).increment(1);
        if released.is_empty() {
            warn!("{person} left {lot_name}#{spot} without a queued reservation");
        } else {
            info!(
                "{person} checked out of {lot_name}#{spot}, released {} reservation(s)",
                released.len()
            );
        }
        self.notify.send(&Event::CheckedOut {
            lot: lot_name.to_string(),
            spot,
            person,
        });
        Ok(true)
    }
}
