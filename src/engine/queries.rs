use crate::ledger::LedgerEntry;
use crate::model::*;
use crate::time::{local_now, Timestamp};

use super::overlap::{find_available_spots, validate_interval};
use super::{check_spot, Engine, EngineError, SharedLot};

impl Engine {
    /// Every lot, ordered by name.
    pub async fn list_lots(&self) -> Vec<LotInfo> {
        let shared: Vec<(String, SharedLot)> = self
            .lots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut out = Vec::with_capacity(shared.len());
        for (name, lot) in shared {
            let guard = lot.read().await;
            out.push(LotInfo {
                name,
                spots: guard.spot_count(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// A copy of the lot's current state. `None` if there is no such lot.
    pub async fn lot_snapshot(&self, name: &str) -> Option<ParkingLot> {
        let lot = self.get_lot(name)?;
        let guard = lot.read().await;
        Some(guard.clone())
    }

    /// Spots in `lot_name` free for `interval`, ascending.
    pub async fn find_available(&self, lot_name: &str, interval: &Interval) -> Result<Vec<SpotId>, EngineError> {
        validate_interval(interval)?;
        let lot = self.require_lot(lot_name)?;
        let guard = lot.read().await;
        Ok(find_available_spots(interval, &guard))
    }

    pub async fn spot_statuses(&self, lot_name: &str) -> Result<Vec<SpotInfo>, EngineError> {
        self.spot_statuses_at(lot_name, &local_now()).await
    }

    pub async fn spot_statuses_at(&self, lot_name: &str, now: &Timestamp) -> Result<Vec<SpotInfo>, EngineError> {
        let lot = self.require_lot(lot_name)?;
        let guard = lot.read().await;
        Ok(guard
            .spots
            .iter()
            .enumerate()
            .map(|(i, spot)| SpotInfo {
                spot: i,
                state: spot.state(now),
                occupant: spot.occupant,
            })
            .collect())
    }

    /// The spot's reservation queue in order.
    pub async fn reservations(&self, lot_name: &str, spot: SpotId) -> Result<Vec<ReservationInfo>, EngineError> {
        let lot = self.require_lot(lot_name)?;
        let guard = lot.read().await;
        check_spot(&guard, spot)?;
        Ok(guard.spots[spot]
            .reservations
            .iter()
            .map(|r| ReservationInfo {
                id: r.id,
                spot,
                person: r.person,
                start: r.interval.start,
                end: r.interval.end,
            })
            .collect())
    }

    pub async fn ledger_entry(&self, person: PersonId) -> Option<LedgerEntry> {
        self.ledger.lock().await.lookup(person).cloned()
    }

    /// Occupied spots whose occupant's reservation has ended by `now`.
    /// Lots locked by a writer are skipped until the next pass.
    pub fn collect_overstays(&self, now: &Timestamp) -> Vec<Overstay> {
        let mut found = Vec::new();
        for entry in self.lots.iter() {
            let lot = entry.value().clone();
            let Ok(guard) = lot.try_read() else { continue };
            for (i, spot) in guard.spots.iter().enumerate() {
                let Some(person) = spot.occupant else { continue };
                if let Some(r) = spot.reservations.find_by_occupant(person)
                    && r.interval.has_elapsed(now)
                {
                    found.push(Overstay {
                        lot: guard.name.clone(),
                        spot: i,
                        person,
                        reservation_id: r.id,
                        ended_at: r.interval.end,
                    });
                }
            }
        }
        found
    }
}
