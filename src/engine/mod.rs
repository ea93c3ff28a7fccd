mod error;
mod mutations;
pub mod occupancy;
pub mod overlap;
mod queries;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use occupancy::{CheckIn, CheckOut, Rejection};
pub use overlap::{conflicts, find_available_spots};

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::info;

use crate::ledger::FineLedger;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::{self, Store};

pub type SharedLot = Arc<RwLock<ParkingLot>>;

/// Lots every fresh deployment starts with.
pub const DEFAULT_LOTS: [(&str, usize); 7] = [
    ("ångströmslaboratoriet", 9),
    ("husargatan", 148),
    ("studenternas", 110),
    ("grimhild", 400),
    ("centralgaraget", 350),
    ("test", 3),
    ("empty", 0),
];

// ── Group-commit store channel ───────────────────────────

/// Full-state changes to persist. `None` leaves that snapshot alone.
pub(super) struct StoreCommit {
    lot: Option<ParkingLot>,
    ledger: Option<FineLedger>,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the store and coalesces commits.
/// 1. Block until the first commit arrives.
/// 2. Drain all immediately available commits (the batch window).
/// 3. Fold them into the latest lot collection and ledger.
/// 4. Write each changed snapshot once.
/// 5. Respond to every sender with the shared result.
async fn store_writer_loop(
    store: Store,
    mut lots: BTreeMap<String, ParkingLot>,
    mut rx: mpsc::Receiver<StoreCommit>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::STORE_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();

        // Folded into a scratch copy; `lots` only advances once the batch is on disk.
        let mut next = None;
        let mut ledger = None;
        let mut waiters = Vec::with_capacity(batch.len());
        for commit in batch {
            if let Some(lot) = commit.lot {
                next.get_or_insert_with(|| lots.clone())
                    .insert(lot.name.clone(), lot);
            }
            if commit.ledger.is_some() {
                ledger = commit.ledger;
            }
            waiters.push(commit.response);
        }

        let result = flush(&store, &lots, next.as_ref(), ledger.as_ref());
        metrics::histogram!(crate::observability::STORE_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        match &result {
            Ok(()) => {
                if let Some(next) = next {
                    lots = next;
                }
            }
            Err(e) => tracing::error!("snapshot write failed: {e}"),
        }

        for tx in waiters {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }
    }
}

/// Write the batch's snapshots. If the lots land but the ledger does not, the
/// previous lots are written back so both files describe the same state.
fn flush(
    store: &Store,
    current: &BTreeMap<String, ParkingLot>,
    next: Option<&BTreeMap<String, ParkingLot>>,
    ledger: Option<&FineLedger>,
) -> io::Result<()> {
    if let Some(next) = next {
        store.save_lots(store::LOTS, &lot_list(next))?;
    }
    if let Some(ledger) = ledger
        && let Err(e) = store.save_ledger(store::LEDGER, ledger)
    {
        if next.is_some()
            && let Err(restore) = store.save_lots(store::LOTS, &lot_list(current))
        {
            tracing::error!("lot snapshot restore failed after ledger write error: {restore}");
        }
        return Err(e);
    }
    Ok(())
}

fn lot_list(lots: &BTreeMap<String, ParkingLot>) -> Vec<ParkingLot> {
    lots.values().cloned().collect()
}

pub struct Engine {
    pub lots: DashMap<String, SharedLot>,
    /// Shared by every lot. Always locked after the lot it is used with.
    pub(super) ledger: Mutex<FineLedger>,
    pub(super) store_tx: mpsc::Sender<StoreCommit>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    /// Load the lot collection and ledger from `store` and start its writer task.
    pub fn new(store: Store, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let loaded = store.load_lots(store::LOTS)?;
        if loaded.is_none() {
            info!("no saved parking lots in {}", store.dir().display());
        }
        let ledger = store.load_ledger(store::LEDGER)?;

        let lots = DashMap::new();
        let mut snapshot = BTreeMap::new();
        for lot in loaded.unwrap_or_default() {
            lots.insert(lot.name.clone(), Arc::new(RwLock::new(lot.clone())));
            snapshot.insert(lot.name.clone(), lot);
        }
        info!("loaded {} parking lots, {} ledger entries", lots.len(), ledger.len());

        let (store_tx, store_rx) = mpsc::channel(4096);
        tokio::spawn(store_writer_loop(store, snapshot, store_rx));

        Ok(Self {
            lots,
            ledger: Mutex::new(ledger),
            store_tx,
            notify,
        })
    }

    /// Persist full lot and/or ledger state via the background writer.
    pub(super) async fn persist(
        &self,
        lot: Option<&ParkingLot>,
        ledger: Option<&FineLedger>,
    ) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.store_tx
            .send(StoreCommit {
                lot: lot.cloned(),
                ledger: ledger.cloned(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StoreError("store writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreError("store writer dropped response".into()))?
            .map_err(|e| EngineError::StoreError(e.to_string()))
    }

    pub fn get_lot(&self, name: &str) -> Option<SharedLot> {
        self.lots.get(name).map(|e| e.value().clone())
    }

    pub(super) fn require_lot(&self, name: &str) -> Result<SharedLot, EngineError> {
        self.get_lot(name)
            .ok_or_else(|| EngineError::LotNotFound(name.to_string()))
    }
}

pub(super) fn check_spot(lot: &ParkingLot, spot: SpotId) -> Result<(), EngineError> {
    match lot.spot(spot) {
        Some(_) => Ok(()),
        None => Err(EngineError::SpotOutOfRange {
            lot: lot.name.clone(),
            spot,
            spots: lot.spot_count(),
        }),
    }
}
