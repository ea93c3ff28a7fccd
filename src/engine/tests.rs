use super::*;
use crate::ledger::{Fines, HistoryRecord};
use crate::limits::*;
use crate::time::ts;

use std::path::PathBuf;

const A: PersonId = 200405601111;
const B: PersonId = 198807062222;
const C: PersonId = 196617183333;

fn iv(start: &str, end: &str) -> Interval {
    Interval::new(ts(start), ts(end))
}

fn test_store_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("parkbuddy_test_engine").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn new_engine(name: &str) -> Engine {
    let store = Store::open(&test_store_dir(name)).unwrap();
    Engine::new(store, Arc::new(NotifyHub::new())).unwrap()
}

/// Engine over an existing directory (no wipe), for reload tests.
fn reopen(name: &str) -> Engine {
    let dir = std::env::temp_dir().join("parkbuddy_test_engine").join(name);
    let store = Store::open(&dir).unwrap();
    Engine::new(store, Arc::new(NotifyHub::new())).unwrap()
}

async fn queued(engine: &Engine, lot: &str, spot: SpotId) -> Vec<PersonId> {
    engine
        .reservations(lot, spot)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.person)
        .collect()
}

async fn occupant(engine: &Engine, lot: &str, spot: SpotId) -> Option<PersonId> {
    engine.spot_statuses(lot).await.unwrap()[spot].occupant
}

// ── Lots ─────────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_lots() {
    let engine = new_engine("create_list");
    engine.create_lot("grimhild", 400).await.unwrap();
    engine.create_lot("empty", 0).await.unwrap();

    let lots = engine.list_lots().await;
    assert_eq!(
        lots,
        vec![
            LotInfo {
                name: "empty".into(),
                spots: 0
            },
            LotInfo {
                name: "grimhild".into(),
                spots: 400
            },
        ]
    );
    let snapshot = engine.lot_snapshot("grimhild").await.unwrap();
    assert_eq!(snapshot.spot_count(), 400);
    assert!(snapshot.spots.iter().all(|s| s.occupant.is_none() && s.reservations.is_empty()));
}

#[tokio::test]
async fn duplicate_lot_rejected() {
    let engine = new_engine("dup_lot");
    engine.create_lot("test", 3).await.unwrap();
    let result = engine.create_lot("test", 5).await;
    assert!(matches!(result, Err(EngineError::LotExists(name)) if name == "test"));
}

#[tokio::test]
async fn lot_limits_enforced() {
    let engine = new_engine("lot_limits");
    assert!(matches!(
        engine.create_lot("", 1).await,
        Err(EngineError::LimitExceeded(_))
    ));
    let long = "x".repeat(MAX_LOT_NAME_LEN + 1);
    assert!(matches!(
        engine.create_lot(&long, 1).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.create_lot("huge", MAX_SPOTS_PER_LOT + 1).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn seed_default_lots_is_idempotent() {
    let engine = new_engine("seed");
    assert_eq!(engine.seed_default_lots().await.unwrap(), DEFAULT_LOTS.len());
    assert_eq!(engine.seed_default_lots().await.unwrap(), 0);

    let lots = engine.list_lots().await;
    assert_eq!(lots.len(), 7);
    let spots = |name: &str| lots.iter().find(|l| l.name == name).map(|l| l.spots);
    assert_eq!(spots("ångströmslaboratoriet"), Some(9));
    assert_eq!(spots("husargatan"), Some(148));
    assert_eq!(spots("studenternas"), Some(110));
    assert_eq!(spots("grimhild"), Some(400));
    assert_eq!(spots("centralgaraget"), Some(350));
    assert_eq!(spots("test"), Some(3));
    assert_eq!(spots("empty"), Some(0));
}

#[tokio::test]
async fn missing_lot_is_absent_not_error() {
    let engine = new_engine("missing_lot");
    assert!(engine.get_lot("nowhere").is_none());
    assert!(engine.lot_snapshot("nowhere").await.is_none());

    let interval = iv("2024-03-01 10:00", "2024-03-01 12:00");
    assert!(matches!(
        engine.find_available("nowhere", &interval).await,
        Err(EngineError::LotNotFound(_))
    ));
    assert!(matches!(
        engine.book("nowhere", 0, interval, A).await,
        Err(EngineError::LotNotFound(_))
    ));
    assert!(matches!(
        engine.check_in("nowhere", 0, A).await,
        Err(EngineError::LotNotFound(_))
    ));
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn book_then_find_available() {
    let engine = new_engine("book_available");
    engine.create_lot("test", 3).await.unwrap();

    let interval = iv("2024-03-01 10:00", "2024-03-01 12:00");
    assert_eq!(engine.find_available("test", &interval).await.unwrap(), vec![0, 1, 2]);

    let r = engine.book("test", 0, interval, A).await.unwrap();
    assert_eq!(r.person, A);
    assert_eq!(r.interval, interval);
    assert_eq!(engine.find_available("test", &interval).await.unwrap(), vec![1, 2]);

    let queue = engine.reservations("test", 0).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, r.id);
}

#[tokio::test]
async fn empty_lot_has_nothing_available() {
    let engine = new_engine("empty_lot");
    engine.create_lot("empty", 0).await.unwrap();
    let interval = iv("2024-03-01 10:00", "2024-03-01 12:00");
    assert!(engine.find_available("empty", &interval).await.unwrap().is_empty());
}

#[tokio::test]
async fn booking_within_buffer_conflicts() {
    let engine = new_engine("buffer_conflict");
    engine.create_lot("test", 1).await.unwrap();
    engine
        .book("test", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();

    // Starts inside the 15 minute buffer after A.
    let result = engine
        .book("test", 0, iv("2024-03-01 12:10", "2024-03-01 13:00"), B)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict { spot: 0, .. })));

    // Clear of the buffer.
    engine
        .book("test", 0, iv("2024-03-01 12:16", "2024-03-01 13:00"), B)
        .await
        .unwrap();
    assert_eq!(queued(&engine, "test", 0).await, vec![A, B]);
}

#[tokio::test]
async fn bookings_queue_by_start_time() {
    let engine = new_engine("queue_order");
    engine.create_lot("test", 1).await.unwrap();
    engine
        .book("test", 0, iv("2024-03-03 10:00", "2024-03-03 12:00"), B)
        .await
        .unwrap();
    engine
        .book("test", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();
    engine
        .book("test", 0, iv("2024-03-05 10:00", "2024-03-05 12:00"), C)
        .await
        .unwrap();
    assert_eq!(queued(&engine, "test", 0).await, vec![A, B, C]);
}

#[tokio::test]
async fn book_rejects_bad_input() {
    let engine = new_engine("book_bad_input");
    engine.create_lot("test", 3).await.unwrap();

    let reversed = iv("2024-03-01 12:00", "2024-03-01 10:00");
    assert!(matches!(
        engine.book("test", 0, reversed, A).await,
        Err(EngineError::InvalidInterval(_))
    ));
    let interval = iv("2024-03-01 10:00", "2024-03-01 12:00");
    assert!(matches!(
        engine.book("test", 3, interval, A).await,
        Err(EngineError::SpotOutOfRange { spot: 3, spots: 3, .. })
    ));
    assert!(queued(&engine, "test", 0).await.is_empty());
}

#[tokio::test]
async fn zero_length_booking_never_checks_in() {
    let engine = new_engine("zero_length");
    engine.create_lot("test", 1).await.unwrap();
    let instant = iv("2024-03-01 10:00", "2024-03-01 10:00");
    engine.book("test", 0, instant, A).await.unwrap();
    assert!(!engine
        .check_in_at("test", 0, A, &ts("2024-03-01 10:00"))
        .await
        .unwrap());
}

#[tokio::test]
async fn booking_writes_history() {
    let engine = new_engine("book_history");
    engine.create_lot("test", 3).await.unwrap();
    let interval = iv("2024-03-01 10:00", "2024-03-01 12:00");
    engine.book("test", 2, interval, A).await.unwrap();

    let entry = engine.ledger_entry(A).await.unwrap();
    assert_eq!(entry.history, vec![HistoryRecord::new("test", 2, interval)]);
    assert_eq!(entry.fines, Fines::Absent);
    assert!(engine.ledger_entry(B).await.is_none());
}

// ── Check-in / check-out ─────────────────────────────────

#[tokio::test]
async fn check_in_and_out_round_trip() {
    let engine = new_engine("round_trip");
    engine.create_lot("test", 3).await.unwrap();
    let interval = iv("2024-03-01 10:00", "2024-03-01 12:00");
    engine.book("test", 1, interval, A).await.unwrap();

    assert!(engine
        .check_in_at("test", 1, A, &ts("2024-03-01 10:30"))
        .await
        .unwrap());
    assert_eq!(occupant(&engine, "test", 1).await, Some(A));

    let statuses = engine
        .spot_statuses_at("test", &ts("2024-03-01 10:30"))
        .await
        .unwrap();
    assert_eq!(statuses[0].state, SpotState::Free);
    assert_eq!(statuses[1].state, SpotState::Occupied);

    assert!(engine.check_out("test", 1, A).await.unwrap());
    assert_eq!(occupant(&engine, "test", 1).await, None);
    assert!(queued(&engine, "test", 1).await.is_empty());
    assert_eq!(engine.ledger_entry(A).await.unwrap().history.len(), 2);
}

#[tokio::test]
async fn second_check_in_is_refused() {
    let engine = new_engine("double_check_in");
    engine.create_lot("test", 1).await.unwrap();
    engine
        .book("test", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();
    let now = ts("2024-03-01 10:05");
    assert!(engine.check_in_at("test", 0, A, &now).await.unwrap());
    let history_before = engine.ledger_entry(A).await.unwrap().history.len();

    assert!(!engine.check_in_at("test", 0, A, &now).await.unwrap());
    assert_eq!(occupant(&engine, "test", 0).await, Some(A));
    assert_eq!(engine.ledger_entry(A).await.unwrap().history.len(), history_before);
}

#[tokio::test]
async fn check_in_outside_window_refused() {
    let engine = new_engine("outside_window");
    engine.create_lot("test", 1).await.unwrap();
    engine
        .book("test", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();

    assert!(!engine
        .check_in_at("test", 0, A, &ts("2024-03-01 09:59"))
        .await
        .unwrap());
    // End is exclusive.
    assert!(!engine
        .check_in_at("test", 0, A, &ts("2024-03-01 12:00"))
        .await
        .unwrap());
    assert_eq!(occupant(&engine, "test", 0).await, None);
    let early = engine
        .spot_statuses_at("test", &ts("2024-03-01 09:59"))
        .await
        .unwrap();
    assert_eq!(early[0].state, SpotState::Free);
    let during = engine
        .spot_statuses_at("test", &ts("2024-03-01 10:30"))
        .await
        .unwrap();
    assert_eq!(during[0].state, SpotState::ReservedNotPresent);
}

#[tokio::test]
async fn check_in_without_reservation_refused() {
    let engine = new_engine("no_reservation");
    engine.create_lot("test", 1).await.unwrap();
    engine
        .book("test", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();
    assert!(!engine
        .check_in_at("test", 0, B, &ts("2024-03-01 10:30"))
        .await
        .unwrap());
    assert!(engine.ledger_entry(B).await.is_none());
}

#[tokio::test]
async fn check_in_out_of_range_spot_errors() {
    let engine = new_engine("check_in_range");
    engine.create_lot("test", 3).await.unwrap();
    assert!(matches!(
        engine.check_in("test", 7, A).await,
        Err(EngineError::SpotOutOfRange { spot: 7, .. })
    ));
    assert!(matches!(
        engine.check_out("test", 7, A).await,
        Err(EngineError::SpotOutOfRange { spot: 7, .. })
    ));
}

#[tokio::test]
async fn eviction_fines_previous_occupant() {
    let engine = new_engine("eviction");
    engine.create_lot("test", 1).await.unwrap();
    let first = iv("2024-03-01 10:00", "2024-03-01 12:00");
    let second = iv("2024-03-01 12:30", "2024-03-01 14:00");
    engine.book("test", 0, first, A).await.unwrap();
    let b_res = engine.book("test", 0, second, B).await.unwrap();

    let mut rx = engine.notify.subscribe("test");

    assert!(engine
        .check_in_at("test", 0, A, &ts("2024-03-01 10:00"))
        .await
        .unwrap());
    // A never left; B arrives for their own window.
    assert!(engine
        .check_in_at("test", 0, B, &ts("2024-03-01 12:40"))
        .await
        .unwrap());

    assert_eq!(occupant(&engine, "test", 0).await, Some(B));
    let queue = engine.reservations("test", 0).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, b_res.id);

    let a_entry = engine.ledger_entry(A).await.unwrap();
    assert_eq!(a_entry.fines.len(), 1);
    let fine = &a_entry.fines.as_slice()[0];
    assert_eq!(fine.notice, "You have a 500kr fine from parking at test.");
    assert_eq!(fine.info, HistoryRecord::new("test", 0, first));
    // booking, check-in, eviction
    assert_eq!(a_entry.history.len(), 3);

    let b_entry = engine.ledger_entry(B).await.unwrap();
    assert_eq!(b_entry.fines, Fines::Absent);
    assert_eq!(b_entry.history.last(), Some(&HistoryRecord::new("test", 0, second)));

    assert!(matches!(rx.recv().await.unwrap(), Event::CheckedIn { person: A, .. }));
    match rx.recv().await.unwrap() {
        Event::Evicted { person, notice, .. } => {
            assert_eq!(person, A);
            assert!(notice.contains("500kr"));
        }
        other => panic!("expected Evicted, got {other:?}"),
    }
    assert!(matches!(rx.recv().await.unwrap(), Event::CheckedIn { person: B, .. }));
}

#[tokio::test]
async fn check_out_by_non_occupant_refused() {
    let engine = new_engine("checkout_non_occupant");
    engine.create_lot("test", 1).await.unwrap();
    engine
        .book("test", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();
    engine
        .check_in_at("test", 0, A, &ts("2024-03-01 10:00"))
        .await
        .unwrap();

    assert!(!engine.check_out("test", 0, B).await.unwrap());
    assert_eq!(occupant(&engine, "test", 0).await, Some(A));
    assert_eq!(queued(&engine, "test", 0).await, vec![A]);
}

#[tokio::test]
async fn check_out_drains_through_own_reservation() {
    let engine = new_engine("checkout_drain");
    engine.create_lot("test", 1).await.unwrap();
    engine
        .book("test", 0, iv("2024-03-01 08:00", "2024-03-01 09:00"), C)
        .await
        .unwrap();
    engine
        .book("test", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();
    engine
        .book("test", 0, iv("2024-03-01 14:00", "2024-03-01 16:00"), B)
        .await
        .unwrap();

    engine
        .check_in_at("test", 0, A, &ts("2024-03-01 10:15"))
        .await
        .unwrap();
    assert!(engine.check_out("test", 0, A).await.unwrap());
    // C's stale reservation ahead of A is released along with A's.
    assert_eq!(queued(&engine, "test", 0).await, vec![B]);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn state_survives_reload() {
    let name = "reload";
    {
        let engine = new_engine(name);
        engine.create_lot("test", 3).await.unwrap();
        engine
            .book("test", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
            .await
            .unwrap();
        engine
            .book("test", 0, iv("2024-03-01 12:30", "2024-03-01 14:00"), B)
            .await
            .unwrap();
        engine
            .check_in_at("test", 0, A, &ts("2024-03-01 10:00"))
            .await
            .unwrap();
        engine
            .check_in_at("test", 0, B, &ts("2024-03-01 12:30"))
            .await
            .unwrap();
    }

    let engine = reopen(name);
    assert_eq!(engine.list_lots().await.len(), 1);
    assert_eq!(occupant(&engine, "test", 0).await, Some(B));
    assert_eq!(queued(&engine, "test", 0).await, vec![B]);
    assert_eq!(engine.ledger_entry(A).await.unwrap().fines.len(), 1);
}

#[tokio::test]
async fn refused_check_in_does_not_persist() {
    let name = "refused_persist";
    {
        let engine = new_engine(name);
        engine.create_lot("test", 1).await.unwrap();
        assert!(!engine
            .check_in_at("test", 0, A, &ts("2024-03-01 10:00"))
            .await
            .unwrap());
    }
    let engine = reopen(name);
    assert_eq!(occupant(&engine, "test", 0).await, None);
    assert!(engine.ledger_entry(A).await.is_none());
}

/// A directory squatting on a snapshot's tmp path makes that write fail.
fn block_snapshot(name: &str, store_id: &str) -> PathBuf {
    let path = std::env::temp_dir()
        .join("parkbuddy_test_engine")
        .join(name)
        .join(format!("{store_id}.snap.tmp"));
    std::fs::create_dir_all(&path).unwrap();
    path
}

#[tokio::test]
async fn failed_lot_write_is_not_persisted_later() {
    let name = "failed_lot_write";
    {
        let engine = new_engine(name);
        engine.create_lot("a", 1).await.unwrap();
        engine.create_lot("b", 1).await.unwrap();

        let blocked = block_snapshot(name, crate::store::LOTS);
        let result = engine
            .book("a", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
            .await;
        assert!(matches!(result, Err(EngineError::StoreError(_))));
        assert!(queued(&engine, "a", 0).await.is_empty());
        std::fs::remove_dir(&blocked).unwrap();

        engine
            .book("b", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), B)
            .await
            .unwrap();
    }

    let engine = reopen(name);
    assert!(queued(&engine, "a", 0).await.is_empty());
    assert_eq!(queued(&engine, "b", 0).await, vec![B]);
    assert!(engine.ledger_entry(A).await.is_none());
}

#[tokio::test]
async fn failed_ledger_write_rolls_back_lots() {
    let name = "failed_ledger_write";
    {
        let engine = new_engine(name);
        engine.create_lot("a", 1).await.unwrap();

        let blocked = block_snapshot(name, crate::store::LEDGER);
        let result = engine
            .book("a", 0, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
            .await;
        assert!(matches!(result, Err(EngineError::StoreError(_))));
        assert!(queued(&engine, "a", 0).await.is_empty());
        std::fs::remove_dir(&blocked).unwrap();
    }

    // The lot snapshot was written before the ledger failed; it must not keep the booking.
    let engine = reopen(name);
    assert_eq!(engine.list_lots().await.len(), 1);
    assert!(queued(&engine, "a", 0).await.is_empty());
    assert!(engine.ledger_entry(A).await.is_none());
}

#[tokio::test]
async fn concurrent_bookings_on_one_spot_admit_one() {
    let engine = Arc::new(new_engine("concurrent"));
    engine.create_lot("test", 1).await.unwrap();
    let interval = iv("2024-03-01 10:00", "2024-03-01 12:00");

    let mut handles = Vec::new();
    for person in 0..16u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.book("test", 0, interval, person).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.reservations("test", 0).await.unwrap().len(), 1);
}

// ── Notifications and overstays ──────────────────────────

#[tokio::test]
async fn booking_notifies_lot_subscribers() {
    let engine = new_engine("notify_book");
    engine.create_lot("test", 3).await.unwrap();
    engine.create_lot("grimhild", 3).await.unwrap();
    let mut rx = engine.notify.subscribe("test");
    let mut other = engine.notify.subscribe("grimhild");

    let r = engine
        .book("test", 2, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Event::Booked { lot, spot, reservation } => {
            assert_eq!(lot, "test");
            assert_eq!(spot, 2);
            assert_eq!(reservation, r);
        }
        other => panic!("expected Booked, got {other:?}"),
    }
    assert!(other.try_recv().is_err());
}

#[tokio::test]
async fn overstays_listed_after_window_ends() {
    let engine = new_engine("overstays");
    engine.create_lot("test", 3).await.unwrap();
    let r = engine
        .book("test", 1, iv("2024-03-01 10:00", "2024-03-01 12:00"), A)
        .await
        .unwrap();
    engine
        .check_in_at("test", 1, A, &ts("2024-03-01 10:00"))
        .await
        .unwrap();

    assert!(engine.collect_overstays(&ts("2024-03-01 11:59")).is_empty());
    let found = engine.collect_overstays(&ts("2024-03-01 12:00"));
    assert_eq!(
        found,
        vec![Overstay {
            lot: "test".into(),
            spot: 1,
            person: A,
            reservation_id: r.id,
            ended_at: ts("2024-03-01 12:00"),
        }]
    );

    engine.check_out("test", 1, A).await.unwrap();
    assert!(engine.collect_overstays(&ts("2024-03-01 13:00")).is_empty());
}
