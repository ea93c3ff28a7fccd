use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::Event;
use crate::time::{local_now, Timestamp};

pub const WATCH_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that announces occupants whose parking time is over.
/// It never changes lot state; the next holder's check-in does the eviction.
pub async fn run_watcher(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(WATCH_INTERVAL);
    let mut announced = HashSet::new();
    loop {
        interval.tick().await;
        sweep(&engine, &local_now(), &mut announced);
    }
}

/// One pass: publish `Overstayed` for every overstay not announced yet.
/// Returns how many were published.
pub fn sweep(engine: &Engine, now: &Timestamp, announced: &mut HashSet<Ulid>) -> usize {
    let current = engine.collect_overstays(now);
    let mut published = 0;
    for overstay in &current {
        if !announced.insert(overstay.reservation_id) {
            continue;
        }
        warn!(
            "parking time is over for {} at {}#{} (ended {})",
            overstay.person, overstay.lot, overstay.spot, overstay.ended_at
        );
        metrics::counter!(crate::observability::OVERSTAYS_TOTAL).increment(1);
        engine.notify.send(&Event::Overstayed {
            lot: overstay.lot.clone(),
            spot: overstay.spot,
            person: overstay.person,
            ended_at: overstay.ended_at,
        });
        published += 1;
    }
    // Forget reservations that are no longer overstaying so the set stays bounded.
    announced.retain(|id| current.iter().any(|o| o.reservation_id == *id));
    published
}
