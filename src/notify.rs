use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for lot activity, one channel per lot name.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a lot. Creates the channel if needed.
    pub fn subscribe(&self, lot: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(lot.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event to its lot's channel. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        trace!("{}", event.payload());
        if let Some(sender) = self.channels.get(event.lot()) {
            let _ = sender.send(event.clone());
        }
    }
}
