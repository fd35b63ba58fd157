use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::types::PlaybackKey;

/// Session lifecycle notifications for UI collaborators (download HUD,
/// "now playing" overlay).
#[derive(Debug, Clone)]
pub enum Event {
    DownloadStarted { key: PlaybackKey, name: String },
    DownloadProgress { key: PlaybackKey, current: u64, total: u64 },
    DownloadFailed { key: PlaybackKey },
    PlaybackStarted { key: PlaybackKey, name: String },
    PlaybackStopped { key: PlaybackKey },
    PlaybackFailed { key: PlaybackKey, message: String },
}

/// Subscriber ID for tracking subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

struct Subscriber {
    id: SubscriberId,
    sender: Sender<Event>,
}

/// Event bus for broadcasting session events to subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<RwLock<usize>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events, returns a receiver and subscription ID
    pub fn subscribe(&self) -> (Receiver<Event>, SubscriberId) {
        let (tx, rx) = unbounded();

        let mut next_id = self.next_id.write();
        let id = SubscriberId(*next_id);
        *next_id += 1;
        drop(next_id);

        self.subscribers.write().push(Subscriber { id, sender: tx });

        (rx, id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    /// Publish an event to all subscribers (non-blocking; closed
    /// subscriber channels are skipped).
    pub fn publish(&self, event: Event) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            let _ = subscriber.sender.try_send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
