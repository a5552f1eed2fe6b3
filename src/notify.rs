use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    ListingChanged,
    ReservationCreated,
    ReservationConfirmed,
    ReservationCancelled,
}

/// Something that may change the availability of one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub listing_id: Ulid,
    pub kind: ChangeKind,
}

/// Broadcast hub for store changes: one global channel plus one per listing.
pub struct ChangeFeed {
    all: broadcast::Sender<Change>,
    channels: DashMap<Ulid, broadcast::Sender<Change>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            channels: DashMap::new(),
        }
    }

    /// Subscribe to every change.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Change> {
        self.all.subscribe()
    }

    /// Subscribe to changes of one listing. Creates the channel if needed.
    pub fn subscribe(&self, listing_id: Ulid) -> broadcast::Receiver<Change> {
        let sender = self
            .channels
            .entry(listing_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn publish(&self, change: Change) {
        let _ = self.all.send(change);
        if let Some(sender) = self.channels.get(&change.listing_id) {
            let _ = sender.send(change);
        }
    }

    /// Drop a per-listing channel.
    pub fn remove(&self, listing_id: &Ulid) {
        self.channels.remove(listing_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let feed = ChangeFeed::new();
        let lid = Ulid::new();
        let mut rx = feed.subscribe(lid);
        let mut all = feed.subscribe_all();

        let change = Change {
            listing_id: lid,
            kind: ChangeKind::ReservationCreated,
        };
        feed.publish(change);

        assert_eq!(rx.recv().await.unwrap(), change);
        assert_eq!(all.recv().await.unwrap(), change);
    }

    #[tokio::test]
    async fn per_listing_channel_is_scoped() {
        let feed = ChangeFeed::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = feed.subscribe(a);

        feed.publish(Change {
            listing_id: b,
            kind: ChangeKind::ListingChanged,
        });
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let feed = ChangeFeed::new();
        let lid = Ulid::new();
        feed.publish(Change {
            listing_id: lid,
            kind: ChangeKind::ReservationCancelled,
        });
        feed.remove(&lid);
    }
}
