use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::ChangeFeed;
use crate::wal::Wal;

use super::{InMemoryStore, ListingStore, ReservationStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Stats {
        response: oneshot::Sender<WalStats>,
    },
}

/// Writer-side counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalStats {
    pub appends_since_compact: u64,
    /// Group commits (one fsync each) since the store was opened.
    pub flushes: u64,
}

/// Background task that owns the WAL and batches appends for group commit:
/// take one append, drain whatever else is queued, fsync once, answer all.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut flushes = 0u64;
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, flushes, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        flushes += 1;
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, flushes, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, flushes: u64, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::Stats { response } => {
            let _ = response.send(WalStats {
                appends_since_compact: wal.appends_since_compact(),
                flushes,
            });
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

fn unavailable(msg: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(msg.to_string())
}

/// Durable store: an `InMemoryStore` whose every write is first committed to a WAL.
pub struct WalStore {
    inner: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Serialises validate → append → apply per listing. Entries live only while held.
    listing_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    /// Writes hold it shared, compaction exclusive.
    compaction_gate: RwLock<()>,
    compact_threshold: u64,
}

impl WalStore {
    /// Replay the WAL at `path` and start its writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path, compact_threshold: u64) -> io::Result<Self> {
        Self::open_with_feed(path, compact_threshold, Arc::new(ChangeFeed::new()))
    }

    pub fn open_with_feed(
        path: &Path,
        compact_threshold: u64,
        feed: Arc<ChangeFeed>,
    ) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let inner = InMemoryStore::with_feed(feed);
        for event in &events {
            inner.apply_event(event);
        }
        info!(
            "opened store {} ({} events, {} listings, {} reservations)",
            path.display(),
            events.len(),
            inner.listing_count(),
            inner.reservation_count()
        );

        Ok(Self {
            inner,
            wal_tx,
            listing_locks: DashMap::new(),
            compaction_gate: RwLock::new(()),
            compact_threshold,
        })
    }

    pub fn feed(&self) -> Arc<ChangeFeed> {
        self.inner.feed()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| unavailable("WAL writer shut down"))?;
        rx.await
            .map_err(|_| unavailable("WAL writer dropped response"))?
            .map_err(unavailable)
    }

    /// Counters kept by the writer task.
    pub async fn stats(&self) -> Result<WalStats, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Stats { response: tx })
            .await
            .map_err(|_| unavailable("WAL writer shut down"))?;
        rx.await.map_err(|_| unavailable("WAL writer dropped response"))
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.write().await;
        self.compact_locked().await
    }

    async fn compact_locked(&self) -> Result<(), StoreError> {
        let events = self.inner.snapshot_events();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| unavailable("WAL writer shut down"))?;
        rx.await
            .map_err(|_| unavailable("WAL writer dropped response"))?
            .map_err(unavailable)?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    async fn compact_if_due(&self) {
        if self.compact_threshold == 0 {
            return;
        }
        match self.stats().await {
            Ok(stats) if stats.appends_since_compact >= self.compact_threshold => {}
            Ok(_) => return,
            Err(e) => {
                warn!("WAL stats unavailable: {e}");
                return;
            }
        }
        let _gate = self.compaction_gate.write().await;
        // Another writer may have compacted while we waited.
        if let Ok(stats) = self.stats().await
            && stats.appends_since_compact < self.compact_threshold
        {
            return;
        }
        if let Err(e) = self.compact_locked().await {
            // The write itself is durable; compaction retries on the next write.
            warn!("WAL compaction failed: {e}");
        }
    }

    /// Validate with `plan`, commit its event, apply it. Writes to different
    /// listings proceed concurrently, so their appends share a flush.
    async fn write<T: Send>(
        &self,
        listing_id: Ulid,
        plan: impl FnOnce() -> Result<(Event, T), StoreError> + Send,
    ) -> Result<T, StoreError> {
        let result = {
            let _gate = self.compaction_gate.read().await;
            let lock = self.listing_locks.entry(listing_id).or_default().clone();
            let result: Result<T, StoreError> = async {
                let _guard = lock.lock().await;
                let (event, out) = plan()?;
                self.wal_append(&event).await?;
                self.inner.apply_event(&event);
                Ok(out)
            }
            .await;
            drop(lock);
            self.listing_locks
                .remove_if(&listing_id, |_, l| Arc::strong_count(l) == 1);
            result
        };
        if result.is_ok() {
            self.compact_if_due().await;
        }
        result
    }
}

#[async_trait]
impl ListingStore for WalStore {
    async fn get_listing(&self, id: Ulid) -> Result<Listing, StoreError> {
        self.inner.get_listing(id).await
    }

    async fn get_listings(&self, ids: &[Ulid]) -> Result<Vec<Listing>, StoreError> {
        self.inner.get_listings(ids).await
    }

    async fn list_listings(&self) -> Result<Vec<Listing>, StoreError> {
        self.inner.list_listings().await
    }

    async fn put_listing(&self, listing: Listing) -> Result<(), StoreError> {
        self.write(listing.id, || Ok((self.inner.listing_event(listing)?, ())))
            .await
    }

    async fn set_enabled(&self, id: Ulid, enabled: bool) -> Result<Listing, StoreError> {
        self.write(id, || {
            let listing = self.inner.toggled_listing(id, enabled)?;
            Ok((
                Event::ListingUpdated {
                    listing: listing.clone(),
                },
                listing,
            ))
        })
        .await
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.inner.get_reservation(id).await
    }

    async fn reservations_for_listing(
        &self,
        listing_id: Ulid,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.inner.reservations_for_listing(listing_id).await
    }

    async fn reservations_for_listings(
        &self,
        listing_ids: &[Ulid],
    ) -> Result<Vec<Reservation>, StoreError> {
        self.inner.reservations_for_listings(listing_ids).await
    }

    async fn create_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        let listing_id = reservation.listing_id;
        self.write(listing_id, || {
            Ok((self.inner.reservation_event(reservation)?, ()))
        })
        .await
    }

    async fn update_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError> {
        let listing_id = self.inner.listing_of(&id)?;
        self.write(listing_id, || Ok((self.inner.status_event(id, status)?, ())))
            .await?;
        self.inner.get_reservation(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("incasa_test_wal_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn reservation(listing_id: Ulid, day: u32) -> Reservation {
        let date = NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        Reservation {
            id: Ulid::new(),
            listing_id,
            start_date: date,
            end_date: date,
            status: ReservationStatus::Pending,
            guest: Guest::default(),
            total_cents: 100_00,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let lid = Ulid::new();
        let r = reservation(lid, 1);
        {
            let store = WalStore::open(&path, 0).unwrap();
            store.put_listing(Listing::new(lid, Some("101".into()), 100_00)).await.unwrap();
            store.create_reservation(r.clone()).await.unwrap();
            store.update_status(r.id, ReservationStatus::Confirmed).await.unwrap();
            store.set_enabled(lid, false).await.unwrap();
        }

        let store = WalStore::open(&path, 0).unwrap();
        let listing = store.get_listing(lid).await.unwrap();
        assert!(!listing.enabled);
        assert_eq!(listing.title.as_deref(), Some("101"));
        let got = store.get_reservation(r.id).await.unwrap();
        assert_eq!(got.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn rejected_write_is_not_logged() {
        let path = test_wal_path("rejected.wal");
        {
            let store = WalStore::open(&path, 0).unwrap();
            let err = store
                .create_reservation(reservation(Ulid::new(), 1))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::NotFound(_)));
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact_threshold.wal");
        let lid = Ulid::new();
        let mut ids = Vec::new();
        {
            let store = WalStore::open(&path, 5).unwrap();
            store.put_listing(Listing::new(lid, None, 90_00)).await.unwrap();
            for day in 1..=4 {
                let r = reservation(lid, day);
                ids.push(r.id);
                store.create_reservation(r).await.unwrap();
            }
            // Fifth append crossed the threshold; the log now holds the snapshot only.
            assert_eq!(store.stats().await.unwrap().appends_since_compact, 0);
            store.update_status(ids[0], ReservationStatus::Cancelled).await.unwrap();
        }

        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 6);

        let store = WalStore::open(&path, 5).unwrap();
        let all = store.reservations_for_listing(lid).await.unwrap();
        assert_eq!(all.len(), 4);
        let first = store.get_reservation(ids[0]).await.unwrap();
        assert_eq!(first.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_writes_share_a_flush() {
        let path = test_wal_path("concurrent.wal");
        let store = Arc::new(WalStore::open(&path, 0).unwrap());
        let listings: Vec<Ulid> = (0..20).map(|_| Ulid::new()).collect();
        for lid in &listings {
            store.put_listing(Listing::new(*lid, None, 50_00)).await.unwrap();
        }
        let before = store.stats().await.unwrap().flushes;

        let mut handles = Vec::new();
        for lid in listings.iter().copied() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_reservation(reservation(lid, 1)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let flushes = store.stats().await.unwrap().flushes - before;
        assert!(flushes < 20, "20 appends took {flushes} flushes");
        assert_eq!(Wal::replay(&path).unwrap().len(), 40);
        assert!(store.listing_locks.is_empty());
    }

    #[tokio::test]
    async fn same_listing_writes_stay_ordered() {
        let path = test_wal_path("same_listing.wal");
        let lid = Ulid::new();
        let store = Arc::new(WalStore::open(&path, 0).unwrap());
        store.put_listing(Listing::new(lid, None, 50_00)).await.unwrap();

        let mut handles = Vec::new();
        for day in 1..=20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_reservation(reservation(lid, day)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(store.listing_locks.is_empty());

        drop(store);
        let store = WalStore::open(&path, 0).unwrap();
        assert_eq!(store.reservations_for_listing(lid).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn unknown_listing_leaves_no_lock() {
        let path = test_wal_path("unknown_lock.wal");
        let store = WalStore::open(&path, 0).unwrap();
        for _ in 0..100 {
            let err = store.set_enabled(Ulid::new(), false).await.unwrap_err();
            assert!(matches!(err, StoreError::NotFound(_)));
        }
        assert!(store.listing_locks.is_empty());
    }
}
