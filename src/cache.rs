use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::{MAX_CACHED_LISTINGS, MAX_CACHED_RANGES_PER_LISTING};
use crate::model::{Availability, DayRange};
use crate::notify::Change;

#[derive(Debug, Clone, Copy)]
struct Entry {
    available: bool,
    stored_at: Instant,
}

/// Snapshot of the cache's invalidation state, taken before reading the
/// stores and handed back to `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ticket {
    epoch: u64,
    generation: u64,
}

/// Per-listing cache of definite availability answers.
///
/// Keyed by `(listing, range)`; `None` is the no-range (enabled flag) answer.
/// Each listing carries a generation bumped on invalidation, and `clear`
/// bumps a global epoch: a result computed before either is never stored.
pub struct AvailabilityCache {
    ttl: Duration,
    entries: DashMap<Ulid, HashMap<Option<DayRange>, Entry>>,
    generations: DashMap<Ulid, u64>,
    epoch: AtomicU64,
}

impl AvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            generations: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn ticket(&self, listing_id: &Ulid) -> Ticket {
        Ticket {
            epoch: self.epoch.load(Ordering::Acquire),
            generation: self.generations.get(listing_id).map_or(0, |g| *g),
        }
    }

    pub fn get(&self, listing_id: &Ulid, range: Option<&DayRange>) -> Option<Availability> {
        let mut slot = self.entries.get_mut(listing_id)?;
        let key = range.copied();
        let entry = *slot.get(&key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            slot.remove(&key);
            return None;
        }
        Some(Availability::from_bool(entry.available))
    }

    /// Store a definite answer. `Unknown` and stale tickets are dropped.
    pub fn put(&self, listing_id: Ulid, range: Option<DayRange>, availability: Availability, ticket: Ticket) {
        let Some(available) = availability.as_bool() else {
            return;
        };
        if self.ticket(&listing_id) != ticket {
            debug!("skip caching {listing_id}: invalidated while computing");
            return;
        }
        if !self.entries.contains_key(&listing_id) && self.entries.len() >= MAX_CACHED_LISTINGS {
            return;
        }

        // Rechecked under the shard lock: `invalidate` and `clear` bump first and
        // remove entries second, so an insert that passes here is removed by them.
        let mut slot = self.entries.entry(listing_id).or_default();
        if self.ticket(&listing_id) != ticket {
            let empty = slot.is_empty();
            drop(slot);
            if empty {
                self.entries.remove_if(&listing_id, |_, s| s.is_empty());
            }
            return;
        }
        let ttl = self.ttl;
        slot.retain(|_, e| e.stored_at.elapsed() < ttl);
        if slot.len() >= MAX_CACHED_RANGES_PER_LISTING && !slot.contains_key(&range) {
            let oldest = slot.iter().min_by_key(|(_, e)| e.stored_at).map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                slot.remove(&oldest);
            }
        }
        slot.insert(
            range,
            Entry {
                available,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, listing_id: &Ulid) {
        *self.generations.entry(*listing_id).or_insert(0) += 1;
        self.entries.remove(listing_id);
        metrics::counter!(crate::observability::CACHE_INVALIDATIONS_TOTAL).increment(1);
    }

    /// Drop everything and reject every ticket issued so far.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Cached ranges for one listing, expired ones included until pruned.
    pub fn ranges_cached(&self, listing_id: &Ulid) -> usize {
        self.entries.get(listing_id).map_or(0, |slot| slot.len())
    }

    /// Listings with at least one cached answer.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drop cache entries for every listing the change feed reports.
/// A lagging receiver has missed changes, so it clears everything.
pub fn spawn_invalidator(
    cache: Arc<AvailabilityCache>,
    mut changes: broadcast::Receiver<Change>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => cache.invalidate(&change.listing_id),
                Err(RecvError::Lagged(missed)) => {
                    warn!("cache invalidator lagged by {missed} changes, clearing cache");
                    cache.clear();
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChangeFeed, ChangeKind};
    use chrono::NaiveDate;

    fn range(day: u32) -> DayRange {
        DayRange::single(NaiveDate::from_ymd_opt(2024, 7, day).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = AvailabilityCache::new(Duration::from_secs(5));
        let lid = Ulid::new();
        let t = cache.ticket(&lid);
        cache.put(lid, Some(range(1)), Availability::Available, t);
        assert_eq!(cache.get(&lid, Some(&range(1))), Some(Availability::Available));
        assert_eq!(cache.get(&lid, Some(&range(2))), None);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get(&lid, Some(&range(1))), None);
    }

    #[tokio::test]
    async fn unknown_is_never_cached() {
        let cache = AvailabilityCache::new(Duration::from_secs(5));
        let lid = Ulid::new();
        cache.put(lid, None, Availability::Unknown, cache.ticket(&lid));
        assert_eq!(cache.get(&lid, None), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn stale_ticket_is_rejected() {
        let cache = AvailabilityCache::new(Duration::from_secs(5));
        let lid = Ulid::new();
        let t = cache.ticket(&lid);
        cache.invalidate(&lid);
        cache.put(lid, None, Availability::Available, t);
        assert_eq!(cache.get(&lid, None), None);
    }

    #[tokio::test]
    async fn clear_rejects_tickets_taken_before() {
        let cache = AvailabilityCache::new(Duration::from_secs(5));
        let a = Ulid::new();
        let b = Ulid::new();
        cache.put(a, None, Availability::Available, cache.ticket(&a));
        let ta = cache.ticket(&a);
        // b was never cached nor invalidated; its ticket still predates the clear.
        let tb = cache.ticket(&b);
        cache.clear();
        cache.put(a, None, Availability::Available, ta);
        cache.put(b, None, Availability::Unavailable, tb);
        assert!(cache.is_empty());

        cache.put(b, None, Availability::Unavailable, cache.ticket(&b));
        assert_eq!(cache.get(&b, None), Some(Availability::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_ranges_are_pruned_on_put() {
        let cache = AvailabilityCache::new(Duration::from_secs(5));
        let lid = Ulid::new();
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for n in 0..200u64 {
            let day = DayRange::single(base + chrono::Days::new(n));
            cache.put(lid, Some(day), Availability::Available, cache.ticket(&lid));
        }
        assert_eq!(cache.ranges_cached(&lid), 200);

        tokio::time::advance(Duration::from_secs(60)).await;
        cache.put(lid, Some(range(1)), Availability::Available, cache.ticket(&lid));
        assert_eq!(cache.ranges_cached(&lid), 1);
    }

    #[tokio::test]
    async fn ranges_per_listing_are_capped() {
        let cache = AvailabilityCache::new(Duration::from_secs(600));
        let lid = Ulid::new();
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for n in 0..(MAX_CACHED_RANGES_PER_LISTING as u64 * 2) {
            let day = DayRange::single(base + chrono::Days::new(n));
            cache.put(lid, Some(day), Availability::Unavailable, cache.ticket(&lid));
        }
        assert_eq!(cache.ranges_cached(&lid), MAX_CACHED_RANGES_PER_LISTING);
        let newest = DayRange::single(
            base + chrono::Days::new(MAX_CACHED_RANGES_PER_LISTING as u64 * 2 - 1),
        );
        assert_eq!(cache.get(&lid, Some(&newest)), Some(Availability::Unavailable));
    }

    #[tokio::test]
    async fn invalidator_follows_change_feed() {
        let feed = ChangeFeed::new();
        let cache = Arc::new(AvailabilityCache::new(Duration::from_secs(60)));
        let handle = spawn_invalidator(cache.clone(), feed.subscribe_all());

        let lid = Ulid::new();
        let other = Ulid::new();
        cache.put(lid, Some(range(3)), Availability::Available, cache.ticket(&lid));
        cache.put(other, Some(range(3)), Availability::Available, cache.ticket(&other));

        feed.publish(Change {
            listing_id: lid,
            kind: ChangeKind::ReservationCreated,
        });

        for _ in 0..100 {
            if cache.get(&lid, Some(&range(3))).is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.get(&lid, Some(&range(3))), None);
        assert_eq!(cache.get(&other, Some(&range(3))), Some(Availability::Available));

        drop(feed);
        handle.await.unwrap();
    }
}
