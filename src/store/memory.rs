use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Change, ChangeFeed, ChangeKind};

use super::{ListingStore, ReservationStore, StoreError};

/// DashMap-backed store. Also the in-memory state behind `WalStore`.
pub struct InMemoryStore {
    listings: DashMap<Ulid, Listing>,
    calendars: DashMap<Ulid, ListingCalendar>,
    /// Reverse lookup: reservation id → listing id
    reservation_to_listing: DashMap<Ulid, Ulid>,
    feed: Arc<ChangeFeed>,
    writes: Mutex<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_feed(Arc::new(ChangeFeed::new()))
    }

    pub fn with_feed(feed: Arc<ChangeFeed>) -> Self {
        Self {
            listings: DashMap::new(),
            calendars: DashMap::new(),
            reservation_to_listing: DashMap::new(),
            feed,
            writes: Mutex::new(()),
        }
    }

    pub fn feed(&self) -> Arc<ChangeFeed> {
        self.feed.clone()
    }

    pub fn listing_count(&self) -> usize {
        self.listings.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_listing.len()
    }

    // ── Validation (no mutation) ─────────────────────────────

    pub(super) fn listing_event(&self, listing: Listing) -> Result<Event, StoreError> {
        if listing.daily_rate_cents == 0 {
            return Err(StoreError::Invalid("daily rate must be positive"));
        }
        Ok(if self.listings.contains_key(&listing.id) {
            Event::ListingUpdated { listing }
        } else {
            Event::ListingCreated { listing }
        })
    }

    pub(super) fn toggled_listing(&self, id: Ulid, enabled: bool) -> Result<Listing, StoreError> {
        let mut listing = self
            .listings
            .get(&id)
            .map(|l| l.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        listing.enabled = enabled;
        Ok(listing)
    }

    pub(super) fn reservation_event(&self, reservation: Reservation) -> Result<Event, StoreError> {
        if reservation.start_date > reservation.end_date {
            return Err(StoreError::Invalid("reservation ends before it starts"));
        }
        if !self.listings.contains_key(&reservation.listing_id) {
            return Err(StoreError::NotFound(reservation.listing_id));
        }
        if self.reservation_to_listing.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        Ok(Event::ReservationCreated { reservation })
    }

    pub(super) fn status_event(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Event, StoreError> {
        let current = self.find_reservation(&id)?;
        if !current.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }
        Ok(Event::ReservationStatusChanged {
            id,
            listing_id: current.listing_id,
            status,
        })
    }

    pub(super) fn listing_of(&self, id: &Ulid) -> Result<Ulid, StoreError> {
        self.reservation_to_listing
            .get(id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(*id))
    }

    fn find_reservation(&self, id: &Ulid) -> Result<Reservation, StoreError> {
        let listing_id = self.listing_of(id)?;
        self.calendars
            .get(&listing_id)
            .and_then(|cal| cal.reservations.iter().find(|r| r.id == *id).cloned())
            .ok_or(StoreError::NotFound(*id))
    }

    // ── Event application ────────────────────────────────────

    /// Apply a validated event and publish the resulting change.
    pub fn apply_event(&self, event: &Event) {
        let change = match event {
            Event::ListingCreated { listing } | Event::ListingUpdated { listing } => {
                self.listings.insert(listing.id, listing.clone());
                Change {
                    listing_id: listing.id,
                    kind: ChangeKind::ListingChanged,
                }
            }
            Event::ReservationCreated { reservation } => {
                self.reservation_to_listing
                    .insert(reservation.id, reservation.listing_id);
                self.calendars
                    .entry(reservation.listing_id)
                    .or_default()
                    .insert(reservation.clone());
                Change {
                    listing_id: reservation.listing_id,
                    kind: ChangeKind::ReservationCreated,
                }
            }
            Event::ReservationStatusChanged {
                id,
                listing_id,
                status,
            } => {
                if let Some(mut cal) = self.calendars.get_mut(listing_id)
                    && let Some(r) = cal.get_mut(id)
                {
                    r.status = *status;
                }
                let kind = match status {
                    ReservationStatus::Confirmed => ChangeKind::ReservationConfirmed,
                    ReservationStatus::Cancelled => ChangeKind::ReservationCancelled,
                    ReservationStatus::Pending => ChangeKind::ListingChanged,
                };
                Change {
                    listing_id: *listing_id,
                    kind,
                }
            }
        };
        self.feed.publish(change);
    }

    /// Minimal event sequence recreating the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .listings
            .iter()
            .map(|e| Event::ListingCreated {
                listing: e.value().clone(),
            })
            .collect();
        for cal in self.calendars.iter() {
            events.extend(cal.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        events
    }

    fn write<T>(&self, plan: impl FnOnce() -> Result<(Event, T), StoreError>) -> Result<T, StoreError> {
        let _guard = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let (event, out) = plan()?;
        self.apply_event(&event);
        Ok(out)
    }
}

#[async_trait]
impl ListingStore for InMemoryStore {
    async fn get_listing(&self, id: Ulid) -> Result<Listing, StoreError> {
        self.listings
            .get(&id)
            .map(|l| l.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn get_listings(&self, ids: &[Ulid]) -> Result<Vec<Listing>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.listings.get(id).map(|l| l.value().clone()))
            .collect())
    }

    async fn list_listings(&self) -> Result<Vec<Listing>, StoreError> {
        let mut all: Vec<Listing> = self.listings.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|l| l.id);
        Ok(all)
    }

    async fn put_listing(&self, listing: Listing) -> Result<(), StoreError> {
        self.write(|| Ok((self.listing_event(listing)?, ())))
    }

    async fn set_enabled(&self, id: Ulid, enabled: bool) -> Result<Listing, StoreError> {
        self.write(|| {
            let listing = self.toggled_listing(id, enabled)?;
            Ok((Event::ListingUpdated { listing: listing.clone() }, listing))
        })
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.find_reservation(&id)
    }

    async fn reservations_for_listing(
        &self,
        listing_id: Ulid,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .calendars
            .get(&listing_id)
            .map(|cal| cal.reservations.clone())
            .unwrap_or_default())
    }

    async fn reservations_for_listings(
        &self,
        listing_ids: &[Ulid],
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut out = Vec::new();
        for id in listing_ids {
            if let Some(cal) = self.calendars.get(id) {
                out.extend(cal.reservations.iter().cloned());
            }
        }
        Ok(out)
    }

    async fn create_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.write(|| Ok((self.reservation_event(reservation)?, ())))
    }

    async fn update_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError> {
        self.write(|| Ok((self.status_event(id, status)?, ())))?;
        self.find_reservation(&id)
    }
}
