use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::RESERVATIONS_TOTAL;

use super::conflict::{check_no_conflict, now_ms, validate_range};
use super::{AvailabilityEngine, EngineError};

fn record<T>(op: &'static str, result: &Result<T, EngineError>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(RESERVATIONS_TOTAL, "op" => op, "status" => status).increment(1);
}

fn validate_guest(guest: &Guest) -> Result<(), EngineError> {
    let fields = [
        (&guest.full_name, "full name is required"),
        (&guest.email, "email is required"),
        (&guest.phone, "phone is required"),
        (&guest.document_number, "document number is required"),
    ];
    for (value, missing) in fields {
        if value.trim().is_empty() {
            return Err(EngineError::InvalidGuest(missing));
        }
        if value.len() > MAX_GUEST_FIELD_LEN {
            return Err(EngineError::LimitExceeded("guest field too long"));
        }
    }
    if !guest.email.contains('@') {
        return Err(EngineError::InvalidGuest("email is malformed"));
    }
    if let Some(url) = &guest.document_url
        && url.len() > MAX_URL_LEN
    {
        return Err(EngineError::LimitExceeded("document url too long"));
    }
    Ok(())
}

impl AvailabilityEngine {
    /// Submit a reservation. It starts out `pending` and blocks its days at once.
    ///
    /// The conflict check and the create run under a per-listing lock, so two
    /// overlapping requests through this engine never both succeed.
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        let result = self.reserve_inner(request).await;
        record("reserve", &result);
        result
    }

    async fn reserve_inner(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        let range = DayRange::new(request.start_date, request.end_date)?;
        validate_range(&range, MAX_RESERVATION_DAYS, "stay too long")?;
        validate_guest(&request.guest)?;

        let listing_id = request.listing_id;
        // Unknown ids must not get a lock entry.
        self.call(self.listings.get_listing(listing_id)).await?;
        let lock = self.reserve_lock(listing_id);
        let _guard = lock.lock().await;

        let listing = self.call(self.listings.get_listing(listing_id)).await?;
        if !listing.enabled {
            return Err(EngineError::ListingDisabled(listing_id));
        }
        let existing = self
            .call(self.reservations.reservations_for_listing(listing_id))
            .await?;
        check_no_conflict(&existing, &range)?;

        let quote = Quote::for_range(&range, listing.daily_rate_cents);
        let reservation = Reservation {
            id: Ulid::new(),
            listing_id,
            start_date: range.start(),
            end_date: range.end(),
            status: ReservationStatus::Pending,
            guest: request.guest,
            total_cents: quote.total_cents,
            created_at: now_ms(),
        };
        self.call(self.reservations.create_reservation(reservation.clone()))
            .await?;
        self.invalidate(&listing_id);
        info!(
            "reservation {} on listing {listing_id}: {} .. {} ({} days, {} cents)",
            reservation.id, reservation.start_date, reservation.end_date, quote.days, quote.total_cents
        );
        Ok(reservation)
    }

    pub async fn confirm(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let result = self
            .transition(reservation_id, ReservationStatus::Confirmed)
            .await;
        record("confirm", &result);
        result
    }

    pub async fn cancel(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let result = self
            .transition(reservation_id, ReservationStatus::Cancelled)
            .await;
        record("cancel", &result);
        result
    }

    async fn transition(
        &self,
        reservation_id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let updated = self
            .call(self.reservations.update_status(reservation_id, status))
            .await?;
        self.invalidate(&updated.listing_id);
        info!("reservation {reservation_id} is now {status}");
        Ok(updated)
    }

    /// Add a listing, or replace one with the same id.
    pub async fn register_listing(&self, listing: Listing) -> Result<(), EngineError> {
        if listing.daily_rate_cents == 0 {
            return Err(EngineError::LimitExceeded("daily rate must be positive"));
        }
        if listing.title.as_ref().is_some_and(|t| t.len() > MAX_TITLE_LEN) {
            return Err(EngineError::LimitExceeded("listing title too long"));
        }
        let id = listing.id;
        self.call(self.listings.put_listing(listing)).await?;
        self.invalidate(&id);
        Ok(())
    }

    /// Administrative kill switch.
    pub async fn set_listing_enabled(
        &self,
        listing_id: Ulid,
        enabled: bool,
    ) -> Result<Listing, EngineError> {
        let listing = self
            .call(self.listings.set_enabled(listing_id, enabled))
            .await?;
        self.invalidate(&listing_id);
        info!(
            "listing {listing_id} {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(listing)
    }

    pub async fn reservations(&self, listing_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        self.call(self.reservations.reservations_for_listing(listing_id))
            .await
    }
}
