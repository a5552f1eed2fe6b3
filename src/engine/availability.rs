use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::conflict::first_conflict;

// ── Availability decision ─────────────────────────────────────────

/// Decide one listing against its own reservations.
///
/// A disabled listing is unavailable whatever its calendar says; otherwise the
/// listing is available iff no non-cancelled reservation overlaps `range`.
/// Reservations of other listings must not be passed in.
pub fn decide(listing: &Listing, reservations: &[Reservation], range: &DayRange) -> Availability {
    if !listing.enabled {
        return Availability::Unavailable;
    }
    Availability::from_bool(first_conflict(reservations, range).is_none())
}

/// Split one batched store read into per-listing calendars.
pub fn partition_by_listing(reservations: Vec<Reservation>) -> HashMap<Ulid, Vec<Reservation>> {
    let mut by_listing: HashMap<Ulid, Vec<Reservation>> = HashMap::new();
    for r in reservations {
        by_listing.entry(r.listing_id).or_default().push(r);
    }
    by_listing
}
