use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::cache::Ticket;
use crate::limits::*;
use crate::model::*;
use crate::observability::{self, AVAILABILITY_TOTAL, CACHE_LOOKUPS_TOTAL, QUERY_DURATION_SECONDS};

use super::availability::{decide, partition_by_listing};
use super::conflict::validate_range;
use super::{AvailabilityEngine, EngineError, LISTINGS, RESERVATIONS};

fn record(op: &'static str, availability: Availability) {
    metrics::counter!(AVAILABILITY_TOTAL, "op" => op, "outcome" => observability::outcome_label(availability))
        .increment(1);
}

impl AvailabilityEngine {
    fn cached(&self, listing_id: &Ulid, range: Option<&DayRange>) -> Option<Availability> {
        let cache = self.cache.as_ref()?;
        let hit = cache.get(listing_id, range);
        let label = if hit.is_some() { "hit" } else { "miss" };
        metrics::counter!(CACHE_LOOKUPS_TOTAL, "result" => label).increment(1);
        hit
    }

    fn ticket(&self, listing_id: &Ulid) -> Ticket {
        self.cache.as_ref().map_or(Ticket::default(), |c| c.ticket(listing_id))
    }

    fn remember(&self, listing_id: Ulid, range: Option<DayRange>, availability: Availability, ticket: Ticket) {
        if let Some(cache) = &self.cache {
            cache.put(listing_id, range, availability, ticket);
        }
    }

    /// Can `listing_id` be booked from `range_start` through `range_end`, both days included?
    ///
    /// `InvalidRange` if the start is after the end, `NotFound` if the listing
    /// does not exist. A failed or slow store yields `Availability::Unknown`.
    pub async fn is_available(
        &self,
        listing_id: Ulid,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<Availability, EngineError> {
        let range = DayRange::new(range_start, range_end)?;

        let started = Instant::now();
        let result = self.evaluate_one(listing_id, range, self.store_timeout).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "op" => "single")
            .record(started.elapsed().as_secs_f64());
        if let Ok(a) = result {
            record("single", a);
        }
        result
    }

    async fn evaluate_one(
        &self,
        listing_id: Ulid,
        range: DayRange,
        timeout: Duration,
    ) -> Result<Availability, EngineError> {
        if let Some(hit) = self.cached(&listing_id, Some(&range)) {
            return Ok(hit);
        }
        let ticket = self.ticket(&listing_id);

        let Some(listing) = self
            .read(LISTINGS, timeout, self.listings.get_listing(listing_id))
            .await?
        else {
            return Ok(Availability::Unknown);
        };
        if !listing.enabled {
            self.remember(listing_id, Some(range), Availability::Unavailable, ticket);
            return Ok(Availability::Unavailable);
        }

        let Some(reservations) = self
            .read(RESERVATIONS, timeout, self.reservations.reservations_for_listing(listing_id))
            .await?
        else {
            return Ok(Availability::Unknown);
        };
        let availability = decide(&listing, &reservations, &range);
        self.remember(listing_id, Some(range), availability, ticket);
        Ok(availability)
    }

    /// Availability of many listings at once, with an optional shared range.
    ///
    /// Without a range each listing degrades to its enabled flag. With one,
    /// each listing gets the answer `is_available` would give.
    pub async fn batch_availability(
        &self,
        listing_ids: &[Ulid],
        range_start: Option<NaiveDate>,
        range_end: Option<NaiveDate>,
    ) -> Result<AvailabilityMap, EngineError> {
        let query = AvailabilityQuery::new(listing_ids.to_vec(), range_start, range_end)?;
        self.query(&query).await
    }

    /// Evaluate an `AvailabilityQuery`.
    ///
    /// Store access is one listing read for the uncached ids and, when a range
    /// is given, one reservation read for the enabled ones.
    pub async fn query(&self, query: &AvailabilityQuery) -> Result<AvailabilityMap, EngineError> {
        let mut seen = HashSet::new();
        let ids: Vec<Ulid> = query
            .listing_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.len() > MAX_BATCH_LISTINGS {
            return Err(EngineError::LimitExceeded("too many listing ids"));
        }

        let started = Instant::now();
        let timeout = query.timeout.unwrap_or(self.store_timeout);
        let result = self.evaluate_batch(ids, query.range, timeout).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "op" => "batch")
            .record(started.elapsed().as_secs_f64());
        if let Ok(map) = &result {
            for a in map.values() {
                record("batch", *a);
            }
        }
        result
    }

    async fn evaluate_batch(
        &self,
        ids: Vec<Ulid>,
        range: Option<DayRange>,
        timeout: Duration,
    ) -> Result<AvailabilityMap, EngineError> {
        let mut result = AvailabilityMap::with_capacity(ids.len());
        let mut pending = Vec::new();
        let mut tickets = HashMap::new();
        for id in ids {
            match self.cached(&id, range.as_ref()) {
                Some(hit) => {
                    result.insert(id, hit);
                }
                None => {
                    tickets.insert(id, self.ticket(&id));
                    pending.push(id);
                }
            }
        }
        if pending.is_empty() {
            return Ok(result);
        }

        let Some(found) = self
            .read(LISTINGS, timeout, self.listings.get_listings(&pending))
            .await?
        else {
            result.extend(pending.into_iter().map(|id| (id, Availability::Unknown)));
            return Ok(result);
        };
        let mut by_id: HashMap<Ulid, Listing> = found.into_iter().map(|l| (l.id, l)).collect();
        let mut listings = Vec::with_capacity(pending.len());
        for id in &pending {
            listings.push(by_id.remove(id).ok_or(EngineError::NotFound(*id))?);
        }

        let Some(range) = range else {
            for listing in listings {
                let a = Availability::from_bool(listing.enabled);
                self.remember(listing.id, None, a, tickets[&listing.id]);
                result.insert(listing.id, a);
            }
            return Ok(result);
        };

        let (enabled, disabled): (Vec<Listing>, Vec<Listing>) =
            listings.into_iter().partition(|l| l.enabled);
        for listing in disabled {
            self.remember(listing.id, Some(range), Availability::Unavailable, tickets[&listing.id]);
            result.insert(listing.id, Availability::Unavailable);
        }
        if enabled.is_empty() {
            return Ok(result);
        }

        let need: Vec<Ulid> = enabled.iter().map(|l| l.id).collect();
        let Some(reservations) = self
            .read(RESERVATIONS, timeout, self.reservations.reservations_for_listings(&need))
            .await?
        else {
            result.extend(need.into_iter().map(|id| (id, Availability::Unknown)));
            return Ok(result);
        };
        let mut calendars = partition_by_listing(reservations);
        for listing in enabled {
            let calendar = calendars.remove(&listing.id).unwrap_or_default();
            let a = decide(&listing, &calendar, &range);
            self.remember(listing.id, Some(range), a, tickets[&listing.id]);
            result.insert(listing.id, a);
        }
        debug!(
            "batch availability: {} listings, {} evaluated against reservations",
            result.len(),
            need.len()
        );
        Ok(result)
    }

    /// Every listing with its availability for an optional range, as the
    /// public listing page shows them. Sorted by id.
    pub async fn catalog(
        &self,
        range_start: Option<NaiveDate>,
        range_end: Option<NaiveDate>,
    ) -> Result<Vec<(Listing, Availability)>, EngineError> {
        let query = AvailabilityQuery::new(Vec::new(), range_start, range_end)?;
        let mut listings = self.call(self.listings.list_listings()).await?;
        listings.sort_by_key(|l| l.id);
        let query = AvailabilityQuery {
            listing_ids: listings.iter().map(|l| l.id).collect(),
            ..query
        };
        let mut map = HashMap::new();
        for chunk in query.listing_ids.chunks(MAX_BATCH_LISTINGS) {
            let part = AvailabilityQuery {
                listing_ids: chunk.to_vec(),
                ..query.clone()
            };
            map.extend(self.query(&part).await?);
        }
        Ok(listings
            .into_iter()
            .map(|l| {
                let a = map.get(&l.id).copied().unwrap_or(Availability::Unknown);
                (l, a)
            })
            .collect())
    }

    /// Price of a stay, billed per day with both ends included.
    pub async fn quote(
        &self,
        listing_id: Ulid,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<Quote, EngineError> {
        let range = DayRange::new(range_start, range_end)?;
        validate_range(&range, MAX_RESERVATION_DAYS, "stay too long")?;
        let listing = self.call(self.listings.get_listing(listing_id)).await?;
        Ok(Quote::for_range(&range, listing.daily_rate_cents))
    }
}
