use std::collections::HashMap;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Midnight UTC of `date`, in Unix milliseconds.
pub fn start_of_day_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Inclusive range of whole calendar days. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DayRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::InvalidRange {
                start: Some(start),
                end: Some(end),
            });
        }
        Ok(Self { start, end })
    }

    /// Both bounds or neither. One bound on its own is a malformed range.
    pub fn from_bounds(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<Self>, EngineError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            (None, None) => Ok(None),
            (start, end) => Err(EngineError::InvalidRange { start, end }),
        }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// `[start-of-day(start), end-of-day(end))` in milliseconds.
    pub fn span(&self) -> Span {
        Span::new(start_of_day_ms(self.start), start_of_day_ms(self.end) + DAY_MS)
    }

    /// Start-of-day / end-of-day overlap: touching on a shared day is a conflict.
    pub fn overlaps(&self, other: &DayRange) -> bool {
        self.span().overlaps(&other.span())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Ulid,
    pub title: Option<String>,
    /// Administrative kill switch. A disabled listing is never offered.
    pub enabled: bool,
    pub daily_rate_cents: u64,
}

impl Listing {
    pub fn new(id: Ulid, title: Option<String>, daily_rate_cents: u64) -> Self {
        Self {
            id,
            title,
            enabled: true,
            daily_rate_cents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    /// `pending -> confirmed`, `pending -> cancelled`, `confirmed -> cancelled`.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    pub fn blocks(self) -> bool {
        self != ReservationStatus::Cancelled
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Contact data captured by the reservation form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Guest {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub document_number: String,
    /// Link to the uploaded identity document, if any.
    pub document_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: ReservationStatus,
    pub guest: Guest,
    pub total_cents: u64,
    pub created_at: Ms,
}

impl Reservation {
    /// Stores only accept reservations with `start_date <= end_date`.
    pub fn range(&self) -> DayRange {
        DayRange {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

/// Reservations of one listing, sorted by `start_date`.
#[derive(Debug, Clone, Default)]
pub struct ListingCalendar {
    pub reservations: Vec<Reservation>,
}

impl ListingCalendar {
    /// Insert maintaining sort order by start date.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.start_date, |r| r.start_date)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose day range overlaps `query`, cancelled ones included.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: &DayRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.start_date <= query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.end_date >= query.start)
    }
}

/// Tri-state availability. `Unknown` is never a stand-in for either answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Option<bool>", from = "Option<bool>")]
pub enum Availability {
    Available,
    Unavailable,
    Unknown,
}

impl Availability {
    pub fn from_bool(available: bool) -> Self {
        if available {
            Availability::Available
        } else {
            Availability::Unavailable
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Availability::Available => Some(true),
            Availability::Unavailable => Some(false),
            Availability::Unknown => None,
        }
    }
}

impl From<Availability> for Option<bool> {
    fn from(a: Availability) -> Self {
        a.as_bool()
    }
}

impl From<Option<bool>> for Availability {
    fn from(v: Option<bool>) -> Self {
        v.map_or(Availability::Unknown, Availability::from_bool)
    }
}

pub type AvailabilityMap = HashMap<Ulid, Availability>;

/// `{listing_ids, range?}` plus an optional per-query store timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub listing_ids: Vec<Ulid>,
    pub range: Option<DayRange>,
    pub timeout: Option<Duration>,
}

impl AvailabilityQuery {
    pub fn new(
        listing_ids: Vec<Ulid>,
        range_start: Option<NaiveDate>,
        range_end: Option<NaiveDate>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            listing_ids,
            range: DayRange::from_bounds(range_start, range_end)?,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub days: i64,
    pub daily_rate_cents: u64,
    pub total_cents: u64,
}

impl Quote {
    pub fn for_range(range: &DayRange, daily_rate_cents: u64) -> Self {
        let days = range.days();
        Self {
            days,
            daily_rate_cents,
            total_cents: daily_rate_cents.saturating_mul(days as u64),
        }
    }
}

/// Input to the reservation flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub listing_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub guest: Guest,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ListingCreated {
        listing: Listing,
    },
    ListingUpdated {
        listing: Listing,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        listing_id: Ulid,
        status: ReservationStatus,
    },
}
