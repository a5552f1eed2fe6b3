use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ReservationStatus;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Start after end, or only one of the two bounds given.
    InvalidRange {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Conflict(Ulid),
    ListingDisabled(Ulid),
    InvalidGuest(&'static str),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    LimitExceeded(&'static str),
    StoreUnavailable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => match (start, end) {
                (Some(start), Some(end)) => {
                    write!(f, "invalid date range: {start} .. {end} ends before it starts")
                }
                (Some(start), None) => {
                    write!(f, "invalid date range: start {start} given without an end")
                }
                (None, Some(end)) => write!(f, "invalid date range: end {end} given without a start"),
                (None, None) => write!(f, "invalid date range"),
            },
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::ListingDisabled(id) => write!(f, "listing {id} is disabled"),
            EngineError::InvalidGuest(msg) => write!(f, "invalid guest data: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::AlreadyExists(id) => EngineError::AlreadyExists(id),
            StoreError::InvalidTransition { from, to } => EngineError::InvalidTransition { from, to },
            StoreError::Invalid(msg) => EngineError::LimitExceeded(msg),
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}
