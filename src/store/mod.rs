//! Listing and reservation stores: the persisted state the engine reads from.
//!
//! The engine only ever sees the two traits; concrete stores are built by the
//! embedding application and injected.

mod memory;
mod wal_store;

pub use memory::InMemoryStore;
pub use wal_store::{WalStats, WalStore};

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Listing, Reservation, ReservationStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    Invalid(&'static str),
    /// Transient failure: network, disk, or a store that is shutting down.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
            StoreError::Invalid(msg) => write!(f, "invalid record: {msg}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn get_listing(&self, id: Ulid) -> Result<Listing, StoreError>;

    /// One read for a whole id set. Unknown ids are left out of the result.
    async fn get_listings(&self, ids: &[Ulid]) -> Result<Vec<Listing>, StoreError>;

    async fn list_listings(&self) -> Result<Vec<Listing>, StoreError>;

    /// Create or replace a listing.
    async fn put_listing(&self, listing: Listing) -> Result<(), StoreError>;

    async fn set_enabled(&self, id: Ulid, enabled: bool) -> Result<Listing, StoreError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError>;

    async fn reservations_for_listing(&self, listing_id: Ulid)
    -> Result<Vec<Reservation>, StoreError>;

    /// One read across a set of listings; callers partition by `listing_id`.
    async fn reservations_for_listings(
        &self,
        listing_ids: &[Ulid],
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn create_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;

    /// Move a reservation along `pending -> confirmed -> cancelled`.
    async fn update_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError>;
}
