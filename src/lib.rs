pub mod cache;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod startup;
pub mod store;
pub mod wal;

pub use config::EngineConfig;
pub use engine::{AvailabilityEngine, EngineError};
pub use model::{Availability, AvailabilityMap, AvailabilityQuery, DayRange};
pub use store::{InMemoryStore, ListingStore, ReservationStore, StoreError, WalStore};
