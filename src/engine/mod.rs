mod availability;
mod conflict;
mod error;
mod queries;
mod reservations;

pub use availability::{decide, partition_by_listing};
pub use conflict::{check_no_conflict, first_conflict};
pub use error::EngineError;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;
use ulid::Ulid;

use crate::cache::{self, AvailabilityCache};
use crate::config::EngineConfig;
use crate::notify::ChangeFeed;
use crate::store::{ListingStore, ReservationStore, StoreError};

const LISTINGS: &str = "listings";
const RESERVATIONS: &str = "reservations";

/// Decides whether listings can be booked for a date range, and runs the
/// reservation flow on top of that decision.
///
/// Owns no persisted state: listings and reservations live in the injected
/// stores. Store failures on the read path surface as `Availability::Unknown`.
pub struct AvailabilityEngine {
    listings: Arc<dyn ListingStore>,
    reservations: Arc<dyn ReservationStore>,
    cache: Option<Arc<AvailabilityCache>>,
    store_timeout: Duration,
    /// Per-listing lock held across conflict check and create.
    reserve_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    invalidator: Option<JoinHandle<()>>,
}

impl AvailabilityEngine {
    pub fn new(
        listings: Arc<dyn ListingStore>,
        reservations: Arc<dyn ReservationStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            listings,
            reservations,
            cache: config.cache_ttl.map(|ttl| Arc::new(AvailabilityCache::new(ttl))),
            store_timeout: config.store_timeout,
            reserve_locks: DashMap::new(),
            invalidator: None,
        }
    }

    /// Engine over a store that serves both listings and reservations.
    pub fn with_store<S>(store: Arc<S>, config: &EngineConfig) -> Self
    where
        S: ListingStore + ReservationStore + 'static,
    {
        Self::new(store.clone(), store, config)
    }

    /// Also invalidate cached answers on changes made through the stores
    /// directly. Spawns a task; must run inside a tokio runtime.
    pub fn with_change_feed(mut self, feed: &ChangeFeed) -> Self {
        if let Some(cache) = &self.cache {
            if let Some(old) = self.invalidator.take() {
                old.abort();
            }
            self.invalidator = Some(cache::spawn_invalidator(cache.clone(), feed.subscribe_all()));
        }
        self
    }

    pub(super) fn invalidate(&self, listing_id: &Ulid) {
        if let Some(cache) = &self.cache {
            cache.invalidate(listing_id);
        }
    }

    pub(super) fn reserve_lock(&self, listing_id: Ulid) -> Arc<Mutex<()>> {
        self.reserve_locks.entry(listing_id).or_default().clone()
    }

    /// Bounded store read for the availability path.
    /// `Ok(None)` means no definite answer: the store failed or timed out.
    pub(super) async fn read<T>(
        &self,
        store: &'static str,
        timeout: Duration,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<Option<T>, EngineError> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(StoreError::NotFound(id))) => Err(EngineError::NotFound(id)),
            Ok(Err(e)) => {
                warn!("{store} store read failed: {e}");
                metrics::counter!(crate::observability::STORE_FAILURES_TOTAL,
                    "store" => store, "reason" => "error")
                .increment(1);
                Ok(None)
            }
            Err(_) => {
                warn!("{store} store read timed out after {timeout:?}");
                metrics::counter!(crate::observability::STORE_FAILURES_TOTAL,
                    "store" => store, "reason" => "timeout")
                .increment(1);
                Ok(None)
            }
        }
    }

    /// Bounded store call for the write path. Failures are errors, never answers.
    pub(super) async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::StoreUnavailable(format!(
                "timed out after {:?}",
                self.store_timeout
            ))),
        }
    }
}

impl Drop for AvailabilityEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.invalidator.take() {
            handle.abort();
        }
    }
}
