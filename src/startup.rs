use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::engine::AvailabilityEngine;
use crate::observability;
use crate::store::WalStore;

/// Bring up a durable engine from `config`: tracing, the metrics endpoint,
/// the data directory, the WAL-backed store and an engine whose cache
/// follows the store's change feed. Must run inside a tokio runtime.
pub fn start(
    config: &EngineConfig,
) -> Result<(Arc<WalStore>, AvailabilityEngine), Box<dyn std::error::Error>> {
    observability::init_tracing();
    observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(&config.wal_path(), config.compact_threshold)?);
    let engine =
        AvailabilityEngine::with_store(store.clone(), config).with_change_feed(&store.feed());

    info!("incasa engine ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  store_timeout: {:?}", config.store_timeout);
    info!(
        "  cache: {}",
        config
            .cache_ttl
            .map_or("disabled".to_string(), |ttl| format!("{ttl:?} ttl"))
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
    Ok((store, engine))
}
