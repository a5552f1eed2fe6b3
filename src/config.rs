use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings. `from_env` reads `INCASA_*` variables; anything missing
/// or unparsable keeps its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on every store read, unless a query brings its own.
    pub store_timeout: Duration,
    /// Lifetime of a cached answer. `None` disables the cache.
    pub cache_ttl: Option<Duration>,
    pub data_dir: PathBuf,
    /// WAL appends before the store rewrites its log. 0 disables compaction.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            cache_ttl: Some(Duration::from_secs(5)),
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let store_timeout = parse_u64("INCASA_STORE_TIMEOUT_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);
        let cache_ttl = match parse_u64("INCASA_CACHE_TTL_MS") {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.cache_ttl,
        };
        let data_dir = lookup("INCASA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let compact_threshold =
            parse_u64("INCASA_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold);
        let metrics_port = lookup("INCASA_METRICS_PORT").and_then(|s| s.trim().parse().ok());

        Self {
            store_timeout,
            cache_ttl,
            data_dir,
            compact_threshold,
            metrics_port,
        }
    }

    /// WAL file inside `data_dir`.
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("incasa.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> EngineConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config_from(&[]), EngineConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let cfg = config_from(&[
            ("INCASA_STORE_TIMEOUT_MS", "250"),
            ("INCASA_CACHE_TTL_MS", "1500"),
            ("INCASA_DATA_DIR", "/var/lib/incasa"),
            ("INCASA_COMPACT_THRESHOLD", "42"),
            ("INCASA_METRICS_PORT", "9100"),
        ]);
        assert_eq!(cfg.store_timeout, Duration::from_millis(250));
        assert_eq!(cfg.cache_ttl, Some(Duration::from_millis(1500)));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/incasa/incasa.wal"));
        assert_eq!(cfg.compact_threshold, 42);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn zero_ttl_disables_cache() {
        assert_eq!(config_from(&[("INCASA_CACHE_TTL_MS", "0")]).cache_ttl, None);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = config_from(&[
            ("INCASA_STORE_TIMEOUT_MS", "soon"),
            ("INCASA_METRICS_PORT", "99999"),
        ]);
        assert_eq!(cfg.store_timeout, EngineConfig::default().store_timeout);
        assert_eq!(cfg.metrics_port, None);
    }
}
