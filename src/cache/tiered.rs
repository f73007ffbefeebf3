use anyhow::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::AggregatorError;

/// A cached value with its write time and TTL. Valid iff
/// `now < written_at + ttl`; invalid entries are treated as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: serde_json::Value,
    written_at_ms: i64,
    ttl_ms: u64,
}

impl CacheEntry {
    fn new(value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            value,
            written_at_ms: Utc::now().timestamp_millis(),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    fn is_fresh(&self) -> bool {
        Utc::now().timestamp_millis() < self.written_at_ms + self.ttl_ms as i64
    }
}

/// Cache-aside store with a fast in-process tier and a durable sled tier.
///
/// Reads check the fast tier first, then the durable tier (backfilling the
/// fast tier on hit). Writes go to both tiers. Durable-tier and
/// serialization errors are logged and degrade to a miss/no-op; the fast
/// tier is the correctness-critical layer for a single process's lifetime.
///
/// Known gap, kept for parity with the upstream design: there is no per-key
/// single-flight, so concurrent misses for one key each trigger a fetch.
/// A hit never triggers a network call.
#[derive(Debug, Clone)]
pub struct TieredCache {
    memory: Arc<RwLock<HashMap<String, CacheEntry>>>,
    durable: sled::Tree,
    default_ttl: Duration,
}

impl TieredCache {
    /// Opens the namespace's tree in the shared sled database. Namespacing
    /// by facet-kind-qualified keys inside a per-domain tree keeps facet
    /// types from colliding.
    pub fn new(db: &sled::Db, namespace: &str, default_ttl: Duration) -> Result<Self> {
        let durable = db
            .open_tree(namespace)
            .map_err(|e| AggregatorError::CacheError(format!("open tree {}: {}", namespace, e)))?;
        Ok(Self {
            memory: Arc::new(RwLock::new(HashMap::new())),
            durable,
            default_ttl,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let stale_in_memory = {
            let memory = self.memory.read().await;
            match memory.get(key) {
                Some(entry) if entry.is_fresh() => {
                    match serde_json::from_value(entry.value.clone()) {
                        Ok(value) => {
                            debug!("Fast-tier hit for {}", key);
                            return Some(value);
                        }
                        Err(e) => {
                            warn!("Error decoding fast-tier entry for {}: {}", key, e);
                            false
                        }
                    }
                }
                Some(_) => true,
                None => false,
            }
        };

        let Some(entry) = self.read_durable(key) else {
            // Expired fast-tier entries are dropped, matching read_durable.
            if stale_in_memory {
                self.memory.write().await.remove(key);
            }
            return None;
        };
        let decoded = match serde_json::from_value(entry.value.clone()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Error decoding durable entry for {}: {}", key, e);
                return None;
            }
        };

        // Write-through on read so the next lookup stays in-process.
        let mut memory = self.memory.write().await;
        memory.insert(key.to_string(), entry);
        debug!("Durable-tier hit for {}, fast tier backfilled", key);
        Some(decoded)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!("Error serializing cache entry for {}: {}", key, e);
                return;
            }
        };
        let entry = CacheEntry::new(value, ttl);

        {
            let mut memory = self.memory.write().await;
            memory.insert(key.to_string(), entry.clone());
        }

        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Err(e) = self.durable.insert(key.as_bytes(), bytes) {
                    warn!("Error writing to durable cache for {}: {}", key, e);
                }
            }
            Err(e) => warn!("Error encoding durable entry for {}: {}", key, e),
        }
    }

    pub async fn delete(&self, key: &str) {
        let mut memory = self.memory.write().await;
        memory.remove(key);
        drop(memory);

        if let Err(e) = self.durable.remove(key.as_bytes()) {
            warn!("Error deleting durable entry for {}: {}", key, e);
        }
    }

    fn read_durable(&self, key: &str) -> Option<CacheEntry> {
        match self.durable.get(key.as_bytes()) {
            Ok(Some(bytes)) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) if entry.is_fresh() => Some(entry),
                Ok(_) => {
                    // Expired entries are treated as absent and dropped.
                    let _ = self.durable.remove(key.as_bytes());
                    None
                }
                Err(e) => {
                    warn!("Error parsing durable entry for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Error reading from durable cache for {}: {}", key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Facet {
        score: u32,
    }

    fn open_db() -> (tempfile::TempDir, sled::Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (_dir, db) = open_db();
        let cache = TieredCache::new(&db, "tokens", Duration::from_secs(600)).unwrap();

        cache.set("token_security_Mint111", &Facet { score: 7 }, None).await;
        let value: Option<Facet> = cache.get("token_security_Mint111").await;
        assert_eq!(value, Some(Facet { score: 7 }));
    }

    #[tokio::test]
    async fn expired_entry_is_absent() {
        let (_dir, db) = open_db();
        let cache = TieredCache::new(&db, "tokens", Duration::from_secs(600)).unwrap();

        cache
            .set("token_security_Mint111", &Facet { score: 7 }, Some(Duration::ZERO))
            .await;
        let value: Option<Facet> = cache.get("token_security_Mint111").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_from_the_fast_tier() {
        let (_dir, db) = open_db();
        let cache = TieredCache::new(&db, "tokens", Duration::from_secs(600)).unwrap();

        cache
            .set("token_security_Mint111", &Facet { score: 7 }, Some(Duration::ZERO))
            .await;
        assert_eq!(cache.memory.read().await.len(), 1);

        let value: Option<Facet> = cache.get("token_security_Mint111").await;
        assert!(value.is_none());
        // The expired-then-missed key is gone from the map, not just masked.
        assert!(cache.memory.read().await.is_empty());
    }

    #[tokio::test]
    async fn durable_tier_survives_process_restart() {
        let (_dir, db) = open_db();
        {
            let cache = TieredCache::new(&db, "tokens", Duration::from_secs(600)).unwrap();
            cache.set("token_codex_Mint111", &Facet { score: 3 }, None).await;
        }

        // Fresh instance with an empty fast tier reads through to sled.
        let cache = TieredCache::new(&db, "tokens", Duration::from_secs(600)).unwrap();
        let value: Option<Facet> = cache.get("token_codex_Mint111").await;
        assert_eq!(value, Some(Facet { score: 3 }));
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let (_dir, db) = open_db();
        let tokens = TieredCache::new(&db, "tokens", Duration::from_secs(600)).unwrap();
        let other = TieredCache::new(&db, "other", Duration::from_secs(600)).unwrap();

        tokens.set("key", &Facet { score: 1 }, None).await;
        other.set("key", &Facet { score: 2 }, None).await;

        let from_tokens: Option<Facet> = tokens.get("key").await;
        let from_other: Option<Facet> = other.get("key").await;
        assert_eq!(from_tokens, Some(Facet { score: 1 }));
        assert_eq!(from_other, Some(Facet { score: 2 }));
    }

    #[tokio::test]
    async fn delete_clears_both_tiers() {
        let (_dir, db) = open_db();
        let cache = TieredCache::new(&db, "tokens", Duration::from_secs(600)).unwrap();

        cache.set("key", &Facet { score: 1 }, None).await;
        cache.delete("key").await;
        let value: Option<Facet> = cache.get("key").await;
        assert!(value.is_none());
    }
}
