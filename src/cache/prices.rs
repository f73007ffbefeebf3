use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AggregatorError;

const PRICE_PREFIX: &str = "prices:";
const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(300);

/// Raw price-lookup capability. Implemented by the Birdeye client; the
/// cached decorator composes over this seam instead of patching methods on
/// the provider.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self, symbol: &str) -> Result<f64>;

    /// Batched lookup. Symbols that fail to resolve are omitted from the
    /// result rather than failing the whole batch.
    async fn fetch_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PriceEntry {
    value: f64,
    written_at_ms: i64,
    ttl_ms: u64,
}

impl PriceEntry {
    fn new(value: f64, ttl: Duration) -> Self {
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

/// Durable TTL store for the small fixed basket of reference prices.
/// Lifecycle is independent from the facet cache: shorter TTL, refreshed in
/// bulk. Store errors degrade to a miss/no-op.
#[derive(Debug, Clone)]
pub struct PriceCache {
    tree: sled::Tree,
    default_ttl: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceCacheStats {
    pub total_keys: usize,
    pub keys: Vec<String>,
}

impl PriceCache {
    pub fn new(db: &sled::Db) -> Result<Self> {
        Self::with_ttl(db, DEFAULT_PRICE_TTL)
    }

    pub fn with_ttl(db: &sled::Db, default_ttl: Duration) -> Result<Self> {
        let tree = db
            .open_tree("prices")
            .map_err(|e| AggregatorError::CacheError(format!("open price tree: {}", e)))?;
        Ok(Self { tree, default_ttl })
    }

    fn format_key(symbol: &str) -> String {
        format!("{}{}", PRICE_PREFIX, symbol.to_lowercase())
    }

    pub fn get_price(&self, symbol: &str) -> Option<f64> {
        let key = Self::format_key(symbol);
        match self.tree.get(key.as_bytes()) {
            Ok(Some(bytes)) => match serde_json::from_slice::<PriceEntry>(&bytes) {
                Ok(entry) if entry.is_fresh() => Some(entry.value),
                Ok(_) => {
                    let _ = self.tree.remove(key.as_bytes());
                    None
                }
                Err(e) => {
                    warn!("Error parsing cached price for {}: {}", symbol, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Error fetching price for {}: {}", symbol, e);
                None
            }
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64, ttl: Option<Duration>) {
        let entry = PriceEntry::new(price, ttl.unwrap_or(self.default_ttl));
        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Err(e) = self.tree.insert(Self::format_key(symbol).as_bytes(), bytes) {
                    warn!("Error setting price for {}: {}", symbol, e);
                }
            }
            Err(e) => warn!("Error encoding price for {}: {}", symbol, e),
        }
    }

    /// Writes the whole basket in one sled batch with the default TTL.
    /// Atomic from the caller's point of view; per-key expiries stay
    /// independent once written.
    pub fn set_bulk_prices(&self, prices: &HashMap<String, f64>) {
        let mut batch = sled::Batch::default();
        for (symbol, price) in prices {
            let entry = PriceEntry::new(*price, self.default_ttl);
            match serde_json::to_vec(&entry) {
                Ok(bytes) => batch.insert(Self::format_key(symbol).as_bytes(), bytes),
                Err(e) => warn!("Error encoding bulk price for {}: {}", symbol, e),
            }
        }

        if let Err(e) = self.tree.apply_batch(batch) {
            warn!("Error setting bulk prices: {}", e);
        }
    }

    pub fn stats(&self) -> PriceCacheStats {
        let keys: Vec<String> = self
            .tree
            .scan_prefix(PRICE_PREFIX.as_bytes())
            .keys()
            .filter_map(|key| key.ok())
            .map(|key| String::from_utf8_lossy(&key).to_string())
            .collect();
        PriceCacheStats {
            total_keys: keys.len(),
            keys,
        }
    }
}

/// Read-through decorator composing the price cache in front of a raw
/// source. A single-symbol lookup only reaches the source on a cache miss;
/// a multi-symbol lookup batches the raw fetch for the miss set only, so a
/// warm basket costs zero round-trips.
pub struct CachedPriceSource<S: PriceSource> {
    source: S,
    cache: PriceCache,
}

impl<S: PriceSource> CachedPriceSource<S> {
    pub fn new(source: S, cache: PriceCache) -> Self {
        Self { source, cache }
    }

    pub async fn get_price(&self, symbol: &str) -> Result<f64> {
        if let Some(price) = self.cache.get_price(symbol) {
            debug!("Price cache hit for {}", symbol);
            return Ok(price);
        }

        let price = self.source.fetch_price(symbol).await?;
        self.cache.set_price(symbol, price, None);
        Ok(price)
    }

    pub async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let mut prices = HashMap::new();
        let mut missed = Vec::new();

        for symbol in symbols {
            match self.cache.get_price(symbol) {
                Some(price) => {
                    prices.insert(symbol.clone(), price);
                }
                None => missed.push(symbol.clone()),
            }
        }

        if !missed.is_empty() {
            debug!("Price cache misses: {:?}", missed);
            let fetched = self.source.fetch_prices(&missed).await?;
            self.cache.set_bulk_prices(&fetched);
            prices.extend(fetched);
        }

        Ok(prices)
    }

    pub fn stats(&self) -> PriceCacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingSource {
        calls: AtomicUsize,
        batch_requests: Mutex<Vec<Vec<String>>>,
        price: f64,
    }

    impl CountingSource {
        fn new(price: f64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                batch_requests: Mutex::new(Vec::new()),
                price,
            }
        }
    }

    #[async_trait]
    impl PriceSource for CountingSource {
        async fn fetch_price(&self, _symbol: &str) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.price)
        }

        async fn fetch_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_requests.lock().unwrap().push(symbols.to_vec());
            Ok(symbols.iter().map(|s| (s.clone(), self.price)).collect())
        }
    }

    fn open_cache() -> (tempfile::TempDir, PriceCache) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let cache = PriceCache::new(&db).unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn bulk_write_serves_reads_without_fetch() {
        let (_dir, cache) = open_cache();
        let source = CountingSource::new(0.0);
        let cached = CachedPriceSource::new(source, cache);

        let mut basket = HashMap::new();
        basket.insert("SOL".to_string(), 100.0);
        basket.insert("BTC".to_string(), 50_000.0);
        cached.cache.set_bulk_prices(&basket);

        let price = cached.get_price("SOL").await.unwrap();
        assert_eq!(price, 100.0);
        assert_eq!(cached.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_price_triggers_exactly_one_fetch_and_set() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        // Zero TTL: everything written is immediately stale.
        let cache = PriceCache::with_ttl(&db, Duration::ZERO).unwrap();
        cache.set_price("SOL", 100.0, Some(Duration::ZERO));

        let source = CountingSource::new(123.0);
        let cached = CachedPriceSource::new(source, cache);

        let price = cached.get_price("SOL").await.unwrap();
        assert_eq!(price, 123.0);
        assert_eq!(cached.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_refetch_is_served_from_cache() {
        let (_dir, cache) = open_cache();
        let source = CountingSource::new(42.0);
        let cached = CachedPriceSource::new(source, cache);

        let first = cached.get_price("ETH").await.unwrap();
        let second = cached.get_price("ETH").await.unwrap();
        assert_eq!(first, 42.0);
        assert_eq!(second, 42.0);
        assert_eq!(cached.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batched_lookup_only_fetches_misses() {
        let (_dir, cache) = open_cache();
        cache.set_price("SOL", 100.0, None);

        let source = CountingSource::new(7.0);
        let cached = CachedPriceSource::new(source, cache);

        let symbols = vec!["SOL".to_string(), "BTC".to_string(), "ETH".to_string()];
        let prices = cached.get_prices(&symbols).await.unwrap();

        assert_eq!(prices["SOL"], 100.0);
        assert_eq!(prices["BTC"], 7.0);
        assert_eq!(prices["ETH"], 7.0);

        let batches = cached.source.batch_requests.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec!["BTC".to_string(), "ETH".to_string()]);
    }

    #[test]
    fn stats_reports_namespaced_keys() {
        let (_dir, cache) = open_cache();
        cache.set_price("SOL", 100.0, None);
        cache.set_price("BTC", 50_000.0, None);

        let stats = cache.stats();
        assert_eq!(stats.total_keys, 2);
        assert!(stats.keys.contains(&"prices:sol".to_string()));
    }
}
