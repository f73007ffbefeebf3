pub mod prices;
pub mod tiered;

pub use prices::{CachedPriceSource, PriceCache, PriceCacheStats, PriceSource};
pub use tiered::TieredCache;
