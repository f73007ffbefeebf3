use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub birdeye_api_key: String,
    pub codex_api_key: Option<String>,  // Optional, metadata facet degrades without it
    pub helius_api_key: String,

    /// Directory for the sled database backing the durable cache tier.
    pub cache_dir: PathBuf,

    /// TTL applied to facet cache entries, in seconds.
    pub facet_ttl_secs: u64,
    /// TTL applied to reference price entries, in seconds.
    pub price_ttl_secs: u64,

    /// Page ceiling for holder pagination. The upstream default of 2 silently
    /// truncates holder sets for widely-held tokens; raise HOLDER_PAGE_LIMIT
    /// if complete holder lists matter more than Helius rate budget.
    pub holder_page_limit: usize,
    /// Accounts requested per holder page.
    pub holder_page_size: u32,

    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            birdeye_api_key: env::var("BIRDEYE_API_KEY")
                .context("BIRDEYE_API_KEY not set in environment")?,
            codex_api_key: env::var("CODEX_API_KEY").ok(), // Optional
            helius_api_key: env::var("HELIUS_API_KEY")
                .context("HELIUS_API_KEY not set in environment")?,

            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/token-cache")),

            facet_ttl_secs: env::var("FACET_TTL_SECS")
                .unwrap_or_else(|_| "600".to_string()) // 10 minutes
                .parse()
                .unwrap_or(600),
            price_ttl_secs: env::var("PRICE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string()) // 5 minutes
                .parse()
                .unwrap_or(300),

            holder_page_limit: env::var("HOLDER_PAGE_LIMIT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            holder_page_size: env::var("HOLDER_PAGE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),

            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            retry_base_delay_ms: env::var("RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .unwrap_or(2000),
        })
    }
}
