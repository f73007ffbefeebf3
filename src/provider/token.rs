//! Token data provider
//!
//! Assembles the per-token snapshot from four independently cached facets
//! (security, trade metrics, liquidity pairs, registry metadata) plus
//! holder-derived statistics. A facet fetch failure degrades that facet to
//! its typed default; holder aggregation failures are the one exception and
//! propagate from `fetch_holder_list`.

use anyhow::Result;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::birdeye::{BirdeyeClient, REFERENCE_TOKENS};
use crate::api::codex::CodexClient;
use crate::api::dexscreener::DexScreenerClient;
use crate::api::fetch::RetryClient;
use crate::api::helius::HeliusClient;
use crate::cache::prices::PriceCache;
use crate::cache::tiered::TieredCache;
use crate::config::Config;
use crate::error::AggregatorError;
use crate::models::token::{
    DexScreenerData, DexScreenerPair, HighValueHolder, HolderData, HolderTrend,
    ProcessedTokenData, TokenCodex, TokenSecurityData, TokenTradeData,
};

const TOKEN_CACHE_NAMESPACE: &str = "solana/tokens";

/// Holders worth more than this in USD count as high-value.
const HIGH_VALUE_THRESHOLD_USD: f64 = 5.0;
/// Holders above this fraction of supply count as high-supply.
const HIGH_SUPPLY_FRACTION: f64 = 0.02;

/// Canonicalizes a base58 mint address (trim + decode to 32 bytes +
/// re-encode).
pub fn normalize_address(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let bytes = bs58::decode(trimmed)
        .into_vec()
        .map_err(|e| AggregatorError::InvalidAddress(format!("{}: {}", trimmed, e)))?;
    if bytes.len() != 32 {
        return Err(AggregatorError::InvalidAddress(format!(
            "{}: expected 32 bytes, got {}",
            trimmed,
            bytes.len()
        ))
        .into());
    }
    Ok(bs58::encode(bytes).into_string())
}

/// Shared collaborators, constructed once and injected. Lifecycle is
/// explicit: build a context, hand it to as many providers as needed, drop
/// it when done.
#[derive(Clone)]
pub struct ProviderContext {
    pub birdeye: Arc<BirdeyeClient>,
    pub codex: Arc<CodexClient>,
    pub dexscreener: Arc<DexScreenerClient>,
    pub helius: Arc<HeliusClient>,
    pub cache: TieredCache,
    pub prices: PriceCache,
    pub holder_page_limit: usize,
    pub holder_page_size: u32,
}

impl ProviderContext {
    /// Builds the full client set and opens the durable cache from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db = sled::open(&config.cache_dir).map_err(|e| {
            AggregatorError::CacheError(format!("open {}: {}", config.cache_dir.display(), e))
        })?;
        let fetcher = RetryClient::new(
            config.max_retries,
            std::time::Duration::from_millis(config.retry_base_delay_ms),
        );
        let cache = TieredCache::new(
            &db,
            TOKEN_CACHE_NAMESPACE,
            std::time::Duration::from_secs(config.facet_ttl_secs),
        )?;
        let prices =
            PriceCache::with_ttl(&db, std::time::Duration::from_secs(config.price_ttl_secs))?;

        Ok(Self {
            birdeye: Arc::new(BirdeyeClient::new(&config.birdeye_api_key, fetcher.clone())),
            codex: Arc::new(CodexClient::new(
                config.codex_api_key.as_deref().unwrap_or_default(),
                fetcher.clone(),
            )),
            dexscreener: Arc::new(DexScreenerClient::new(fetcher)),
            helius: Arc::new(HeliusClient::new(&config.helius_api_key)),
            cache,
            prices,
            holder_page_limit: config.holder_page_limit,
            holder_page_size: config.holder_page_size,
        })
    }
}

pub struct TokenProvider {
    /// Canonical when normalization succeeded; the raw input otherwise.
    /// Operations that strictly need an address fail explicitly when None.
    address: Option<String>,
    ctx: ProviderContext,
}

impl TokenProvider {
    pub fn new(address: Option<&str>, ctx: ProviderContext) -> Self {
        let address = address.map(|raw| match normalize_address(raw) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!("Address normalization failed, keeping raw form: {:#}", e);
                raw.to_string()
            }
        });
        Self { address, ctx }
    }

    /// Resolves a symbol to a mint through Birdeye search and builds a
    /// provider for it. Returns None when no matching token exists.
    pub async fn from_symbol(symbol: &str, ctx: ProviderContext) -> Result<Option<Self>> {
        match ctx.birdeye.search_token_address(symbol).await? {
            Some(address) => Ok(Some(Self::new(Some(&address), ctx))),
            None => {
                warn!("Could not find token address for symbol {}", symbol);
                Ok(None)
            }
        }
    }

    pub fn token_address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    fn require_address(&self) -> Result<&str> {
        self.address.as_deref().ok_or_else(|| {
            AggregatorError::MissingAddress("operation requires a token address".to_string())
                .into()
        })
    }

    // --- Facet fetches (cache-aside through the two-tier cache) ---

    pub async fn fetch_token_security(&self) -> Result<TokenSecurityData> {
        let address = self.require_address()?;
        let cache_key = format!("token_security_{}", address);

        if let Some(cached) = self.ctx.cache.get(&cache_key).await {
            debug!("Returning cached token security data for {}", address);
            return Ok(cached);
        }

        let security = self.ctx.birdeye.fetch_token_security(address).await?;
        self.ctx.cache.set(&cache_key, &security, None).await;
        Ok(security)
    }

    pub async fn fetch_token_trade_data(&self) -> Result<TokenTradeData> {
        let address = self.require_address()?;
        let cache_key = format!("token_trade_data_{}", address);

        if let Some(cached) = self.ctx.cache.get(&cache_key).await {
            debug!("Returning cached token trade data for {}", address);
            return Ok(cached);
        }

        let trade_data = self.ctx.birdeye.fetch_token_overview(address).await?;
        self.ctx.cache.set(&cache_key, &trade_data, None).await;
        Ok(trade_data)
    }

    pub async fn fetch_token_codex(&self) -> Result<TokenCodex> {
        let address = self.require_address()?;
        let cache_key = format!("token_codex_{}", address);

        if let Some(cached) = self.ctx.cache.get(&cache_key).await {
            debug!("Returning cached token metadata for {}", address);
            return Ok(cached);
        }

        let codex = self.ctx.codex.fetch_token_metadata(address).await?;
        self.ctx.cache.set(&cache_key, &codex, None).await;
        Ok(codex)
    }

    pub async fn fetch_dex_screener_data(&self) -> Result<DexScreenerData> {
        let address = self.require_address()?;
        let cache_key = format!("dex_screener_{}", address);

        if let Some(cached) = self.ctx.cache.get(&cache_key).await {
            debug!("Returning cached DexScreener data for {}", address);
            return Ok(cached);
        }

        let dex_data = self.ctx.dexscreener.search(address).await?;
        self.ctx.cache.set(&cache_key, &dex_data, None).await;
        Ok(dex_data)
    }

    /// Symbol search against DexScreener, returning the deepest pair.
    pub async fn search_dex_screener_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<DexScreenerPair>> {
        let cache_key = format!("dex_screener_search_{}", symbol);

        if let Some(cached) = self.ctx.cache.get::<DexScreenerData>(&cache_key).await {
            debug!("Returning cached DexScreener search for {}", symbol);
            return Ok(cached.highest_liquidity_pair().cloned());
        }

        let dex_data = self.ctx.dexscreener.search(symbol).await?;
        self.ctx.cache.set(&cache_key, &dex_data, None).await;
        Ok(dex_data.highest_liquidity_pair().cloned())
    }

    /// Fetches the fixed reference basket (SOL/BTC/ETH) concurrently,
    /// tolerating per-symbol failures. Only cached when at least one price
    /// came back non-zero.
    pub async fn fetch_prices(&self) -> Result<HashMap<String, f64>> {
        const CACHE_KEY: &str = "prices";

        if let Some(cached) = self.ctx.cache.get(CACHE_KEY).await {
            debug!("Returning cached reference prices");
            return Ok(cached);
        }

        let lookups = REFERENCE_TOKENS.iter().map(|(symbol, mint)| async move {
            (*symbol, self.ctx.birdeye.fetch_price_by_address(mint).await)
        });

        let mut prices = HashMap::new();
        for (symbol, result) in join_all(lookups).await {
            match result {
                Ok(price) => {
                    prices.insert(symbol.to_string(), price);
                }
                Err(e) => warn!("Error fetching reference price for {}: {:#}", symbol, e),
            }
        }

        if prices.values().any(|price| *price != 0.0) {
            self.ctx.cache.set(CACHE_KEY, &prices, None).await;
        } else {
            warn!("No valid reference prices fetched, not caching empty results");
        }
        Ok(prices)
    }

    // --- Holder aggregation ---

    /// Collects the holder list through cursor pagination, summing balances
    /// per owner since one owner may hold several token accounts.
    ///
    /// Stops on an empty page, a missing cursor, or the configured page
    /// ceiling. The default ceiling of 2 truncates widely-held tokens; the
    /// truncation is logged when it happens.
    ///
    /// Unlike the other facets, failures here propagate to the caller.
    pub async fn fetch_holder_list(&self) -> Result<Vec<HolderData>> {
        let address = self.require_address()?;
        let cache_key = format!("holder_list_{}", address);

        if let Some(cached) = self.ctx.cache.get(&cache_key).await {
            debug!("Returning cached holder list for {}", address);
            return Ok(cached);
        }

        let mut balances: HashMap<String, f64> = HashMap::new();
        let mut cursor: Option<String> = None;
        let mut page = 1;

        loop {
            if page > self.ctx.holder_page_limit {
                warn!(
                    "Holder pagination for {} stopped at the page ceiling ({}); holder set may be truncated",
                    address, self.ctx.holder_page_limit
                );
                break;
            }

            debug!("Fetching holders for {} - page {}", address, page);
            let response = self
                .ctx
                .helius
                .get_token_accounts(address, cursor.as_deref(), self.ctx.holder_page_size)
                .await
                .map_err(|e| AggregatorError::HolderFetch(format!("{:#}", e)))?;

            if response.token_accounts.is_empty() {
                debug!("No more holders found. Total pages fetched: {}", page - 1);
                break;
            }

            debug!(
                "Processing {} accounts from page {}",
                response.token_accounts.len(),
                page
            );
            for account in response.token_accounts {
                *balances.entry(account.owner).or_insert(0.0) += account.amount;
            }

            match response.cursor {
                Some(next) => cursor = Some(next),
                None => break, // end of data
            }
            page += 1;
        }

        let holders: Vec<HolderData> = balances
            .into_iter()
            .map(|(address, balance)| HolderData { address, balance })
            .collect();
        info!("Total unique holders fetched for {}: {}", address, holders.len());

        self.ctx.cache.set(&cache_key, &holders, None).await;
        Ok(holders)
    }

    // --- Derived fields ---

    /// Averages unique-wallet change across the trade windows and buckets
    /// the result.
    pub fn analyze_holder_distribution(&self, trade_data: &TokenTradeData) -> HolderTrend {
        let changes: Vec<f64> = [
            trade_data.m30.unique_wallets_change_percent,
            trade_data.h1.unique_wallets_change_percent,
            trade_data.h2.unique_wallets_change_percent,
            trade_data.h4.unique_wallets_change_percent,
            trade_data.h8.unique_wallets_change_percent,
            trade_data.h24.unique_wallets_change_percent,
        ]
        .into_iter()
        .flatten()
        .filter(|change| !change.is_nan())
        .collect();

        if changes.is_empty() {
            return HolderTrend::Stable;
        }

        let average = changes.iter().sum::<f64>() / changes.len() as f64;
        if average > 10.0 {
            HolderTrend::Increasing
        } else if average < -10.0 {
            HolderTrend::Decreasing
        } else {
            HolderTrend::Stable
        }
    }

    /// Holders whose position is worth more than $5 at the current price.
    /// Depends on the holder list, so failures propagate like
    /// `fetch_holder_list`.
    pub async fn filter_high_value_holders(
        &self,
        trade_data: &TokenTradeData,
    ) -> Result<Vec<HighValueHolder>> {
        if trade_data.price <= 0.0 {
            warn!("No valid trade data available for filtering high value holders");
            return Ok(Vec::new());
        }

        let holders = self.fetch_holder_list().await?;
        Ok(holders
            .into_iter()
            .filter_map(|holder| {
                let balance_usd = holder.balance * trade_data.price;
                (balance_usd > HIGH_VALUE_THRESHOLD_USD).then_some(HighValueHolder {
                    address: holder.address,
                    balance_usd,
                })
            })
            .collect())
    }

    pub fn check_recent_trades(&self, trade_data: &TokenTradeData) -> bool {
        trade_data.h24.volume_usd > 0.0
    }

    /// Counts holders above 2% of supply, where supply is approximated by
    /// owner+creator balance as the security facet reports it.
    pub async fn count_high_supply_holders(
        &self,
        security: &TokenSecurityData,
    ) -> Result<usize> {
        let total_supply = security.owner_balance + security.creator_balance;
        if total_supply <= 0.0 {
            warn!("Security data missing for high supply holders count");
            return Ok(0);
        }

        let holders = self.fetch_holder_list().await?;
        Ok(holders
            .iter()
            .filter(|holder| holder.balance / total_supply > HIGH_SUPPLY_FRACTION)
            .count())
    }

    // --- Snapshot assembly ---

    /// Assembles the full snapshot. Facet failures degrade to the facet's
    /// documented default; holder-derived fields degrade to empty/zero when
    /// holder aggregation fails. Partial data beats no data here.
    pub async fn get_processed_token_data(&self) -> Result<ProcessedTokenData> {
        let address = self.require_address()?.to_string();
        debug!("Assembling processed token data for {}", address);

        let (security_res, codex_res, trade_res, dex_res) = tokio::join!(
            self.fetch_token_security(),
            self.fetch_token_codex(),
            self.fetch_token_trade_data(),
            self.fetch_dex_screener_data(),
        );

        let security = security_res.unwrap_or_else(|e| {
            warn!("Error fetching security data: {:#}", e);
            TokenSecurityData::default()
        });
        let token_codex = codex_res.unwrap_or_else(|e| {
            warn!("Error fetching token metadata: {:#}", e);
            TokenCodex::default_for(&address)
        });
        let trade_data = match trade_res {
            Ok(data) if data.price > 0.0 => data,
            Ok(_) => {
                // A cached zero-price entry is useless; drop it and retry once.
                warn!("Invalid trade data received, fetching fresh data");
                self.ctx
                    .cache
                    .delete(&format!("token_trade_data_{}", address))
                    .await;
                match self.fetch_token_trade_data().await {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Error refetching trade data: {:#}", e);
                        TokenTradeData::default_for(&address)
                    }
                }
            }
            Err(e) => {
                warn!("Error fetching trade data: {:#}", e);
                TokenTradeData::default_for(&address)
            }
        };
        let dex_screener_data = dex_res.unwrap_or_else(|e| {
            warn!("Error fetching DexScreener data: {:#}", e);
            DexScreenerData::default()
        });

        let holder_distribution_trend = self.analyze_holder_distribution(&trade_data);
        let high_value_holders = match self.filter_high_value_holders(&trade_data).await {
            Ok(holders) => holders,
            Err(e) => {
                warn!("Holder-derived fields unavailable: {:#}", e);
                Vec::new()
            }
        };
        let recent_trades = self.check_recent_trades(&trade_data);
        let high_supply_holders_count = match self.count_high_supply_holders(&security).await {
            Ok(count) => count,
            Err(e) => {
                warn!("High supply holder count unavailable: {:#}", e);
                0
            }
        };

        let is_dex_screener_listed = !dex_screener_data.pairs.is_empty();
        let is_dex_screener_paid = dex_screener_data.pairs.iter().any(|p| p.is_boosted());

        Ok(ProcessedTokenData {
            security,
            trade_data,
            holder_distribution_trend,
            high_value_holders,
            recent_trades,
            high_supply_holders_count,
            dex_screener_data,
            is_dex_screener_listed,
            is_dex_screener_paid,
            token_codex,
        })
    }

    /// Renders the snapshot as a markdown report for downstream chat
    /// surfaces.
    pub fn format_token_report(&self, data: &ProcessedTokenData) -> String {
        let mut output = String::from("**Token Security and Trade Report**\n");
        output.push_str(&format!(
            "Token Address: {}\n\n",
            self.address.as_deref().unwrap_or("unknown")
        ));

        output.push_str("**Ownership Distribution:**\n");
        output.push_str(&format!("- Owner Balance: {}\n", data.security.owner_balance));
        output.push_str(&format!("- Creator Balance: {}\n", data.security.creator_balance));
        output.push_str(&format!("- Owner Percentage: {}%\n", data.security.owner_percentage));
        output.push_str(&format!(
            "- Creator Percentage: {}%\n",
            data.security.creator_percentage
        ));
        output.push_str(&format!(
            "- Top 10 Holders Balance: {}\n",
            data.security.top10_holder_balance
        ));
        output.push_str(&format!(
            "- Top 10 Holders Percentage: {}%\n\n",
            data.security.top10_holder_percent
        ));

        output.push_str("**Trade Data:**\n");
        output.push_str(&format!("- Holders: {}\n", data.trade_data.holder));
        output.push_str(&format!(
            "- Unique Wallets (24h): {}\n",
            data.trade_data.h24.unique_wallets
        ));
        output.push_str(&format!(
            "- Price Change (24h): {}%\n",
            data.trade_data.h24.price_change_percent.unwrap_or(0.0)
        ));
        output.push_str(&format!(
            "- Price Change (12h): {}%\n",
            data.trade_data.h12.price_change_percent
        ));
        output.push_str(&format!(
            "- Volume (24h USD): ${:.2}\n",
            data.trade_data.h24.volume_usd
        ));
        output.push_str(&format!("- Current Price: ${:.6}\n\n", data.trade_data.price));

        output.push_str(&format!(
            "**Holder Distribution Trend:** {}\n\n",
            data.holder_distribution_trend
        ));

        output.push_str("**High-Value Holders (>$5 USD):**\n");
        if data.high_value_holders.is_empty() {
            output.push_str("- No high-value holders found or data not available.\n");
        } else {
            for holder in &data.high_value_holders {
                output.push_str(&format!("- {}: ${:.2}\n", holder.address, holder.balance_usd));
            }
        }
        output.push('\n');

        output.push_str(&format!(
            "**Recent Trades (Last 24h):** {}\n\n",
            if data.recent_trades { "Yes" } else { "No" }
        ));
        output.push_str(&format!(
            "**Holders with >2% Supply:** {}\n\n",
            data.high_supply_holders_count
        ));

        output.push_str(&format!(
            "**DexScreener Listing:** {}\n",
            if data.is_dex_screener_listed { "Yes" } else { "No" }
        ));
        if data.is_dex_screener_listed {
            output.push_str(&format!(
                "- Listing Type: {}\n",
                if data.is_dex_screener_paid { "Paid" } else { "Free" }
            ));
            output.push_str(&format!(
                "- Number of DexPairs: {}\n\n",
                data.dex_screener_data.pairs.len()
            ));
            output.push_str("**DexScreener Pairs:**\n");
            for (index, pair) in data.dex_screener_data.pairs.iter().enumerate() {
                output.push_str(&format!("\n**Pair {}:**\n", index + 1));
                output.push_str(&format!("- DEX: {}\n", pair.dex_id));
                output.push_str(&format!("- URL: {}\n", pair.url));
                output.push_str(&format!("- Price USD: ${:.6}\n", pair.price_usd()));
                output.push_str(&format!("- Volume (24h USD): ${:.2}\n", pair.volume.h24));
                output.push_str(&format!(
                    "- Boosts Active: {}\n",
                    pair.boosts.as_ref().map(|b| b.active).unwrap_or(0)
                ));
                output.push_str(&format!("- Liquidity USD: ${:.2}\n", pair.liquidity_usd()));
            }
        }
        output.push('\n');

        output
    }
}
