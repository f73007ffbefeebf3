use serde::{Deserialize, Serialize};
use std::fmt;

/// Ownership facet from Birdeye's token_security endpoint.
/// Falls back to the zero-valued default when the fetch fails so snapshot
/// assembly never blocks on this facet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenSecurityData {
    pub owner_balance: f64,
    pub creator_balance: f64,
    pub owner_percentage: f64,
    pub creator_percentage: f64,
    #[serde(rename = "top10HolderBalance")]
    pub top10_holder_balance: f64,
    #[serde(rename = "top10HolderPercent")]
    pub top10_holder_percent: f64,
}

/// Per-window trade statistics. Prior-period values and percent changes are
/// `None` when the source reports no data for the window; that is distinct
/// from a literal zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeWindow {
    pub history_price: f64,
    pub price_change_percent: Option<f64>,
    pub trades: u64,
    pub trades_prior: Option<u64>,
    pub trades_change_percent: Option<f64>,
    pub buys: u64,
    pub buys_prior: Option<u64>,
    pub buys_change_percent: Option<f64>,
    pub sells: u64,
    pub sells_prior: Option<u64>,
    pub sells_change_percent: Option<f64>,
    pub unique_wallets: u64,
    pub unique_wallets_prior: Option<u64>,
    pub unique_wallets_change_percent: Option<f64>,
    pub volume: f64,
    pub volume_usd: f64,
    pub volume_prior: f64,
    pub volume_prior_usd: f64,
    pub volume_change_percent: Option<f64>,
}

impl TradeWindow {
    /// Zero-valued window for the short windows (30m-4h) where the source
    /// always reports prior-period data.
    pub fn zeroed() -> Self {
        Self {
            history_price: 0.0,
            price_change_percent: Some(0.0),
            trades: 0,
            trades_prior: Some(0),
            trades_change_percent: Some(0.0),
            buys: 0,
            buys_prior: Some(0),
            buys_change_percent: Some(0.0),
            sells: 0,
            sells_prior: Some(0),
            sells_change_percent: Some(0.0),
            unique_wallets: 0,
            unique_wallets_prior: Some(0),
            unique_wallets_change_percent: Some(0.0),
            volume: 0.0,
            volume_usd: 0.0,
            volume_prior: 0.0,
            volume_prior_usd: 0.0,
            volume_change_percent: Some(0.0),
        }
    }

    /// Zero-valued window for the long windows (8h/24h) whose prior-period
    /// fields are nullable upstream.
    pub fn zeroed_nullable() -> Self {
        Self {
            history_price: 0.0,
            price_change_percent: Some(0.0),
            trades: 0,
            trades_prior: None,
            trades_change_percent: None,
            buys: 0,
            buys_prior: None,
            buys_change_percent: None,
            sells: 0,
            sells_prior: None,
            sells_change_percent: None,
            unique_wallets: 0,
            unique_wallets_prior: None,
            unique_wallets_change_percent: None,
            volume: 0.0,
            volume_usd: 0.0,
            volume_prior: 0.0,
            volume_prior_usd: 0.0,
            volume_change_percent: None,
        }
    }
}

/// The 6h/12h windows only carry price history upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceWindow {
    pub history_price: f64,
    pub price_change_percent: f64,
}

/// Trade metrics facet from Birdeye's token_overview endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTradeData {
    pub address: String,
    pub holder: u64,
    pub market: u64,
    pub last_trade_unix_time: i64,
    pub price: f64,
    pub m30: TradeWindow,
    pub h1: TradeWindow,
    pub h2: TradeWindow,
    pub h4: TradeWindow,
    pub h6: PriceWindow,
    pub h8: TradeWindow,
    pub h12: PriceWindow,
    pub h24: TradeWindow,
}

impl TokenTradeData {
    /// Documented default returned when the trade facet cannot be fetched.
    pub fn default_for(address: &str) -> Self {
        Self {
            address: address.to_string(),
            holder: 0,
            market: 0,
            last_trade_unix_time: 0,
            price: 0.0,
            m30: TradeWindow::zeroed(),
            h1: TradeWindow::zeroed(),
            h2: TradeWindow::zeroed(),
            h4: TradeWindow::zeroed(),
            h6: PriceWindow::default(),
            h8: TradeWindow::zeroed_nullable(),
            h12: PriceWindow::default(),
            h24: TradeWindow::zeroed_nullable(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairToken {
    pub address: String,
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairLiquidity {
    pub usd: f64,
    pub base: f64,
    pub quote: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairVolume {
    pub h24: f64,
    pub h6: f64,
    pub h1: f64,
    pub m5: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairBoosts {
    pub active: u32,
}

/// One venue's view of the token, as returned by DexScreener search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DexScreenerPair {
    pub chain_id: String,
    pub dex_id: String,
    pub url: String,
    pub pair_address: String,
    pub base_token: PairToken,
    pub quote_token: PairToken,
    pub price_native: Option<String>,
    pub price_usd: Option<String>, // DexScreener serializes prices as strings
    pub volume: PairVolume,
    pub liquidity: Option<PairLiquidity>,
    pub market_cap: Option<f64>,
    pub fdv: Option<f64>,
    pub boosts: Option<PairBoosts>,
}

impl DexScreenerPair {
    pub fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().map(|l| l.usd).unwrap_or(0.0)
    }

    pub fn price_usd(&self) -> f64 {
        self.price_usd
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0.0)
    }

    pub fn is_boosted(&self) -> bool {
        self.boosts.as_ref().map(|b| b.active > 0).unwrap_or(false)
    }
}

/// Liquidity facet: the ordered list of venue pairs for one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexScreenerData {
    pub schema_version: String,
    #[serde(default)]
    pub pairs: Vec<DexScreenerPair>,
}

impl Default for DexScreenerData {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            pairs: Vec::new(),
        }
    }
}

impl DexScreenerData {
    /// Pair with the highest liquidity, breaking ties by market cap.
    pub fn highest_liquidity_pair(&self) -> Option<&DexScreenerPair> {
        self.pairs.iter().max_by(|a, b| {
            a.liquidity_usd()
                .partial_cmp(&b.liquidity_usd())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.market_cap
                        .unwrap_or(0.0)
                        .partial_cmp(&b.market_cap.unwrap_or(0.0))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        })
    }
}

/// Registry metadata facet from the Codex GraphQL API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCodex {
    pub id: String,
    pub address: String,
    pub cmc_id: Option<i64>,
    pub decimals: u8,
    pub name: String,
    pub symbol: String,
    pub total_supply: String,
    pub circulating_supply: String,
    pub image_thumb_url: Option<String>,
    pub blue_checkmark: bool,
    pub is_scam: bool,
}

impl TokenCodex {
    /// Documented default returned when the metadata facet cannot be fetched.
    pub fn default_for(address: &str) -> Self {
        Self {
            id: String::new(),
            address: address.to_string(),
            cmc_id: None,
            decimals: 9, // SPL default
            name: String::new(),
            symbol: String::new(),
            total_supply: "0".to_string(),
            circulating_supply: "0".to_string(),
            image_thumb_url: None,
            blue_checkmark: false,
            is_scam: false,
        }
    }
}

/// One distinct owner with balances summed across all of its token accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderData {
    pub address: String,
    pub balance: f64,
}

/// Holder whose position is worth more than the high-value threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighValueHolder {
    pub address: String,
    pub balance_usd: f64,
}

/// Direction of unique-wallet movement averaged across the trade windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolderTrend {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

impl fmt::Display for HolderTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderTrend::Increasing => write!(f, "increasing"),
            HolderTrend::Decreasing => write!(f, "decreasing"),
            HolderTrend::Stable => write!(f, "stable"),
        }
    }
}

/// The merged read-model assembled fresh per request. Never cached as a unit;
/// only its constituent facets are cached individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedTokenData {
    pub security: TokenSecurityData,
    pub trade_data: TokenTradeData,
    pub holder_distribution_trend: HolderTrend,
    pub high_value_holders: Vec<HighValueHolder>,
    pub recent_trades: bool,
    pub high_supply_holders_count: usize,
    pub dex_screener_data: DexScreenerData,
    pub is_dex_screener_listed: bool,
    pub is_dex_screener_paid: bool,
    pub token_codex: TokenCodex,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(liquidity: f64, market_cap: f64) -> DexScreenerPair {
        DexScreenerPair {
            liquidity: Some(PairLiquidity {
                usd: liquidity,
                ..Default::default()
            }),
            market_cap: Some(market_cap),
            ..Default::default()
        }
    }

    #[test]
    fn highest_liquidity_pair_prefers_liquidity_then_market_cap() {
        let data = DexScreenerData {
            schema_version: "1.0.0".to_string(),
            pairs: vec![pair(100.0, 9_000_000.0), pair(500.0, 1_000.0), pair(500.0, 2_000.0)],
        };
        let best = data.highest_liquidity_pair().unwrap();
        assert_eq!(best.liquidity_usd(), 500.0);
        assert_eq!(best.market_cap, Some(2_000.0));
    }

    #[test]
    fn default_trade_data_keeps_long_windows_nullable() {
        let data = TokenTradeData::default_for("Mint111");
        assert_eq!(data.m30.trades_change_percent, Some(0.0));
        assert!(data.h24.trades_change_percent.is_none());
        assert!(data.h8.unique_wallets_prior.is_none());
    }

    #[test]
    fn dex_pair_parses_string_price() {
        let json = r#"{
            "chainId": "solana",
            "dexId": "raydium",
            "url": "https://dexscreener.com/solana/pair",
            "pairAddress": "Pair111",
            "priceUsd": "0.0042",
            "liquidity": { "usd": 1234.5 },
            "marketCap": 99000.0,
            "boosts": { "active": 1 }
        }"#;
        let pair: DexScreenerPair = serde_json::from_str(json).unwrap();
        assert!((pair.price_usd() - 0.0042).abs() < 1e-12);
        assert_eq!(pair.liquidity_usd(), 1234.5);
        assert!(pair.is_boosted());
    }
}
