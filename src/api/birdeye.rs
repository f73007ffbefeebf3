use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::api::fetch::RetryClient;
use crate::cache::prices::PriceSource;
use crate::error::AggregatorError;
use crate::models::token::{PriceWindow, TokenSecurityData, TokenTradeData, TradeWindow};

const BIRDEYE_BASE_URL: &str = "https://public-api.birdeye.so";

/// Reference basket: symbols the price cache keeps warm, with their mints.
pub const REFERENCE_TOKENS: &[(&str, &str)] = &[
    ("SOL", "So11111111111111111111111111111111111111112"),
    ("BTC", "3NZ9JMVBmGAqocybic2c7LQCJScmgsAZ6vQqTDzcqmJh"),
    ("ETH", "7vfCXTUXx5WJV5JADk17DUJ4ksgau7utNKj4b963voxs"),
];

#[derive(Debug, Clone)]
pub struct BirdeyeClient {
    api_key: String,
    base_url: String,
    fetcher: RetryClient,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    value: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SearchHit {
    address: String,
    symbol: String,
    volume_24h_usd: f64,
}

impl BirdeyeClient {
    pub fn new(api_key: &str, fetcher: RetryClient) -> Self {
        Self::with_base_url(api_key, fetcher, BIRDEYE_BASE_URL.to_string())
    }

    /// Base URL override for tests.
    pub fn with_base_url(api_key: &str, fetcher: RetryClient, base_url: String) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url,
            fetcher,
        }
    }

    fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("Accept", "application/json"),
            ("x-chain", "solana"),
            ("X-API-KEY", self.api_key.as_str()),
        ]
    }

    /// Ownership facet from /defi/token_security.
    pub async fn fetch_token_security(&self, address: &str) -> Result<TokenSecurityData> {
        let url = format!("{}/defi/token_security?address={}", self.base_url, address);
        let envelope: Envelope<TokenSecurityData> =
            self.fetcher.get_json(&url, &self.headers()).await?;

        match envelope.data {
            Some(data) if envelope.success => Ok(data),
            _ => Err(AggregatorError::ApiError(format!(
                "No token security data available for {}",
                address
            ))
            .into()),
        }
    }

    /// Trade metrics facet from /defi/token_overview.
    pub async fn fetch_token_overview(&self, address: &str) -> Result<TokenTradeData> {
        let url = format!("{}/defi/token_overview?address={}", self.base_url, address);
        let envelope: Envelope<Value> = self.fetcher.get_json(&url, &self.headers()).await?;

        match envelope.data {
            Some(overview) if envelope.success => Ok(parse_trade_data(address, &overview)),
            _ => Err(AggregatorError::ApiError(format!(
                "No token overview data available for {}",
                address
            ))
            .into()),
        }
    }

    /// Spot price in USD from /defi/price.
    pub async fn fetch_price_by_address(&self, address: &str) -> Result<f64> {
        let url = format!("{}/defi/price?address={}", self.base_url, address);
        let envelope: Envelope<PriceData> = self.fetcher.get_json(&url, &self.headers()).await?;

        match envelope.data {
            Some(data) if envelope.success => Ok(data.value),
            _ => Err(
                AggregatorError::ApiError(format!("No price data available for {}", address))
                    .into(),
            ),
        }
    }

    /// Resolves a symbol to a mint address through /defi/v3/search, preferring
    /// the exact-symbol match with the highest 24h volume.
    pub async fn search_token_address(&self, symbol: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/defi/v3/search?chain=solana&keyword={}&target=token&sort_by=volume_24h_usd&sort_type=desc&verify_token=true&offset=0&limit=20",
            self.base_url,
            urlencoding::encode(symbol)
        );
        debug!("Searching Birdeye for symbol {}", symbol);

        let envelope: Envelope<Vec<SearchHit>> =
            self.fetcher.get_json(&url, &self.headers()).await?;
        let mut hits = envelope.data.unwrap_or_default();
        hits.sort_by(|a, b| {
            b.volume_24h_usd
                .partial_cmp(&a.volume_24h_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let address = hits
            .into_iter()
            .find(|hit| hit.symbol.eq_ignore_ascii_case(symbol))
            .map(|hit| hit.address);
        if address.is_none() {
            warn!("No matching token found for symbol {}", symbol);
        }
        Ok(address)
    }
}

#[async_trait]
impl PriceSource for BirdeyeClient {
    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        let mint = REFERENCE_TOKENS
            .iter()
            .find(|(sym, _)| sym.eq_ignore_ascii_case(symbol))
            .map(|(_, mint)| *mint)
            .ok_or_else(|| AggregatorError::TokenNotFound(symbol.to_string()))?;
        self.fetch_price_by_address(mint).await
    }

    async fn fetch_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let lookups = symbols.iter().map(|symbol| async move {
            (symbol.clone(), self.fetch_price(symbol).await)
        });

        let mut prices = HashMap::new();
        for (symbol, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(price) => {
                    prices.insert(symbol, price);
                }
                Err(e) => warn!("Error fetching price for {}: {:#}", symbol, e),
            }
        }
        Ok(prices)
    }
}

fn num(v: &Value, key: &str) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn num_opt(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(Value::as_f64)
}

fn int(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn int_opt(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(Value::as_u64)
}

/// Extracts one window's stats from the overview payload. Birdeye keys are
/// the window suffix spliced into a fixed set of stems, e.g. trade30m,
/// tradeHistory30m, v30mUSD. Long windows report null priors when the token
/// is younger than the window; those stay `None`.
fn window(v: &Value, w: &str, nullable: bool) -> TradeWindow {
    let key = |stem: &str, tail: &str| format!("{stem}{w}{tail}");
    TradeWindow {
        history_price: num(v, &format!("history{w}Price")),
        price_change_percent: Some(num(v, &key("priceChange", "Percent"))),
        trades: int(v, &key("trade", "")),
        trades_prior: if nullable {
            int_opt(v, &key("tradeHistory", ""))
        } else {
            Some(int(v, &key("tradeHistory", "")))
        },
        trades_change_percent: if nullable {
            num_opt(v, &key("trade", "ChangePercent"))
        } else {
            Some(num(v, &key("trade", "ChangePercent")))
        },
        buys: int(v, &key("buy", "")),
        buys_prior: if nullable {
            int_opt(v, &key("buyHistory", ""))
        } else {
            Some(int(v, &key("buyHistory", "")))
        },
        buys_change_percent: if nullable {
            num_opt(v, &key("buy", "ChangePercent"))
        } else {
            Some(num(v, &key("buy", "ChangePercent")))
        },
        sells: int(v, &key("sell", "")),
        sells_prior: if nullable {
            int_opt(v, &key("sellHistory", ""))
        } else {
            Some(int(v, &key("sellHistory", "")))
        },
        sells_change_percent: if nullable {
            num_opt(v, &key("sell", "ChangePercent"))
        } else {
            Some(num(v, &key("sell", "ChangePercent")))
        },
        unique_wallets: int(v, &key("uniqueWallet", "")),
        unique_wallets_prior: if nullable {
            int_opt(v, &key("uniqueWalletHistory", ""))
        } else {
            Some(int(v, &key("uniqueWalletHistory", "")))
        },
        unique_wallets_change_percent: if nullable {
            num_opt(v, &key("uniqueWallet", "ChangePercent"))
        } else {
            Some(num(v, &key("uniqueWallet", "ChangePercent")))
        },
        volume: num(v, &key("v", "")),
        volume_usd: num(v, &key("v", "USD")),
        volume_prior: num(v, &key("vHistory", "")),
        volume_prior_usd: num(v, &key("vHistory", "USD")),
        volume_change_percent: if nullable {
            num_opt(v, &key("v", "ChangePercent"))
        } else {
            Some(num(v, &key("v", "ChangePercent")))
        },
    }
}

fn price_window(v: &Value, w: &str) -> PriceWindow {
    PriceWindow {
        history_price: num(v, &format!("history{w}Price")),
        price_change_percent: num(v, &format!("priceChange{w}Percent")),
    }
}

fn parse_trade_data(address: &str, overview: &Value) -> TokenTradeData {
    TokenTradeData {
        address: address.to_string(),
        holder: int(overview, "holder"),
        market: int(overview, "numberMarkets"),
        last_trade_unix_time: overview
            .get("lastTradeUnixTime")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        price: num(overview, "price"),
        m30: window(overview, "30m", false),
        h1: window(overview, "1h", false),
        h2: window(overview, "2h", false),
        h4: window(overview, "4h", false),
        h6: price_window(overview, "6h"),
        h8: window(overview, "8h", true),
        h12: price_window(overview, "12h"),
        h24: window(overview, "24h", true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn test_client(base_url: String) -> BirdeyeClient {
        BirdeyeClient::with_base_url(
            "test-key",
            RetryClient::new(1, Duration::from_millis(1)),
            base_url,
        )
    }

    #[test]
    fn parses_overview_windows() {
        let overview = json!({
            "holder": 1200,
            "numberMarkets": 3,
            "lastTradeUnixTime": 1700000000i64,
            "price": 0.5,
            "history24hPrice": 0.4,
            "priceChange24hPercent": 25.0,
            "trade24h": 900,
            "tradeHistory24h": 800,
            "uniqueWallet24h": 150,
            "v24h": 10000.0,
            "v24hUSD": 5000.0,
            "vHistory24h": 9000.0,
            "vHistory24hUSD": 4500.0,
            "trade30m": 12,
            "tradeHistory30m": 10,
            "trade30mChangePercent": 20.0
        });

        let data = parse_trade_data("Mint111", &overview);
        assert_eq!(data.holder, 1200);
        assert_eq!(data.h24.trades, 900);
        assert_eq!(data.h24.unique_wallets, 150);
        assert_eq!(data.h24.volume_usd, 5000.0);
        assert_eq!(data.h24.price_change_percent, Some(25.0));
        // 24h change percent is nullable and absent in this payload.
        assert!(data.h24.trades_change_percent.is_none());
        // 30m is a short window; absent values collapse to zero, not None.
        assert_eq!(data.m30.trades_change_percent, Some(20.0));
        assert_eq!(data.m30.buys_change_percent, Some(0.0));
    }

    #[tokio::test]
    async fn security_fetch_maps_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/defi/token_security?address=Mint111")
            .match_header("X-API-KEY", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success":true,"data":{"ownerBalance":10.0,"creatorBalance":5.0,
                    "ownerPercentage":1.0,"creatorPercentage":0.5,
                    "top10HolderBalance":60.0,"top10HolderPercent":6.0}}"#,
            )
            .create_async()
            .await;

        let client = test_client(server.url());
        let security = client.fetch_token_security("Mint111").await.unwrap();

        mock.assert_async().await;
        assert_eq!(security.owner_balance, 10.0);
        assert_eq!(security.top10_holder_percent, 6.0);
    }

    #[tokio::test]
    async fn search_prefers_exact_symbol_with_highest_volume() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/defi/v3/search.*keyword=BONK.*$".to_string()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success":true,"data":[
                    {"address":"Wrong1","symbol":"BONKY","volume_24h_usd":99999.0},
                    {"address":"Low1","symbol":"BONK","volume_24h_usd":10.0},
                    {"address":"High1","symbol":"bonk","volume_24h_usd":5000.0}
                ]}"#,
            )
            .create_async()
            .await;

        let client = test_client(server.url());
        let address = client.search_token_address("BONK").await.unwrap();
        assert_eq!(address.as_deref(), Some("High1"));
    }
}
