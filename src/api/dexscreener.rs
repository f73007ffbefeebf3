use anyhow::Result;
use tracing::debug;

use crate::api::fetch::RetryClient;
use crate::models::token::{DexScreenerData, DexScreenerPair};

const DEX_SCREENER_BASE_URL: &str = "https://api.dexscreener.com";

/// Liquidity-venue search client. Unauthenticated.
#[derive(Debug, Clone)]
pub struct DexScreenerClient {
    base_url: String,
    fetcher: RetryClient,
}

impl DexScreenerClient {
    pub fn new(fetcher: RetryClient) -> Self {
        Self::with_base_url(fetcher, DEX_SCREENER_BASE_URL.to_string())
    }

    /// Base URL override for tests.
    pub fn with_base_url(fetcher: RetryClient, base_url: String) -> Self {
        Self { base_url, fetcher }
    }

    /// Searches pairs by mint address or symbol.
    pub async fn search(&self, query: &str) -> Result<DexScreenerData> {
        let url = format!(
            "{}/latest/dex/search?q={}",
            self.base_url,
            urlencoding::encode(query)
        );
        debug!("Fetching DexScreener pairs for {}", query);
        self.fetcher.get_json(&url, &[]).await
    }

    /// Symbol search returning only the deepest pair, or None when the symbol
    /// is unknown to DexScreener.
    pub async fn search_best_pair(&self, symbol: &str) -> Result<Option<DexScreenerPair>> {
        let data = self.search(symbol).await?;
        Ok(data.highest_liquidity_pair().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn search_parses_pairs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/latest/dex/search?q=Mint111")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"schemaVersion":"1.0.0","pairs":[
                    {"chainId":"solana","dexId":"raydium","url":"https://dexscreener.com/p1",
                     "pairAddress":"P1","priceUsd":"0.01",
                     "liquidity":{"usd":2000.0},"marketCap":50000.0,
                     "volume":{"h24":1234.0}},
                    {"chainId":"solana","dexId":"orca","url":"https://dexscreener.com/p2",
                     "pairAddress":"P2","priceUsd":"0.011",
                     "liquidity":{"usd":9000.0},"marketCap":51000.0,
                     "volume":{"h24":400.0}}
                ]}"#,
            )
            .create_async()
            .await;

        let client = DexScreenerClient::with_base_url(
            RetryClient::new(1, Duration::from_millis(1)),
            server.url(),
        );
        let data = client.search("Mint111").await.unwrap();
        assert_eq!(data.pairs.len(), 2);

        let best = data.highest_liquidity_pair().unwrap();
        assert_eq!(best.pair_address, "P2");
        assert_eq!(best.volume.h24, 400.0);
    }
}
