use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const HELIUS_RPC_URL: &str = "https://mainnet.helius-rpc.com";

/// Holder-listing RPC client. Unlike the other sources this one is not
/// wrapped in retry: a failed page aborts the whole holder aggregation and
/// the error propagates to the caller.
#[derive(Debug, Clone)]
pub struct HeliusClient {
    api_key: String,
    base_url: String,
    client: Client,
}

/// JSON-RPC request wrapper for the Helius DAS API
#[derive(Debug, Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'static str,
    params: T,
}

#[derive(Debug, Serialize)]
struct GetTokenAccountsParams<'a> {
    mint: &'a str,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
}

/// One page of token accounts. An empty account list or a missing cursor
/// signals end-of-data.
#[derive(Debug, Deserialize)]
pub struct TokenAccountsPage {
    #[serde(default)]
    pub token_accounts: Vec<RawTokenAccount>,
    pub cursor: Option<String>,
}

/// Raw token account before owner-level aggregation. One owner may hold
/// several of these.
#[derive(Debug, Deserialize)]
pub struct RawTokenAccount {
    pub owner: String,
    #[serde(default)]
    pub amount: f64,
}

impl HeliusClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, HELIUS_RPC_URL.to_string())
    }

    /// Base URL override for tests.
    pub fn with_base_url(api_key: &str, base_url: String) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Fetches one page of token accounts for a mint.
    pub async fn get_token_accounts(
        &self,
        mint: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<TokenAccountsPage> {
        let url = format!("{}/?api-key={}", self.base_url, self.api_key);

        let rpc_request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: "token-intel",
            method: "getTokenAccounts",
            params: GetTokenAccountsParams { mint, limit, cursor },
        };

        debug!("Fetching token accounts for {} (cursor: {:?})", mint, cursor);

        let response = self
            .client
            .post(&url)
            .json(&rpc_request)
            .send()
            .await
            .context("Failed to send request to Helius getTokenAccounts API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Helius getTokenAccounts API error: {} - {}", status, error_text);
            anyhow::bail!("Helius getTokenAccounts API error: {} - {}", status, error_text);
        }

        #[derive(Debug, Deserialize)]
        struct JsonRpcResponse {
            result: Option<TokenAccountsPage>,
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .context("Failed to parse Helius getTokenAccounts response")?;

        Ok(rpc_response.result.unwrap_or(TokenAccountsPage {
            token_accounts: Vec::new(),
            cursor: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_token_accounts_page() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/?api-key=helius-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":"token-intel","result":{
                    "token_accounts":[
                        {"owner":"OwnerA","amount":5.0},
                        {"owner":"OwnerB","amount":3.0}
                    ],
                    "cursor":"next-page"
                }}"#,
            )
            .create_async()
            .await;

        let client = HeliusClient::with_base_url("helius-key", server.url());
        let page = client.get_token_accounts("Mint111", None, 1000).await.unwrap();

        assert_eq!(page.token_accounts.len(), 2);
        assert_eq!(page.token_accounts[0].owner, "OwnerA");
        assert_eq!(page.cursor.as_deref(), Some("next-page"));
    }

    #[tokio::test]
    async fn rpc_error_propagates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/?api-key=helius-key")
            .with_status(429)
            .with_body("too many requests")
            .create_async()
            .await;

        let client = HeliusClient::with_base_url("helius-key", server.url());
        let err = client
            .get_token_accounts("Mint111", None, 1000)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }
}
