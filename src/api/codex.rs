use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::api::fetch::RetryClient;
use crate::error::AggregatorError;
use crate::models::token::TokenCodex;

const CODEX_GRAPHQL_ENDPOINT: &str = "https://graph.codex.io/graphql";
const SOLANA_NETWORK_ID: i64 = 1399811149;

const TOKEN_QUERY: &str = "\
query Token($address: String!, $networkId: Int!) {
    token(input: { address: $address, networkId: $networkId }) {
        id
        address
        cmcId
        decimals
        name
        symbol
        totalSupply
        isScam
        info {
            circulatingSupply
            imageThumbUrl
        }
        explorerData {
            blueCheckmark
        }
    }
}";

/// Graph-query client for the registry metadata facet.
#[derive(Debug, Clone)]
pub struct CodexClient {
    api_key: String,
    endpoint: String,
    fetcher: RetryClient,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<TokenData>,
    errors: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: Option<RawToken>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawToken {
    id: String,
    address: String,
    cmc_id: Option<i64>,
    decimals: Option<u8>,
    name: Option<String>,
    symbol: Option<String>,
    total_supply: Option<String>,
    is_scam: Option<bool>,
    info: Option<RawTokenInfo>,
    explorer_data: Option<RawExplorerData>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawTokenInfo {
    circulating_supply: Option<String>,
    image_thumb_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawExplorerData {
    blue_checkmark: Option<bool>,
}

impl CodexClient {
    pub fn new(api_key: &str, fetcher: RetryClient) -> Self {
        Self::with_endpoint(api_key, fetcher, CODEX_GRAPHQL_ENDPOINT.to_string())
    }

    /// Endpoint override for tests.
    pub fn with_endpoint(api_key: &str, fetcher: RetryClient, endpoint: String) -> Self {
        Self {
            api_key: api_key.to_string(),
            endpoint,
            fetcher,
        }
    }

    pub async fn fetch_token_metadata(&self, address: &str) -> Result<TokenCodex> {
        debug!("Fetching Codex metadata for {}", address);

        let body = json!({
            "query": TOKEN_QUERY,
            "variables": {
                "address": address,
                "networkId": SOLANA_NETWORK_ID,
            },
        });

        let response: GraphQlResponse = self
            .fetcher
            .post_json(
                &self.endpoint,
                &body,
                &[
                    ("Content-Type", "application/json"),
                    ("Authorization", self.api_key.as_str()),
                ],
            )
            .await?;

        if let Some(errors) = response.errors {
            return Err(AggregatorError::ApiError(format!(
                "GraphQL errors for {}: {}",
                address,
                serde_json::to_string(&errors).unwrap_or_default()
            ))
            .into());
        }

        let token = response
            .data
            .and_then(|d| d.token)
            .ok_or_else(|| {
                AggregatorError::ApiError(format!("No Codex data returned for token {}", address))
            })?;

        Ok(TokenCodex {
            id: token.id,
            address: token.address,
            cmc_id: token.cmc_id,
            decimals: token.decimals.unwrap_or(9),
            name: token.name.unwrap_or_default(),
            symbol: token.symbol.unwrap_or_default(),
            total_supply: token.total_supply.unwrap_or_else(|| "0".to_string()),
            circulating_supply: token
                .info
                .as_ref()
                .and_then(|i| i.circulating_supply.clone())
                .unwrap_or_else(|| "0".to_string()),
            image_thumb_url: token.info.and_then(|i| i.image_thumb_url),
            blue_checkmark: token
                .explorer_data
                .and_then(|e| e.blue_checkmark)
                .unwrap_or(false),
            is_scam: token.is_scam.unwrap_or(false),
        })
    }
}
