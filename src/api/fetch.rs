use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client with bounded retry and exponential backoff, shared by every
/// external source client. A non-2xx status counts as a failure; the body is
/// still read so the last error carries the upstream diagnostic.
#[derive(Debug, Clone)]
pub struct RetryClient {
    client: Client,
    max_retries: u32,
    base_delay: Duration,
}

impl RetryClient {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .expect("Failed to create HTTP client"),
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<T> {
        self.execute(url, || {
            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            request
        })
        .await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
        headers: &[(&str, &str)],
    ) -> Result<T> {
        self.execute(url, || {
            let mut request = self.client.post(url).json(body);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            request
        })
        .await
    }

    async fn execute<T, F>(&self, url: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match self.attempt(build()).await {
                Ok(value) => {
                    debug!("Attempt {} succeeded for {}", attempt + 1, url);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Attempt {} failed for {}: {:#}", attempt + 1, url, e);
                    last_error = Some(e);
                    if attempt + 1 < self.max_retries {
                        let delay = self.base_delay * 2u32.pow(attempt);
                        debug!("Waiting {:?} before retrying {}", delay, url);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("request to {} exhausted retries", url)))
    }

    async fn attempt<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP error! status: {}, message: {}", status, error_text));
        }

        response
            .json()
            .await
            .context("Failed to parse response body as JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_final_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/defi/price")
            .with_status(500)
            .with_body("rate limited")
            .expect(3)
            .create_async()
            .await;

        let client = RetryClient::new(3, Duration::from_millis(10));
        let started = Instant::now();
        let result: Result<serde_json::Value> = client
            .get_json(&format!("{}/defi/price", server.url()), &[])
            .await;
        let elapsed = started.elapsed();

        mock.assert_async().await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("500"), "unexpected error: {err:#}");
        assert!(err.to_string().contains("rate limited"));
        // Backoff schedule is 10ms + 20ms between the three attempts.
        assert!(elapsed >= Duration::from_millis(25), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true}"#)
            .expect(1)
            .create_async()
            .await;

        let client = RetryClient::new(3, Duration::from_millis(10));
        let value: serde_json::Value = client
            .get_json(&format!("{}/ok", server.url()), &[("X-API-KEY", "test")])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(value["success"], true);
    }
}
