//! Page and asset download capability

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client as ReqwestClient;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, debug_span, instrument};

use crate::crawler::CrawlerConfig;
use crate::crawler::error::{CrawlError, FetchError};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Downloads the bytes behind a URL.
///
/// Retry and scheduling policy belong to the implementation; callers treat
/// an error as "nothing for this URL".
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the body of `url`
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetcher for the live board over HTTP, rate limited client-side
#[derive(Clone)]
pub struct HttpFetcher {
    client: ReqwestClient,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl HttpFetcher {
    /// Create a fetcher using the user agent and rate limit from `config`
    pub fn new(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        // The board gates some boards behind an age check answered by this cookie.
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("over18=1"));

        let client = ReqwestClient::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CrawlError::Other(format!("Failed to create HTTP client: {}", e)))?;

        let limiter = Quota::with_period(config.rate_limit())
            .map(|quota| Arc::new(RateLimiter::direct(quota)));

        Ok(Self { client, limiter })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), level = "debug")]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Some(limiter) = &self.limiter {
            limiter
                .until_ready()
                .instrument(debug_span!("limiter"))
                .await;
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&CrawlerConfig::builder().rate_limit_ms(0).build()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_sends_age_cookie() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/bbs/Beauty/index.html")
            .match_header("cookie", "over18=1")
            .with_status(200)
            .with_body("<html></html>")
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/bbs/Beauty/index.html", server.url());
        let body = fetcher().fetch(&url).await.unwrap();
        assert_eq!(body, b"<html></html>");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let url = format!("{}/missing", server.url());
        match fetcher().fetch(&url).await {
            Err(FetchError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected status error, got {:?}", other),
        }
    }
}
