//! HTTP catalog client with rate limiting
//!
//! Speaks the upstream catalog's paginated products endpoint. One call
//! is exactly one upstream request: the rate limiter gates every call,
//! but retry policy belongs to the caller so the contract stays
//! predictable under test.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::domain::pagination::CatalogPage;
use crate::domain::services::{FetchError, PageFetcher};
use crate::infrastructure::config::ClientConfig;

/// Catalog API client. Cheap to share behind an `Arc`; the inner reqwest
/// client pools connections and the limiter is process-wide state.
pub struct CatalogClient {
    client: Client,
    products_url: Url,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    with_attributes: String,
    filters: Vec<(String, String)>,
}

impl CatalogClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .context("Failed to create HTTP client")?;

        // Url::join replaces the last path segment unless the base ends
        // with a slash, so normalize before deriving the endpoint.
        let mut base_url =
            Url::parse(&config.base_url).context("Invalid catalog base URL")?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        let products_url = base_url
            .join("products")
            .context("Failed to derive products endpoint URL")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        let filters = config
            .filters
            .iter()
            .map(|(key, value)| (format!("filters[{key}]"), value.clone()))
            .collect();

        Ok(Self {
            client,
            products_url,
            rate_limiter,
            with_attributes: config.with_attributes.join(","),
            filters,
        })
    }
}

#[async_trait]
impl PageFetcher for CatalogClient {
    async fn fetch_page(&self, page: u32) -> Result<CatalogPage, FetchError> {
        // Gate before the request, unconditionally; failed requests spend
        // quota like successful ones.
        self.rate_limiter.until_ready().await;

        debug!(page = page, url = %self.products_url, "Fetching catalog page");

        let response = self
            .client
            .get(self.products_url.clone())
            .query(&[("with", self.with_attributes.as_str())])
            .query(&[("page", page)])
            .query(&self.filters)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                page,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(FetchError::RateLimited {
                page,
                retry_after_secs,
            });
        }
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus {
                page,
                status: status.as_u16(),
            });
        }

        response
            .json::<CatalogPage>()
            .await
            .map_err(|e| FetchError::Decode {
                page,
                message: e.to_string(),
            })
    }
}
