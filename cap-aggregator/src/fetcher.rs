use crate::traits::{FetchedDocument, Fetcher};
use crate::types::{FetchConfig, TransportError};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

/// Live network [`Fetcher`]. Every request asks intermediaries not to serve
/// a cached copy.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, TransportError> {
        let start_time = Instant::now();
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "max-age=0, no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        debug!(
            "Fetched {} (HTTP {}, {} bytes) in {}ms",
            url,
            status.as_u16(),
            body.len(),
            start_time.elapsed().as_millis()
        );

        Ok(FetchedDocument {
            url: url.to_string(),
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }
}
