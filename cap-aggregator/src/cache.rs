use crate::traits::{FetchedDocument, Fetcher};
use crate::types::{FetchConfig, TransportError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// On-disk response cache in front of another [`Fetcher`], keyed by request
/// URL. Only successful responses are stored; an entry is served until its
/// file is older than the configured time-to-live.
///
/// Intended for development, to avoid hammering live feeds.
pub struct CachedFetcher<F> {
    inner: F,
    cache_dir: PathBuf,
    ttl: Duration,
}

impl<F: Fetcher> CachedFetcher<F> {
    pub fn new(inner: F, cache_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            inner,
            cache_dir: cache_dir.into(),
            ttl,
        }
    }

    pub fn from_config(inner: F, config: &FetchConfig) -> Self {
        Self::new(
            inner,
            config.cache_dir.clone(),
            Duration::from_secs(config.cache_ttl_seconds),
        )
    }

    pub fn entry_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.cache_dir.join(format!("{:x}.body", digest))
    }

    async fn read_fresh(&self, path: &Path) -> Option<Vec<u8>> {
        let metadata = fs::metadata(path).await.ok()?;
        // A modification time in the future counts as fresh.
        let age = metadata.modified().ok()?.elapsed().unwrap_or_default();
        if age > self.ttl {
            return None;
        }
        fs::read(path).await.ok()
    }

    async fn store(&self, path: &Path, body: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        fs::write(path, body).await
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for CachedFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, TransportError> {
        let path = self.entry_path(url);

        if let Some(body) = self.read_fresh(&path).await {
            debug!("Cache hit for {} ({} bytes)", url, body.len());
            return Ok(FetchedDocument::ok(url, body));
        }

        let document = self.inner.fetch(url).await?;

        if document.is_success() {
            if let Err(e) = self.store(&path, &document.body).await {
                warn!("Failed to cache response for {}: {}", url, e);
            }
        }

        Ok(document)
    }
}
