use crate::types::TransportError;
use async_trait::async_trait;
use std::sync::Arc;

/// Fetch-by-URL capability shared by the feed sources and the detail
/// resolver. Implemented by the live HTTP client and by the on-disk cache
/// decorator.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`. A non-2xx response is returned as a document, not an
    /// error; use [`FetchedDocument::error_for_status`] to reject it.
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, TransportError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, TransportError> {
        (**self).fetch(url).await
    }
}

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedDocument {
    pub fn ok(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            return Ok(self);
        }

        let reason = reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown")
            .to_string();

        Err(TransportError::Status {
            status: self.status,
            reason,
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
