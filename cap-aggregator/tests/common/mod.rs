#![allow(dead_code)]

// Shared test doubles and fixtures
pub use cap_aggregator::{FetchedDocument, Fetcher, TransportError};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, Once};

pub const WELLINGTON: (f64, f64) = (-41.29, 174.78);

/// Covers Wellington.
pub const WELLINGTON_POLYGON: &str =
    "-41.0,174.0 -41.0,175.5 -42.0,175.5 -42.0,174.0 -41.0,174.0";

/// Covers part of the Waikato, well north of Wellington.
pub const WAIKATO_POLYGON: &str =
    "-36.5,174.5 -36.5,175.0 -37.0,175.0 -37.0,174.5 -36.5,174.5";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone)]
enum MockResponse {
    Body(u16, Vec<u8>),
    Unavailable,
}

/// In-memory [`Fetcher`]. Unknown URLs answer 404.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, MockResponse>>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.respond_with_status(url, 200, body);
    }

    pub fn respond_with_status(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), MockResponse::Body(status, body.into()));
    }

    /// Requests for `url` fail before a document is returned.
    pub fn unavailable(&self, url: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), MockResponse::Unavailable);
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());

        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(MockResponse::Body(status, body)) => Ok(FetchedDocument {
                url: url.to_string(),
                status,
                body,
            }),
            Some(MockResponse::Unavailable) => Err(TransportError::Status {
                status: 503,
                reason: "Service Unavailable".to_string(),
            }),
            None => Ok(FetchedDocument {
                url: url.to_string(),
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}

pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
    pub guid: String,
}

impl RssItem {
    pub fn new(title: &str, link: &str) -> Self {
        Self {
            title: title.to_string(),
            link: link.to_string(),
            description: format!("{} description", title),
            pub_date: "Mon, 14 Oct 2024 09:00:00 +0000".to_string(),
            guid: link.to_string(),
        }
    }

    pub fn published(mut self, pub_date: &str) -> Self {
        self.pub_date = pub_date.to_string();
        self
    }
}

pub fn rss_feed(items: &[RssItem]) -> String {
    rss_feed_with_ttl(items, None)
}

pub fn rss_feed_with_ttl(items: &[RssItem], ttl_minutes: Option<u32>) -> String {
    let ttl = ttl_minutes
        .map(|minutes| format!("<ttl>{}</ttl>", minutes))
        .unwrap_or_default();

    let items: String = items
        .iter()
        .map(|item| {
            format!(
                "<item><title>{}</title><link>{}</link><description>{}</description>\
                 <pubDate>{}</pubDate><guid>{}</guid><category>Met</category></item>",
                item.title, item.link, item.description, item.pub_date, item.guid
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Test alerts</title><link>https://alerts.example.org/</link>
<description>Test CAP feed</description>{}{}</channel></rss>"#,
        ttl, items
    )
}

/// A minimal CAP 1.2 alert with one info block and one area.
pub fn cap_alert(severity: &str, event: &str, polygon: Option<&str>) -> String {
    let polygon = polygon
        .map(|p| format!("<polygon>{}</polygon>", p))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<alert xmlns="urn:oasis:names:tc:emergency:cap:1.2">
  <identifier>test-{event}</identifier>
  <sender>alerts@example.org</sender>
  <sent>2024-10-14T09:00:00+13:00</sent>
  <status>Actual</status>
  <msgType>Alert</msgType>
  <scope>Public</scope>
  <info>
    <category>Met</category>
    <event>{event}</event>
    <urgency>Expected</urgency>
    <severity>{severity}</severity>
    <certainty>Likely</certainty>
    <onset>2024-10-14T12:00:00+13:00</onset>
    <headline>{event} warning</headline>
    <area>
      <areaDesc>Test area</areaDesc>
      {polygon}
    </area>
  </info>
</alert>"#
    )
}
