use crate::types::AlertStub;
use encoding_rs::{Encoding, UTF_8};
use feed_rs::parser;
use regex::Regex;
use scraper::Html;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    /// Feed-level `ttl` hint, in minutes.
    pub ttl_minutes: Option<u32>,
    pub items: Vec<AlertStub>,
    /// Entries skipped for lacking a title or a publish date.
    pub dropped: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to parse feed: {0}")]
pub struct FeedParseError(#[from] feed_rs::parser::ParseFeedError);

/// Normalizes RSS/Atom documents of one feed into [`AlertStub`]s.
pub struct FeedParser {
    requires_proxy: bool,
    log_feed_warnings: bool,
}

impl FeedParser {
    pub fn new(requires_proxy: bool, log_feed_warnings: bool) -> Self {
        Self {
            requires_proxy,
            log_feed_warnings,
        }
    }

    pub fn parse_feed(&self, body: &[u8], encoding: &str) -> Result<ParsedFeed, FeedParseError> {
        debug!("Parsing feed content ({} bytes, {})", body.len(), encoding);

        let content = decode_body(body, encoding);
        // Entries without a guid keep an empty id instead of a generated one.
        let feed = parser::Builder::new()
            .id_generator(|_, _, _| String::new())
            .build()
            .parse(content.as_bytes())?;

        let title = feed.title.map(|t| t.content);
        let ttl_minutes = feed.ttl;

        let total = feed.entries.len();
        let items: Vec<AlertStub> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();
        let dropped = total - items.len();

        debug!("Parsed feed with {} entries ({} dropped)", items.len(), dropped);

        Ok(ParsedFeed {
            title,
            ttl_minutes,
            items,
            dropped,
        })
    }

    fn parse_entry(&self, entry: feed_rs::model::Entry) -> Option<AlertStub> {
        let title = entry
            .title
            .map(|t| t.content)
            .filter(|t| !t.trim().is_empty());

        let description = [
            entry.summary.map(|s| s.content),
            entry.content.and_then(|c| c.body),
        ]
        .into_iter()
        .flatten()
        .find(|d| !d.trim().is_empty())
        .unwrap_or_default();

        let published_at = entry.published.or(entry.updated);

        let (title, published_at) = match (title, published_at) {
            (Some(title), Some(published_at)) => (title, published_at),
            (title, published_at) => {
                if self.log_feed_warnings {
                    warn!(
                        "Can't parse feed item {:?}: title={:?} pubdate={:?} description={:?}",
                        entry.id, title, published_at, description
                    );
                }
                return None;
            }
        };

        Some(AlertStub {
            title,
            description: html_to_text(&description),
            published_at,
            detail_url: entry.links.first().map(|l| l.href.clone()).unwrap_or_default(),
            guid: entry.id,
            category: entry
                .categories
                .first()
                .map(|c| c.term.clone())
                .unwrap_or_default(),
            requires_proxy: self.requires_proxy,
            detail: None,
        })
    }
}

/// Decode a feed body with the configured encoding label into UTF-8 text.
/// Unknown labels fall back to UTF-8.
pub fn decode_body<'a>(body: &'a [u8], label: &str) -> Cow<'a, str> {
    let encoding = Encoding::for_label(label.trim().as_bytes()).unwrap_or_else(|| {
        warn!("Unknown feed encoding {:?}, falling back to UTF-8", label);
        UTF_8
    });

    let (text, _, had_errors) = encoding.decode(body);
    if had_errors {
        debug!("Feed body contained malformed {} sequences", encoding.name());
    }

    if encoding == UTF_8 {
        return text;
    }

    // The text is UTF-8 now; the XML declaration must stop claiming otherwise.
    let rewritten = xml_declaration_encoding()
        .replace(&text, "${1}UTF-8${2}")
        .into_owned();
    Cow::Owned(rewritten)
}

/// Strip markup tags, then decode entities; whitespace runs collapse to a
/// single space and no wrapping is applied.
pub fn html_to_text(html: &str) -> String {
    let stripped = tag_pattern().replace_all(html, "");
    let fragment = Html::parse_fragment(&stripped);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)<([^>]+)>").expect("tag pattern is valid"))
}

fn xml_declaration_encoding() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^(\s*<\?xml[^>]*?encoding\s*=\s*["'])[^"']*(["'])"#)
            .expect("declaration pattern is valid")
    })
}
