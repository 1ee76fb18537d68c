use crate::types::AlertStub;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// The per-feed alert lists of one completed coordinator cycle, keyed by
/// feed URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeedItems {
    feeds: BTreeMap<String, Vec<AlertStub>>,
}

/// An alert together with the feed and position it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedAlert<'a> {
    pub feed_url: &'a str,
    pub position: usize,
    pub alert: &'a AlertStub,
}

impl FeedItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feed_url: impl Into<String>, items: Vec<AlertStub>) {
        self.feeds.insert(feed_url.into(), items);
    }

    pub fn get(&self, feed_url: &str) -> Option<&[AlertStub]> {
        self.feeds.get(feed_url).map(Vec::as_slice)
    }

    pub fn feed_urls(&self) -> impl Iterator<Item = &str> {
        self.feeds.keys().map(String::as_str)
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    pub fn total_items(&self) -> usize {
        self.feeds.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_items() == 0
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<AlertStub>> {
        self.feeds
    }

    /// Every alert of every feed, newest first. Ties keep feed URL order,
    /// then position within the feed.
    pub fn alerts(&self) -> Vec<FeedAlert<'_>> {
        let mut alerts: Vec<FeedAlert<'_>> = self
            .feeds
            .iter()
            .flat_map(|(feed_url, items)| {
                items.iter().enumerate().map(move |(position, alert)| FeedAlert {
                    feed_url: feed_url.as_str(),
                    position,
                    alert,
                })
            })
            .collect();

        // Stable sort over URL-then-position order keeps ties deterministic.
        alerts.sort_by(|a, b| b.alert.published_at.cmp(&a.alert.published_at));
        alerts
    }

    /// Alerts that were not present, per feed, in `previous`.
    pub fn new_since(&self, previous: &FeedItems) -> Vec<FeedAlert<'_>> {
        let seen: HashSet<(&str, String)> = previous
            .feeds
            .iter()
            .flat_map(|(feed_url, items)| {
                items
                    .iter()
                    .map(move |alert| (feed_url.as_str(), alert.identity()))
            })
            .collect();

        self.alerts()
            .into_iter()
            .filter(|entry| !seen.contains(&(entry.feed_url, entry.alert.identity())))
            .collect()
    }
}
