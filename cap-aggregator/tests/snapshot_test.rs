use cap_aggregator::{AlertStub, FeedItems};
use chrono::{TimeZone, Utc};

fn stub(title: &str, guid: &str, hour: u32) -> AlertStub {
    AlertStub {
        title: title.to_string(),
        description: String::new(),
        published_at: Utc.with_ymd_and_hms(2024, 10, 14, hour, 0, 0).unwrap(),
        detail_url: format!("https://alerts.example.org/cap/{}.xml", guid),
        guid: guid.to_string(),
        category: "Met".to_string(),
        requires_proxy: true,
        detail: None,
    }
}

const FEED_A: &str = "https://a.example.org/feed.xml";
const FEED_B: &str = "https://b.example.org/feed.xml";

#[test]
fn test_alerts_are_newest_first() {
    let mut feeds = FeedItems::new();
    feeds.insert(FEED_B, vec![stub("b-old", "b1", 6), stub("b-new", "b2", 11)]);
    feeds.insert(FEED_A, vec![stub("a-mid", "a1", 9), stub("a-tie", "a2", 11)]);

    let titles: Vec<&str> = feeds.alerts().iter().map(|a| a.alert.title.as_str()).collect();
    // Equal timestamps keep feed URL order.
    assert_eq!(titles, vec!["a-tie", "b-new", "a-mid", "b-old"]);

    let first = feeds.alerts()[0];
    assert_eq!(first.feed_url, FEED_A);
    assert_eq!(first.position, 1);

    assert_eq!(feeds.feed_count(), 2);
    assert_eq!(feeds.total_items(), 4);
    assert_eq!(feeds.feed_urls().collect::<Vec<_>>(), vec![FEED_A, FEED_B]);
}

#[test]
fn test_new_since_previous_broadcast() {
    let mut previous = FeedItems::new();
    previous.insert(FEED_A, vec![stub("kept", "a1", 8)]);

    let mut current = FeedItems::new();
    current.insert(FEED_A, vec![stub("kept", "a1", 8), stub("fresh", "a2", 10)]);
    // Same alert id under another feed counts as new there.
    current.insert(FEED_B, vec![stub("kept", "a1", 8)]);

    let fresh: Vec<(&str, &str)> = current
        .new_since(&previous)
        .iter()
        .map(|a| (a.feed_url, a.alert.title.as_str()))
        .collect();
    assert_eq!(fresh, vec![(FEED_A, "fresh"), (FEED_B, "kept")]);

    assert!(current.new_since(&current).is_empty());
    assert!(FeedItems::new().is_empty());
}

#[test]
fn test_identity_falls_back_without_guid() {
    let mut alert = stub("Rain", "", 8);
    assert_eq!(alert.identity(), "url:https://alerts.example.org/cap/.xml");

    alert.detail_url.clear();
    assert!(alert.identity().starts_with("item:Rain@2024-10-14T08:00:00"));
}
