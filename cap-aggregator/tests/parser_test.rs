use anyhow::Result;
use cap_aggregator::parser::{decode_body, html_to_text};
use cap_aggregator::FeedParser;
use chrono::{TimeZone, Utc};

mod common;
use common::{init_tracing, rss_feed, rss_feed_with_ttl, RssItem};

#[test]
fn test_parse_rss_items() -> Result<()> {
    init_tracing();
    let body = rss_feed(&[
        RssItem::new("Heavy Rain Warning", "https://alerts.example.org/cap/1.xml"),
        RssItem::new("Strong Wind Watch", "https://alerts.example.org/cap/2.xml")
            .published("Mon, 14 Oct 2024 10:30:00 +1300"),
    ]);

    let parsed = FeedParser::new(true, false).parse_feed(body.as_bytes(), "UTF-8")?;

    assert_eq!(parsed.title.as_deref(), Some("Test alerts"));
    assert_eq!(parsed.ttl_minutes, None);
    assert_eq!(parsed.dropped, 0);
    assert_eq!(parsed.items.len(), 2);

    let first = &parsed.items[0];
    assert_eq!(first.title, "Heavy Rain Warning");
    assert_eq!(first.detail_url, "https://alerts.example.org/cap/1.xml");
    assert_eq!(first.description, "Heavy Rain Warning description");
    assert_eq!(first.category, "Met");
    assert!(first.requires_proxy);
    assert!(first.detail.is_none());
    assert_eq!(
        first.published_at,
        Utc.with_ymd_and_hms(2024, 10, 14, 9, 0, 0).unwrap()
    );

    // Offsets are normalized to UTC.
    assert_eq!(
        parsed.items[1].published_at,
        Utc.with_ymd_and_hms(2024, 10, 13, 21, 30, 0).unwrap()
    );
    Ok(())
}

#[test]
fn test_description_is_plain_text() -> Result<()> {
    let mut item = RssItem::new("Rain", "https://alerts.example.org/cap/1.xml");
    item.description = "&lt;p&gt;Heavy rain &amp;amp;   wind&lt;/p&gt;\n&lt;br/&gt;expected".to_string();

    let parsed = FeedParser::new(false, false).parse_feed(rss_feed(&[item]).as_bytes(), "UTF-8")?;

    assert_eq!(parsed.items[0].description, "Heavy rain & wind expected");
    assert!(!parsed.items[0].requires_proxy);
    Ok(())
}

#[test]
fn test_html_to_text() {
    assert_eq!(html_to_text("<b>Heavy</b> rain &amp; wind"), "Heavy rain & wind");
    assert_eq!(html_to_text("<P CLASS=x>Snow</P>\n\n<BR>to 400m"), "Snow to 400m");
    assert_eq!(html_to_text("no markup"), "no markup");
    assert_eq!(html_to_text(""), "");
}

#[test]
fn test_ttl_hint() -> Result<()> {
    let body = rss_feed_with_ttl(&[RssItem::new("Rain", "https://a.example.org/1")], Some(30));
    let parsed = FeedParser::new(true, false).parse_feed(body.as_bytes(), "UTF-8")?;
    assert_eq!(parsed.ttl_minutes, Some(30));
    Ok(())
}

#[test]
fn test_items_without_title_or_date_are_dropped() -> Result<()> {
    init_tracing();
    let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Partial</title>
<item><link>https://a.example.org/no-title-no-date</link><description>orphan</description></item>
<item><title>Dated</title><link>https://a.example.org/ok</link><pubDate>Tue, 15 Oct 2024 08:00:00 GMT</pubDate></item>
<item><title>Undated</title><link>https://a.example.org/undated</link></item>
</channel></rss>"#;

    let parsed = FeedParser::new(true, true).parse_feed(body.as_bytes(), "UTF-8")?;

    assert_eq!(parsed.items.len(), 1);
    assert_eq!(parsed.items[0].title, "Dated");
    assert_eq!(parsed.items[0].description, "");
    assert_eq!(parsed.dropped, 2);
    Ok(())
}

#[test]
fn test_missing_guid_stays_empty() -> Result<()> {
    let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>No guids</title>
<item><title>Rain</title><link>https://a.example.org/cap/1.xml</link><pubDate>Tue, 15 Oct 2024 08:00:00 GMT</pubDate></item>
<item><title>Wind</title><pubDate>Tue, 15 Oct 2024 09:00:00 GMT</pubDate></item>
</channel></rss>"#;

    let parsed = FeedParser::new(true, false).parse_feed(body.as_bytes(), "UTF-8")?;

    assert_eq!(parsed.items.len(), 2);
    assert_eq!(parsed.items[0].guid, "");
    assert_eq!(parsed.items[0].identity(), "url:https://a.example.org/cap/1.xml");
    assert_eq!(parsed.items[1].guid, "");
    assert!(parsed.items[1].identity().starts_with("item:Wind@"));
    Ok(())
}

#[test]
fn test_atom_entry_falls_back_to_updated() -> Result<()> {
    let body = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom alerts</title>
  <id>urn:test:feed</id>
  <updated>2024-10-14T09:00:00Z</updated>
  <entry>
    <title>Thunderstorm Watch</title>
    <id>urn:test:alert:1</id>
    <updated>2024-10-14T08:15:00Z</updated>
    <link href="https://alerts.example.org/cap/storm.xml"/>
    <summary>Thunderstorms possible</summary>
    <category term="Met"/>
  </entry>
</feed>"#;

    let parsed = FeedParser::new(true, false).parse_feed(body.as_bytes(), "UTF-8")?;

    assert_eq!(parsed.items.len(), 1);
    let item = &parsed.items[0];
    assert_eq!(item.guid, "urn:test:alert:1");
    assert_eq!(item.detail_url, "https://alerts.example.org/cap/storm.xml");
    assert_eq!(item.description, "Thunderstorms possible");
    assert_eq!(item.category, "Met");
    assert_eq!(
        item.published_at,
        Utc.with_ymd_and_hms(2024, 10, 14, 8, 15, 0).unwrap()
    );
    Ok(())
}

#[test]
fn test_latin1_feed() -> Result<()> {
    let mut item = RssItem::new("Alerte météo", "https://meteo.example.org/cap/1.xml");
    item.description = "Vent fort à très fort".to_string();
    let text = rss_feed(&[item]).replace(r#"encoding="UTF-8""#, r#"encoding="ISO-8859-1""#);
    let body: Vec<u8> = text.chars().map(|c| c as u8).collect();

    let parsed = FeedParser::new(true, false).parse_feed(&body, "ISO-8859-1")?;

    assert_eq!(parsed.items[0].title, "Alerte météo");
    assert_eq!(parsed.items[0].description, "Vent fort à très fort");
    Ok(())
}

#[test]
fn test_decode_body_rewrites_declaration() {
    let body = b"<?xml version=\"1.0\" encoding='windows-1252'?><rss/>";
    let decoded = decode_body(body, "windows-1252");
    assert!(decoded.contains("encoding='UTF-8'"));

    // Unknown labels fall back to UTF-8 and leave the text alone.
    let decoded = decode_body("<rss>é</rss>".as_bytes(), "no-such-charset");
    assert_eq!(decoded, "<rss>é</rss>");
}

#[test]
fn test_not_a_feed() {
    let result = FeedParser::new(true, false).parse_feed(b"<html><body>502</body></html>", "UTF-8");
    assert!(result.is_err());
}
