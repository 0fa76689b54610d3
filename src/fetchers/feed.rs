use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// The fields every feed-backed fetcher reads from an RSS/Atom entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Parse an RSS/Atom document, keeping entries published at or after `since`.
/// Entries without a usable date are dropped. An entry without a guid/id keeps
/// `id: None`; feed-rs would otherwise hash link and title into one.
pub fn parse_entries(body: &[u8], since: DateTime<Utc>) -> Result<Vec<FeedEntry>> {
    let parser = feed_rs::parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build();
    let feed = parser.parse(body).context("Failed to parse RSS/Atom feed")?;

    let entries = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let published_at = entry.published.or(entry.updated)?;
            if published_at < since {
                return None;
            }
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();
            Some(FeedEntry {
                id: Some(entry.id).filter(|id| !id.trim().is_empty()),
                link: entry.links.first().map(|l| l.href.clone()),
                title: entry.title.map(|t| t.content),
                content,
                author: entry
                    .authors
                    .into_iter()
                    .map(|p| p.name)
                    .find(|name| !name.trim().is_empty()),
                published_at,
            })
        })
        .collect();
    Ok(entries)
}

#[cfg(test)]
pub(crate) const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Sample</title>
    <link>https://sample.example.com</link>
    <description>Sample feed</description>
    <item>
      <title>Fresh post</title>
      <link>https://sample.example.com/p/fresh</link>
      <guid>https://sample.example.com/p/fresh</guid>
      <dc:creator>Ada</dc:creator>
      <pubDate>Tue, 03 Mar 2026 10:00:00 +0000</pubDate>
      <content:encoded><![CDATA[<p>Rust programming tips</p>]]></content:encoded>
    </item>
    <item>
      <title>Old post</title>
      <link>https://sample.example.com/p/old</link>
      <guid>https://sample.example.com/p/old</guid>
      <pubDate>Sun, 01 Feb 2026 10:00:00 +0000</pubDate>
      <description>old news</description>
    </item>
    <item>
      <title>Undated</title>
      <link>https://sample.example.com/p/undated</link>
      <description>no date here</description>
    </item>
  </channel>
</rss>"#;
