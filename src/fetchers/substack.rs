use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::{json, Map};

use super::feed::{self, FeedEntry};
use super::{get_feed_bytes, read_time_minutes, Fetcher};
use crate::canonical::ensure_protocol;
use crate::model::{FetchedItem, MediaKind, Source};

pub struct SubstackFetcher {
    http: Client,
}

impl SubstackFetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

/// `<publication>/feed`, unless the stored URL already points at the feed.
pub fn feed_url(source_url: &str) -> String {
    let base = ensure_protocol(source_url.trim());
    if base.ends_with("/feed") {
        base
    } else {
        format!("{}/feed", base.trim_end_matches('/'))
    }
}

/// Map feed entries to articles. The id falls back to the link, then to
/// `<canonical key>:<published>`.
pub(crate) fn items_from_entries(entries: Vec<FeedEntry>, source: &Source) -> Vec<FetchedItem> {
    entries
        .into_iter()
        .map(|entry| {
            let external_id = entry
                .id
                .or_else(|| entry.link.clone())
                .unwrap_or_else(|| {
                    format!(
                        "{}:{}",
                        source.canonical_key,
                        entry.published_at.to_rfc3339_opts(SecondsFormat::Millis, true)
                    )
                });
            let mut metadata = Map::new();
            metadata.insert(
                "readTimeMinutes".into(),
                json!(read_time_minutes(&entry.content)),
            );
            FetchedItem {
                external_id,
                title: entry.title,
                author: entry.author.or_else(|| Some(source.name.clone())),
                url: entry.link,
                image_url: None,
                media_kind: MediaKind::Article,
                metadata,
                published_at: entry.published_at,
                content: entry.content,
            }
        })
        .collect()
}

#[async_trait]
impl Fetcher for SubstackFetcher {
    async fn fetch(&self, source: &Source, since: DateTime<Utc>) -> Result<Vec<FetchedItem>> {
        let body = get_feed_bytes(&self.http, &feed_url(&source.url)).await?;
        let entries = feed::parse_entries(&body, since)?;
        Ok(items_from_entries(entries, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FetchStatus, SourceType};
    use chrono::TimeZone;

    #[test]
    fn feed_url_appends_once() {
        assert_eq!(
            feed_url("newsletter.substack.com"),
            "https://newsletter.substack.com/feed"
        );
        assert_eq!(
            feed_url("https://newsletter.substack.com/"),
            "https://newsletter.substack.com/feed"
        );
        assert_eq!(
            feed_url("https://newsletter.substack.com/feed"),
            "https://newsletter.substack.com/feed"
        );
    }

    #[test]
    fn id_falls_back_to_key_and_timestamp() {
        let source = Source {
            id: 3,
            source_type: SourceType::Substack,
            url: "newsletter.substack.com".into(),
            canonical_key: "substack:newsletter".into(),
            name: "Newsletter".into(),
            enabled: true,
            last_fetched_at: None,
            last_fetch_status: FetchStatus::Never,
        };
        let entry = FeedEntry {
            id: None,
            link: None,
            title: Some("Untitled".into()),
            content: "one two three".into(),
            author: None,
            published_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap(),
        };
        let items = items_from_entries(vec![entry], &source);
        assert_eq!(
            items[0].external_id,
            "substack:newsletter:2026-03-01T08:30:00.000Z"
        );
        assert_eq!(items[0].author.as_deref(), Some("Newsletter"));
        assert_eq!(items[0].metadata["readTimeMinutes"], 1);
        assert_eq!(items[0].media_kind, MediaKind::Article);
    }

    fn guidless_rss(title: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>News</title><link>https://s.example.com</link><description>d</description>
<item><title>{title}</title><link>https://s.example.com/p/1</link><pubDate>Tue, 03 Mar 2026 10:00:00 +0000</pubDate><description>body</description></item>
</channel></rss>"#
        )
    }

    #[test]
    fn edited_title_keeps_link_as_id() {
        let source = Source {
            id: 3,
            source_type: SourceType::Substack,
            url: "s.example.com".into(),
            canonical_key: "substack:s".into(),
            name: "News".into(),
            enabled: true,
            last_fetched_at: None,
            last_fetch_status: FetchStatus::Never,
        };
        let since = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap();
        let first = feed::parse_entries(guidless_rss("First title").as_bytes(), since).unwrap();
        let edited = feed::parse_entries(guidless_rss("Edited title").as_bytes(), since).unwrap();

        let first = items_from_entries(first, &source);
        let edited = items_from_entries(edited, &source);
        assert_eq!(first[0].external_id, "https://s.example.com/p/1");
        assert_eq!(first[0].external_id, edited[0].external_id);
        assert_eq!(edited[0].title.as_deref(), Some("Edited title"));
    }
}
