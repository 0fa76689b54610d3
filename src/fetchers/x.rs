use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Map;
use tracing::debug;

use super::feed::{self, FeedEntry};
use super::{get_feed_bytes, Fetcher};
use crate::canonical::{extract_x_username, key_identifier};
use crate::model::{FetchedItem, MediaKind, Source, SourceType};

/// Posts of one account, read through an RSSHub bridge.
pub struct XFetcher {
    http: Client,
    rsshub_base_url: String,
}

impl XFetcher {
    pub fn new(http: Client, rsshub_base_url: String) -> Self {
        Self {
            http,
            rsshub_base_url,
        }
    }

    fn feed_url(&self, username: &str) -> String {
        format!(
            "{}/twitter/user/{}",
            self.rsshub_base_url.trim_end_matches('/'),
            username
        )
    }
}

fn username_for(source: &Source) -> String {
    key_identifier(SourceType::X, &source.canonical_key)
        .unwrap_or_else(|| extract_x_username(&source.url).to_lowercase())
}

/// Entries without an id are skipped; posts carry no title.
pub(crate) fn items_from_entries(entries: Vec<FeedEntry>, source: &Source) -> Vec<FetchedItem> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id?;
            Some(FetchedItem {
                external_id: id,
                title: None,
                content: entry.content,
                author: entry.author.or_else(|| Some(source.name.clone())),
                url: entry.link,
                image_url: None,
                media_kind: MediaKind::Text,
                metadata: Map::new(),
                published_at: entry.published_at,
            })
        })
        .collect()
}

#[async_trait]
impl Fetcher for XFetcher {
    async fn fetch(&self, source: &Source, since: DateTime<Utc>) -> Result<Vec<FetchedItem>> {
        let username = username_for(source);
        if username.is_empty() {
            debug!(source_id = source.id, "no X username, nothing to fetch");
            return Ok(Vec::new());
        }
        let body = get_feed_bytes(&self.http, &self.feed_url(&username)).await?;
        let entries = feed::parse_entries(&body, since)?;
        Ok(items_from_entries(entries, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FetchStatus;
    use chrono::TimeZone;

    fn source() -> Source {
        Source {
            id: 1,
            source_type: SourceType::X,
            url: "https://x.com/RustLang".into(),
            canonical_key: "x:rustlang".into(),
            name: "Rust".into(),
            enabled: true,
            last_fetched_at: None,
            last_fetch_status: FetchStatus::Never,
        }
    }

    #[test]
    fn feed_url_uses_canonical_username() {
        let fetcher = XFetcher::new(Client::new(), "http://rsshub.local:1200/".into());
        assert_eq!(
            fetcher.feed_url(&username_for(&source())),
            "http://rsshub.local:1200/twitter/user/rustlang"
        );
    }

    #[test]
    fn entries_become_text_posts() {
        let since = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap();
        let entries = feed::parse_entries(feed::SAMPLE_RSS.as_bytes(), since).unwrap();
        let items = items_from_entries(entries, &source());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].media_kind, MediaKind::Text);
        assert_eq!(items[0].title, None);
        assert_eq!(items[0].external_id, "https://sample.example.com/p/fresh");
        assert!(items[0].author.is_some());
    }

    #[test]
    fn entries_without_guid_are_skipped() {
        let since = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap();
        let body = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title><link>https://x.com/rustlang</link><description>d</description>
<item><title>kept</title><link>https://x.com/rustlang/status/2</link><guid>https://x.com/rustlang/status/2</guid><pubDate>Tue, 03 Mar 2026 10:00:00 +0000</pubDate></item>
<item><title>dropped</title><link>https://x.com/rustlang/status/3</link><pubDate>Tue, 03 Mar 2026 11:00:00 +0000</pubDate></item>
</channel></rss>"#;
        let entries = feed::parse_entries(body.as_bytes(), since).unwrap();
        assert_eq!(entries.len(), 2);
        let items = items_from_entries(entries, &source());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "https://x.com/rustlang/status/2");
    }
}
