use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::{json, Map};
use tracing::debug;

use super::feed::{self, FeedEntry};
use super::{get_text, parse_timestamp, read_time_minutes, selector, synthetic_id, Fetcher};
use crate::canonical::ensure_protocol;
use crate::model::{FetchedItem, MediaKind, Source};

static OG_TITLE: Lazy<Selector> = Lazy::new(|| selector("meta[property='og:title']"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static ARTICLE: Lazy<Selector> = Lazy::new(|| selector("article"));
static MAIN: Lazy<Selector> = Lazy::new(|| selector("main"));
static BODY: Lazy<Selector> = Lazy::new(|| selector("body"));
static PUBLISHED_META: Lazy<Selector> =
    Lazy::new(|| selector("meta[property='article:published_time']"));
static TIME: Lazy<Selector> = Lazy::new(|| selector("time[datetime]"));
static OG_IMAGE: Lazy<Selector> = Lazy::new(|| selector("meta[property='og:image']"));
static ARTICLE_IMG: Lazy<Selector> = Lazy::new(|| selector("article img"));

/// Arbitrary sites: the URL is tried as an RSS/Atom feed first and, when the
/// body is not a feed, the page itself becomes a single article.
pub struct WebsiteFetcher {
    http: Client,
}

impl WebsiteFetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

fn site_metadata(source: &Source, content: &str) -> Map<String, serde_json::Value> {
    let mut metadata = Map::new();
    metadata.insert("siteName".into(), json!(source.name));
    metadata.insert("readTimeMinutes".into(), json!(read_time_minutes(content)));
    metadata
}

pub(crate) fn items_from_entries(entries: Vec<FeedEntry>, source: &Source) -> Vec<FetchedItem> {
    entries
        .into_iter()
        .map(|entry| {
            let external_id = entry.id.or_else(|| entry.link.clone()).unwrap_or_else(|| {
                let published = entry.published_at.to_rfc3339_opts(SecondsFormat::Millis, true);
                synthetic_id(&[&source.canonical_key, ":", &published])
            });
            FetchedItem {
                external_id,
                title: entry.title,
                author: entry.author.or_else(|| Some(source.name.clone())),
                url: entry.link,
                image_url: None,
                media_kind: MediaKind::Article,
                metadata: site_metadata(source, &entry.content),
                published_at: entry.published_at,
                content: entry.content,
            }
        })
        .collect()
}

/// Treat a whole page as one article. A page with no recognizable publish
/// time is stamped `now`.
pub fn extract_article(
    html: &str,
    page_url: &str,
    source: &Source,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<FetchedItem> {
    let doc = Html::parse_document(html);
    let attr = |sel: &Selector, name: &str| {
        doc.select(sel)
            .next()
            .and_then(|el| el.value().attr(name))
            .map(str::to_string)
    };

    let published_at = match attr(&PUBLISHED_META, "content").or_else(|| attr(&TIME, "datetime")) {
        Some(raw) => parse_timestamp(&raw)?,
        None => now,
    };
    if published_at < since {
        return None;
    }

    let title = attr(&OG_TITLE, "content")
        .or_else(|| {
            doc.select(&TITLE)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| source.name.clone());
    let content = [&*ARTICLE, &*MAIN, &*BODY]
        .into_iter()
        .find_map(|sel| doc.select(sel).next())
        .map(|el| el.inner_html())
        .unwrap_or_default();
    let image_url = attr(&OG_IMAGE, "content").or_else(|| attr(&ARTICLE_IMG, "src"));

    let published = published_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    Some(FetchedItem {
        external_id: synthetic_id(&[page_url, &published]),
        title: Some(title),
        author: Some(source.name.clone()),
        url: Some(page_url.to_string()),
        image_url,
        media_kind: MediaKind::Article,
        metadata: site_metadata(source, &content),
        published_at,
        content,
    })
}

#[async_trait]
impl Fetcher for WebsiteFetcher {
    async fn fetch(&self, source: &Source, since: DateTime<Utc>) -> Result<Vec<FetchedItem>> {
        let url = ensure_protocol(source.url.trim());
        let Some(body) = get_text(&self.http, &url).await? else {
            return Ok(Vec::new());
        };

        match feed::parse_entries(body.as_bytes(), since) {
            Ok(entries) => Ok(items_from_entries(entries, source)),
            Err(err) => {
                debug!(source_id = source.id, error = %err, "not a feed, extracting page");
                Ok(extract_article(&body, &url, source, since, Utc::now())
                    .into_iter()
                    .collect())
            }
        }
    }
}
