use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{parse_timestamp, Fetcher};
use crate::canonical::{extract_youtube_handle, key_identifier};
use crate::model::{FetchedItem, MediaKind, Source, SourceType};

const MAX_RESULTS: &str = "25";

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub id: SearchId,
    #[serde(default)]
    pub snippet: Snippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchId {
    pub video_id: Option<String>,
    pub channel_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub published_at: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
pub struct Thumbnails {
    pub high: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
pub struct Thumbnail {
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VideosResponse {
    #[serde(default)]
    pub items: Vec<Video>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: Option<String>,
    #[serde(default)]
    pub snippet: Snippet,
    pub content_details: Option<ContentDetails>,
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
pub struct ContentDetails {
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub view_count: Option<String>,
}

/// Recent uploads of one channel through the YouTube Data API.
/// Without an API key the fetcher yields nothing.
pub struct YoutubeFetcher {
    http: Client,
    api_base: String,
    api_key: Option<String>,
}

impl YoutubeFetcher {
    pub fn new(http: Client, api_base: String, api_key: Option<String>) -> Self {
        Self {
            http,
            api_base,
            api_key,
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), name)
    }

    /// `None` when the API answers with a non-success status.
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let res = self
            .http
            .get(self.endpoint(endpoint))
            .query(query)
            .send()
            .await
            .with_context(|| format!("YouTube {} request failed", endpoint))?;
        if !res.status().is_success() {
            debug!(endpoint, status = %res.status(), "YouTube API returned non-success status");
            return Ok(None);
        }
        let body = res
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode YouTube {} response", endpoint))?;
        Ok(Some(body))
    }

    async fn resolve_channel_id(&self, key: &str, identifier: &str) -> Result<Option<String>> {
        if is_channel_id(identifier) {
            return Ok(Some(identifier.to_string()));
        }
        let search: Option<SearchResponse> = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("maxResults", "1"),
                    ("q", identifier),
                    ("key", key),
                ],
            )
            .await?;
        Ok(search.and_then(|s| channel_id_from_search(&s)))
    }
}

fn is_channel_id(identifier: &str) -> bool {
    identifier.starts_with("UC")
}

/// Prefer the case-preserving stored URL; channel ids are case-sensitive.
fn identifier_for(source: &Source) -> Option<String> {
    extract_youtube_handle(&source.url)
        .ok()
        .or_else(|| key_identifier(SourceType::Youtube, &source.canonical_key))
}

pub fn channel_id_from_search(search: &SearchResponse) -> Option<String> {
    let first = search.items.first()?;
    first
        .id
        .channel_id
        .clone()
        .or_else(|| first.snippet.channel_id.clone())
}

pub fn video_ids_from_search(search: &SearchResponse) -> Vec<String> {
    search
        .items
        .iter()
        .filter_map(|item| item.id.video_id.clone())
        .collect()
}

/// Map the videos listing, skipping entries without an id or a parseable date
/// and anything published before `since`.
pub fn items_from_videos(
    videos: VideosResponse,
    source: &Source,
    since: DateTime<Utc>,
) -> Vec<FetchedItem> {
    videos
        .items
        .into_iter()
        .filter_map(|video| {
            let video_id = video.id?;
            let published_at = video
                .snippet
                .published_at
                .as_deref()
                .and_then(parse_timestamp)?;
            if published_at < since {
                return None;
            }
            let thumbnail = video.snippet.thumbnails.high.and_then(|t| t.url);

            let mut metadata = Map::new();
            metadata.insert(
                "duration".into(),
                video
                    .content_details
                    .and_then(|d| d.duration)
                    .map_or(Value::Null, Value::String),
            );
            metadata.insert(
                "viewCount".into(),
                video
                    .statistics
                    .and_then(|s| s.view_count)
                    .map_or(Value::Null, Value::String),
            );
            metadata.insert("thumbnailUrl".into(), json!(thumbnail));
            metadata.insert(
                "embedUrl".into(),
                json!(format!("https://www.youtube.com/embed/{}", video_id)),
            );

            Some(FetchedItem {
                url: Some(format!("https://www.youtube.com/watch?v={}", video_id)),
                external_id: video_id,
                title: video.snippet.title,
                content: video.snippet.description.unwrap_or_default(),
                author: video
                    .snippet
                    .channel_title
                    .or_else(|| Some(source.name.clone())),
                image_url: thumbnail,
                media_kind: MediaKind::Video,
                metadata,
                published_at,
            })
        })
        .collect()
}

#[async_trait]
impl Fetcher for YoutubeFetcher {
    async fn fetch(&self, source: &Source, since: DateTime<Utc>) -> Result<Vec<FetchedItem>> {
        let Some(key) = self.api_key.as_deref() else {
            debug!(source_id = source.id, "YouTube API key not configured, skipping");
            return Ok(Vec::new());
        };
        let Some(identifier) = identifier_for(source) else {
            return Ok(Vec::new());
        };
        let Some(channel_id) = self.resolve_channel_id(key, &identifier).await? else {
            debug!(source_id = source.id, identifier = %identifier, "YouTube channel not resolved");
            return Ok(Vec::new());
        };

        let published_after = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let search: Option<SearchResponse> = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("channelId", channel_id.as_str()),
                    ("maxResults", MAX_RESULTS),
                    ("order", "date"),
                    ("type", "video"),
                    ("publishedAfter", published_after.as_str()),
                    ("key", key),
                ],
            )
            .await?;
        let video_ids = search.map(|s| video_ids_from_search(&s)).unwrap_or_default();
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = video_ids.join(",");
        let videos: Option<VideosResponse> = self
            .get_json(
                "videos",
                &[
                    ("part", "snippet,contentDetails,statistics"),
                    ("id", ids.as_str()),
                    ("key", key),
                ],
            )
            .await?;
        Ok(videos
            .map(|v| items_from_videos(v, source, since))
            .unwrap_or_default())
    }
}
