use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

use super::{get_text, parse_timestamp, selector, Fetcher};
use crate::canonical::{extract_telegram_channel, key_identifier};
use crate::model::{FetchedItem, MediaKind, Source, SourceType};

static MESSAGE_WRAP: Lazy<Selector> = Lazy::new(|| selector(".tgme_widget_message_wrap"));
static MESSAGE: Lazy<Selector> = Lazy::new(|| selector(".tgme_widget_message[data-post]"));
static TIME: Lazy<Selector> = Lazy::new(|| selector("time[datetime]"));
static TEXT: Lazy<Selector> = Lazy::new(|| selector(".tgme_widget_message_text"));
static DATE_LINK: Lazy<Selector> = Lazy::new(|| selector("a.tgme_widget_message_date"));
static PHOTO: Lazy<Selector> = Lazy::new(|| selector(".tgme_widget_message_photo_wrap img"));
static VIEWS: Lazy<Selector> = Lazy::new(|| selector(".tgme_widget_message_views"));

/// Messages of a public channel, scraped from its `t.me/s/` preview page.
pub struct TelegramFetcher {
    http: Client,
}

impl TelegramFetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

pub fn preview_url(source: &Source) -> Option<String> {
    let channel = key_identifier(SourceType::Telegram, &source.canonical_key)
        .unwrap_or_else(|| extract_telegram_channel(&source.url));
    if channel.is_empty() {
        None
    } else {
        Some(format!("https://t.me/s/{}", channel))
    }
}

fn first<'a>(scope: ElementRef<'a>, sel: &Selector) -> Option<ElementRef<'a>> {
    scope.select(sel).next()
}

/// Extract messages from a preview page. Messages without a post id or a
/// parseable timestamp are skipped, as is anything published before `since`.
pub fn parse_messages(html: &str, source: &Source, since: DateTime<Utc>) -> Vec<FetchedItem> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();

    for wrap in doc.select(&MESSAGE_WRAP) {
        let Some(post_id) = first(wrap, &MESSAGE).and_then(|m| m.value().attr("data-post"))
        else {
            continue;
        };
        let Some(published_at) = first(wrap, &TIME)
            .and_then(|t| t.value().attr("datetime"))
            .and_then(parse_timestamp)
        else {
            continue;
        };
        if published_at < since {
            continue;
        }

        let content = first(wrap, &TEXT).map(|t| t.inner_html()).unwrap_or_default();
        let url = first(wrap, &DATE_LINK)
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);
        let image_url = first(wrap, &PHOTO)
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);
        let views = first(wrap, &VIEWS)
            .map(|v| v.text().collect::<String>().trim().to_string())
            .filter(|v| !v.is_empty());

        let mut metadata = Map::new();
        if let Some(views) = views {
            metadata.insert("viewCount".into(), Value::String(views));
        }

        items.push(FetchedItem {
            external_id: post_id.to_string(),
            title: None,
            content,
            author: Some(source.name.clone()),
            url,
            media_kind: if image_url.is_some() {
                MediaKind::Image
            } else {
                MediaKind::Text
            },
            image_url,
            metadata,
            published_at,
        });
    }
    items
}

#[async_trait]
impl Fetcher for TelegramFetcher {
    async fn fetch(&self, source: &Source, since: DateTime<Utc>) -> Result<Vec<FetchedItem>> {
        let Some(url) = preview_url(source) else {
            return Ok(Vec::new());
        };
        let Some(html) = get_text(&self.http, &url).await? else {
            return Ok(Vec::new());
        };
        Ok(parse_messages(&html, source, since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FetchStatus;
    use chrono::TimeZone;

    const PAGE: &str = r#"<html><body>
<div class="tgme_widget_message_wrap">
  <div class="tgme_widget_message" data-post="durov/100">
    <div class="tgme_widget_message_photo_wrap"><img src="https://cdn.t.me/p.jpg"></div>
    <div class="tgme_widget_message_text">Hello <b>world</b></div>
    <span class="tgme_widget_message_views">1.2K</span>
    <a class="tgme_widget_message_date" href="https://t.me/durov/100"><time datetime="2026-03-01T09:00:00+00:00">09:00</time></a>
  </div>
</div>
<div class="tgme_widget_message_wrap">
  <div class="tgme_widget_message" data-post="durov/99">
    <div class="tgme_widget_message_text">Old one</div>
    <a class="tgme_widget_message_date" href="https://t.me/durov/99"><time datetime="2026-01-01T09:00:00+00:00">09:00</time></a>
  </div>
</div>
<div class="tgme_widget_message_wrap">
  <div class="tgme_widget_message">
    <div class="tgme_widget_message_text">No post id</div>
    <time datetime="2026-03-01T09:00:00+00:00">09:00</time>
  </div>
</div>
<div class="tgme_widget_message_wrap">
  <div class="tgme_widget_message" data-post="durov/101">
    <div class="tgme_widget_message_text">Plain text</div>
    <a class="tgme_widget_message_date" href="https://t.me/durov/101"><time datetime="2026-03-02T09:00:00+00:00">09:00</time></a>
  </div>
</div>
</body></html>"#;

    fn source() -> Source {
        Source {
            id: 4,
            source_type: SourceType::Telegram,
            url: "https://t.me/durov".into(),
            canonical_key: "telegram:durov".into(),
            name: "Durov".into(),
            enabled: true,
            last_fetched_at: None,
            last_fetch_status: FetchStatus::Never,
        }
    }

    #[test]
    fn preview_url_from_key() {
        assert_eq!(preview_url(&source()).as_deref(), Some("https://t.me/s/durov"));
    }

    #[test]
    fn messages_are_extracted() {
        let since = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap();
        let items = parse_messages(PAGE, &source(), since);
        assert_eq!(items.len(), 2);

        let photo = &items[0];
        assert_eq!(photo.external_id, "durov/100");
        assert_eq!(photo.media_kind, MediaKind::Image);
        assert_eq!(photo.image_url.as_deref(), Some("https://cdn.t.me/p.jpg"));
        assert_eq!(photo.url.as_deref(), Some("https://t.me/durov/100"));
        assert_eq!(photo.content, "Hello <b>world</b>");
        assert_eq!(photo.metadata["viewCount"], "1.2K");
        assert_eq!(photo.author.as_deref(), Some("Durov"));

        let text = &items[1];
        assert_eq!(text.external_id, "durov/101");
        assert_eq!(text.media_kind, MediaKind::Text);
        assert!(text.metadata.get("viewCount").is_none());
    }
}
