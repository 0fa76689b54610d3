//! Canonical source keys: one stable string per upstream origin, so that two
//! subscribers adding the same channel in different spellings share a source.
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use thiserror::Error;

use crate::model::SourceType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("{0} source URL/handle is required")]
    Empty(&'static str),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unable to extract {0} identifier")]
    Unrecognized(&'static str),
}

static X_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(https?://)?(www\.)?(twitter|x)\.com/").expect("static regex"));
static TELEGRAM_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(https?://)?t\.me/(s/)?").expect("static regex"));
static BARE_HANDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@?[a-zA-Z0-9._-]+$").expect("static regex"));

/// Prefix `https://` unless the input already names an http(s) scheme.
pub fn ensure_protocol(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    }
}

fn parse_url(input: &str) -> Result<Url, CanonicalError> {
    Url::parse(&ensure_protocol(input)).map_err(|_| CanonicalError::InvalidUrl(input.to_string()))
}

/// Extract a channel handle (or `UC...` channel id) from a YouTube URL or bare handle.
pub fn extract_youtube_handle(input: &str) -> Result<String, CanonicalError> {
    let value = input.trim();
    if value.is_empty() {
        return Err(CanonicalError::Empty("YouTube"));
    }
    if BARE_HANDLE.is_match(value) {
        return Ok(value.trim_start_matches('@').to_string());
    }

    let url = parse_url(value)?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if let Some(at) = segments.iter().find(|seg| seg.starts_with('@')) {
        return Ok(at.trim_start_matches('@').to_string());
    }
    if let Some(pos) = segments.iter().position(|seg| *seg == "channel") {
        if let Some(id) = segments.get(pos + 1) {
            return Ok((*id).to_string());
        }
    }
    segments
        .first()
        .map(|seg| seg.trim_start_matches('@').to_string())
        .ok_or(CanonicalError::Unrecognized("YouTube"))
}

/// Extract the account name from an X/Twitter URL or `@handle`.
pub fn extract_x_username(input: &str) -> String {
    let stripped = X_PREFIX.replace(input.trim(), "");
    stripped
        .trim_start_matches('@')
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Extract the channel name from a `t.me` URL or `@channel`.
pub fn extract_telegram_channel(input: &str) -> String {
    let stripped = TELEGRAM_PREFIX.replace(input.trim(), "");
    stripped
        .trim_start_matches('@')
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Compute the canonical key for a raw URL/handle of the given type.
pub fn canonical_key(source_type: SourceType, input: &str) -> Result<String, CanonicalError> {
    let raw = input.trim();
    match source_type {
        SourceType::X => {
            let username = extract_x_username(raw);
            if username.is_empty() {
                return Err(CanonicalError::Unrecognized("X"));
            }
            Ok(format!("x:{}", username.to_lowercase()))
        }
        SourceType::Youtube => {
            let handle = extract_youtube_handle(raw)?;
            Ok(format!("youtube:{}", handle.to_lowercase()))
        }
        SourceType::Substack => {
            let url = parse_url(raw)?;
            let subdomain = url
                .host_str()
                .and_then(|h| h.split('.').next())
                .filter(|s| !s.is_empty())
                .ok_or(CanonicalError::Unrecognized("Substack"))?;
            Ok(format!("substack:{}", subdomain.to_lowercase()))
        }
        SourceType::Telegram => {
            let channel = extract_telegram_channel(raw);
            if channel.is_empty() {
                return Err(CanonicalError::Unrecognized("Telegram"));
            }
            Ok(format!("telegram:{}", channel.to_lowercase()))
        }
        SourceType::Website => {
            let url = parse_url(raw)?;
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or(CanonicalError::Unrecognized("website"))?;
            Ok(format!("website:{}", host.to_lowercase()))
        }
    }
}

/// The part of a canonical key after its `type:` prefix, if the prefix matches.
pub fn key_identifier(source_type: SourceType, key: &str) -> Option<String> {
    key.strip_prefix(source_type.as_str())
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}
