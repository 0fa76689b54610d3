//! Content normalization: date floor, markup allow-list, byte ceiling and
//! keyword categorization. Pure functions, no I/O.
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Node};

use crate::model::{FetchedItem, NormalizedItem};

pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated]";
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Category table, scanned in declaration order; first hit wins.
pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "AI & ML",
        &[
            "ai",
            "artificial intelligence",
            "machine learning",
            "llm",
            "gpt",
            "neural",
            "deep learning",
        ],
    ),
    (
        "Programming",
        &[
            "javascript",
            "typescript",
            "python",
            "rust",
            "golang",
            "programming",
            "software engineering",
        ],
    ),
    (
        "Tech News",
        &["release", "launch", "breaking", "announcement", "update", "startup", "funding"],
    ),
    (
        "Science",
        &["science", "research", "study", "experiment", "biology", "physics", "chemistry"],
    ),
    (
        "Opinion",
        &["opinion", "editorial", "essay", "thoughts", "analysis", "commentary"],
    ),
];

const ALLOWED_TAGS: &[&str] = &[
    "address", "article", "aside", "footer", "header", "h1", "h2", "h3", "h4", "h5", "h6",
    "hgroup", "main", "nav", "section", "blockquote", "dd", "div", "dl", "dt", "figcaption",
    "figure", "hr", "li", "ol", "p", "pre", "ul", "a", "abbr", "b", "bdi", "bdo", "br", "cite",
    "code", "data", "dfn", "em", "i", "kbd", "mark", "q", "rb", "rp", "rt", "rtc", "ruby", "s",
    "samp", "small", "span", "strong", "sub", "sup", "time", "u", "var", "wbr", "caption", "col",
    "colgroup", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "img", "iframe",
];

/// Dropped together with everything inside them.
const DROP_WITH_CONTENT: &[&str] = &["script", "style", "textarea", "option", "noscript"];

const VOID_TAGS: &[&str] = &["br", "hr", "img", "wbr", "col"];

const URL_ATTRS: &[&str] = &["href", "src"];
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto"];

fn allowed_attrs(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "name", "target", "rel"],
        "img" => &["src", "alt"],
        "iframe" => &["src", "allow", "allowfullscreen", "frameborder"],
        _ => &[],
    }
}

fn url_allowed(value: &str) -> bool {
    let v = value.trim();
    match v.split_once(':') {
        // A colon after a path/query/fragment delimiter is not a scheme.
        Some((scheme, _)) if !scheme.contains(['/', '?', '#']) => ALLOWED_SCHEMES
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme.trim())),
        _ => true,
    }
}

fn escape_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn write_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => escape_text(text, out),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    write_element(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(el: ElementRef<'_>, out: &mut String) {
    let tag = el.value().name();
    if DROP_WITH_CONTENT.contains(&tag) {
        return;
    }
    if !ALLOWED_TAGS.contains(&tag) {
        write_children(el, out);
        return;
    }

    out.push('<');
    out.push_str(tag);
    let per_tag = allowed_attrs(tag);
    for (name, value) in el.value().attrs() {
        if name != "class" && !per_tag.contains(&name) {
            continue;
        }
        if URL_ATTRS.contains(&name) && !url_allowed(value) {
            continue;
        }
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');

    if VOID_TAGS.contains(&tag) {
        return;
    }
    write_children(el, out);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

/// Reduce markup to the allow-listed elements and attributes.
pub fn sanitize_html(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());
    write_children(fragment.root_element(), &mut out);
    out
}

/// Cap `input` at `max_bytes` (marker included), cutting on a char boundary.
pub fn truncate_to_bytes(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }
    let mut cut = max_bytes.saturating_sub(TRUNCATION_MARKER.len()).min(input.len());
    while !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
    out.push_str(&input[..cut]);
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Keyword heuristic over lower-cased title and content.
pub fn detect_category(title: Option<&str>, content: &str) -> &'static str {
    let text = format!("{} {}", title.unwrap_or_default(), content).to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(UNCATEGORIZED)
}

/// Apply the date floor, sanitize, truncate and categorize, preserving order.
pub fn normalize_items(
    items: Vec<FetchedItem>,
    start_date: DateTime<Utc>,
    max_bytes: usize,
) -> Vec<NormalizedItem> {
    items
        .into_iter()
        .filter(|item| item.published_at >= start_date)
        .map(|mut item| {
            let sanitized = sanitize_html(&item.content);
            item.content = truncate_to_bytes(&sanitized, max_bytes);
            let category = detect_category(item.title.as_deref(), &item.content);
            NormalizedItem { item, category }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaKind;
    use chrono::TimeZone;

    fn fetched(title: &str, content: &str, published_at: DateTime<Utc>) -> FetchedItem {
        FetchedItem {
            external_id: title.to_string(),
            title: Some(title.to_string()),
            content: content.to_string(),
            author: None,
            url: None,
            image_url: None,
            media_kind: MediaKind::Article,
            metadata: serde_json::Map::new(),
            published_at,
        }
    }

    #[test]
    fn script_is_stripped_structure_kept() {
        assert_eq!(
            sanitize_html("<script>evil()</script><p>Hello</p>"),
            "<p>Hello</p>"
        );
    }

    #[test]
    fn disallowed_attributes_and_schemes_removed() {
        let out = sanitize_html(
            r#"<a href="javascript:alert(1)" onclick="x()" class="c">x</a><img src="https://i.example/a.png" onerror="y()">"#,
        );
        assert_eq!(
            out,
            r#"<a class="c">x</a><img src="https://i.example/a.png">"#
        );
    }

    #[test]
    fn unknown_elements_are_unwrapped() {
        assert_eq!(
            sanitize_html("<custom-tag><b>bold</b> &amp; text</custom-tag><style>p{}</style>"),
            "<b>bold</b> &amp; text"
        );
        let embed = sanitize_html(
            r#"<iframe src="https://www.youtube.com/embed/abc" allowfullscreen="" srcdoc="x"></iframe>"#,
        );
        assert!(embed.starts_with("<iframe"));
        assert!(embed.contains(r#"src="https://www.youtube.com/embed/abc""#));
        assert!(embed.contains(r#"allowfullscreen="""#));
        assert!(!embed.contains("srcdoc"));
    }

    #[test]
    fn relative_urls_survive() {
        assert_eq!(
            sanitize_html(r#"<a href="/posts/1?x=a:b">link</a>"#),
            r#"<a href="/posts/1?x=a:b">link</a>"#
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let input = "é".repeat(100); // 200 bytes
        let max = TRUNCATION_MARKER.len() + 5;
        let out = truncate_to_bytes(&input, max);
        assert!(out.len() <= max);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.trim_end_matches(TRUNCATION_MARKER), "éé");

        assert_eq!(truncate_to_bytes("short", 1024), "short");
    }

    #[test]
    fn categories_follow_table_order() {
        assert_eq!(detect_category(Some("New LLM release"), ""), "AI & ML");
        assert_eq!(detect_category(Some("Writing Rust"), "a tutorial"), "Programming");
        assert_eq!(detect_category(None, "BREAKING: funding round"), "Tech News");
        assert_eq!(detect_category(Some("Hello"), "world"), UNCATEGORIZED);
    }

    #[test]
    fn items_before_floor_are_dropped() {
        let floor = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap();
        let items = vec![
            fetched("old", "<p>x</p>", floor - chrono::Duration::days(1)),
            fetched("edge", "<p>y</p>", floor),
            fetched("new", "<script>z</script><p>physics</p>", floor + chrono::Duration::days(3)),
        ];
        let out = normalize_items(items, floor, 50 * 1024);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].item.external_id, "edge");
        assert_eq!(out[1].item.content, "<p>physics</p>");
        assert_eq!(out[1].category, "Science");
    }
}
