//! Text and URL normalization shared by the source adapters.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use html2text::render::TrivialDecorator;
use regex::Regex;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};

// Wide enough that html2text never wraps paragraphs.
const TEXT_WIDTH: usize = 10_000;

static TRAILING_SPACE: OnceLock<Regex> = OnceLock::new();
static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
static IMAGE_EXT: OnceLock<Regex> = OnceLock::new();
static ENGLISH_DATE: OnceLock<Regex> = OnceLock::new();

fn trailing_space() -> &'static Regex {
    TRAILING_SPACE.get_or_init(|| Regex::new(r"[ \t]+\n").expect("static regex"))
}

fn blank_runs() -> &'static Regex {
    BLANK_RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

fn image_ext() -> &'static Regex {
    IMAGE_EXT.get_or_init(|| {
        Regex::new(r"(?i)\.(jpg|jpeg|png|gif|bmp|webp)(\?|$)").expect("static regex")
    })
}

fn english_date() -> &'static Regex {
    ENGLISH_DATE.get_or_init(|| {
        Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\s+\d{1,2},\s+\d{4}\b")
            .expect("static regex")
    })
}

pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::Config(format!("invalid selector '{css}': {e}")))
}

/// Normalize line endings, strip trailing blanks and collapse 3+ newlines to 2.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = trailing_space().replace_all(&text, "\n");
    blank_runs().replace_all(&text, "\n\n").trim().to_string()
}

/// Render an HTML fragment as plain text. Emphasis, links and list markers
/// are dropped rather than rendered as Markdown, so the fingerprint only
/// follows the wording.
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read_with_decorator(html.as_bytes(), TEXT_WIDTH, TrivialDecorator::new()) {
        Ok(text) => normalize_text(&text),
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            normalize_text(&inline_text(html))
        }
    }
}

/// Text content of a fragment with whitespace collapsed to single spaces,
/// for titles and other one-line fields.
pub fn inline_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a possibly relative URL against `base_url`.
pub fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    url::Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .ok()
}

/// Drop empties and duplicates, keeping the first occurrence.
pub fn unique_keep_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

/// `img[src]` URLs of an HTML fragment, resolved and deduplicated.
pub fn image_urls(html: &str, base_url: &str) -> Result<Vec<String>> {
    let img = selector("img[src]")?;
    let fragment = Html::parse_fragment(html);
    Ok(unique_keep_order(
        fragment
            .select(&img)
            .filter_map(|el| el.value().attr("src"))
            .filter_map(|src| resolve_url(src, base_url)),
    ))
}

pub fn is_image_url(url: &str) -> bool {
    image_ext().is_match(url)
}

/// Split media URLs into `(images, files)` by extension, preserving order.
pub fn partition_media(urls: Vec<String>) -> (Vec<String>, Vec<String>) {
    unique_keep_order(urls)
        .into_iter()
        .partition(|url| is_image_url(url))
}

/// Trim labels, drop stoplisted ones and duplicates.
pub fn filter_tags<I>(tags: I, stoplist: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    unique_keep_order(
        tags.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !stoplist.iter().any(|s| s.eq_ignore_ascii_case(t))),
    )
}

/// First `Mon DD, YYYY` date in `text`, as UTC midnight.
pub fn find_english_date(text: &str) -> Option<DateTime<Utc>> {
    let found = english_date().find(text)?;
    let compact = found.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDate::parse_from_str(&compact, "%b %d, %Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
