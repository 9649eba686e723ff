use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html};

use crate::config::StaticSiteConfig;
use crate::error::{AppError, Result};
use crate::models::RawItem;

use super::normalize::{find_english_date, image_urls, normalize_text, partition_media, resolve_url, selector};
use super::Source;

const DETAIL_CONCURRENCY: usize = 4;

static BACK_TO_TOP: OnceLock<Regex> = OnceLock::new();
static CJK_DATE: OnceLock<Regex> = OnceLock::new();

/// An announcement card from the listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub url: String,
    pub title_hint: String,
    pub tags: Vec<String>,
    pub timestamp_hint: Option<DateTime<Utc>>,
}

/// Server-rendered announcement board: a listing page of cards linking to
/// detail pages. The detail page URL is the item id.
pub struct StaticSiteSource {
    client: Client,
    config: StaticSiteConfig,
}

impl StaticSiteSource {
    pub fn new(client: Client, config: StaticSiteConfig) -> Self {
        Self { client, config }
    }

    async fn get_html(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::source_fetch(url, format!("HTTP {status}")));
        }
        Ok(response.text().await?)
    }

    async fn fetch_item(&self, card: Card) -> Result<RawItem> {
        let html = self.get_html(&card.url).await?;
        parse_detail(&html, card, &self.config.base_url)
    }
}

#[async_trait]
impl Source for StaticSiteSource {
    fn name(&self) -> &str {
        "static site"
    }

    async fn fetch_all(&self) -> Vec<RawItem> {
        let listing = match self.get_html(&self.config.announcement_url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(url = %self.config.announcement_url, error = %e, "failed to fetch listing");
                return Vec::new();
            }
        };

        let cards = match parse_listing(&listing, &self.config.base_url, &self.config.allowed_tags) {
            Ok(cards) => cards,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse listing");
                return Vec::new();
            }
        };
        if cards.is_empty() {
            tracing::warn!(url = %self.config.announcement_url, "listing has no announcement cards");
            return Vec::new();
        }

        stream::iter(cards)
            .map(|card| async move {
                let url = card.url.clone();
                (url, self.fetch_item(card).await)
            })
            .buffered(DETAIL_CONCURRENCY)
            .filter_map(|(url, result)| async move {
                match result {
                    Ok(item) => Some(item),
                    Err(e) => {
                        tracing::warn!(item_id = %url, error = %e, "skipping announcement");
                        None
                    }
                }
            })
            .collect()
            .await
    }
}

fn back_to_top() -> &'static Regex {
    BACK_TO_TOP.get_or_init(|| Regex::new(r"(?is)\bBack to top\b.*").expect("static regex"))
}

fn cjk_date() -> &'static Regex {
    CJK_DATE.get_or_init(|| {
        Regex::new(r"公告日期[:：]\s*(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日")
            .expect("static regex")
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text nodes of an element, trimmed and one per line.
fn block_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Nearest enclosing `div`, which holds the rest of the card.
fn card_container(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "div")
}

fn find_cjk_date(text: &str) -> Option<DateTime<Utc>> {
    let caps = cjk_date().captures(text)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let year = i32::try_from(part(1)?).ok()?;
    NaiveDate::from_ymd_opt(year, part(2)?, part(3)?)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Cards linking to announcement detail pages, deduplicated by URL.
pub fn parse_listing(html: &str, base_url: &str, allowed_tags: &[String]) -> Result<Vec<Card>> {
    let links = selector("a[href^='/announcement/']")?;
    let chips = selector("button, span, div")?;
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut cards = Vec::new();

    for anchor in document.select(&links) {
        let Some(url) = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_url(href, base_url))
        else {
            continue;
        };
        if url.trim_end_matches('/').ends_with("/announcement") || !seen.insert(url.clone()) {
            continue;
        }

        let title_hint = collapse_whitespace(&anchor.text().collect::<String>());
        let container = card_container(anchor);

        let mut tags: Vec<String> = Vec::new();
        if let Some(root) = container {
            for chip in root.select(&chips) {
                let label = collapse_whitespace(&chip.text().collect::<String>());
                if allowed_tags.iter().any(|t| *t == label) && !tags.contains(&label) {
                    tags.push(label);
                }
            }
        }

        let card_text = container.map(block_text).unwrap_or_default();
        let timestamp_hint = find_english_date(&collapse_whitespace(&card_text));

        cards.push(Card {
            url,
            title_hint,
            tags,
            timestamp_hint,
        });
    }

    Ok(cards)
}

/// Build a record from a detail page and the card that linked to it.
pub fn parse_detail(html: &str, card: Card, base_url: &str) -> Result<RawItem> {
    let main = selector("main")?;
    let article = selector("article")?;
    let body = selector("body")?;
    let h1 = selector("h1")?;
    let document = Html::parse_document(html);

    let container = document
        .select(&main)
        .next()
        .or_else(|| document.select(&article).next())
        .or_else(|| document.select(&body).next())
        .unwrap_or_else(|| document.root_element());

    let title = container
        .select(&h1)
        .next()
        .or_else(|| document.select(&h1).next())
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| card.title_hint.clone());

    let page_text = collapse_whitespace(&block_text(document.root_element()));
    let timestamp = find_english_date(&page_text)
        .or_else(|| find_cjk_date(&page_text))
        .or(card.timestamp_hint)
        .unwrap_or_else(|| {
            tracing::debug!(item_id = %card.url, "announcement has no date, using fetch time");
            Utc::now()
        });

    let text = block_text(container);
    let content = normalize_text(&back_to_top().replace(&text, ""));

    let (images, files) = partition_media(image_urls(&container.html(), base_url)?);

    RawItem {
        id: card.url.clone(),
        url: card.url,
        title,
        tags: card.tags,
        content,
        images,
        files,
        timestamp,
    }
    .validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://club.example.org";

    const LISTING: &str = r#"<html><body>
        <nav><a href="/announcement/">All announcements</a></nav>
        <div class="card">
            <span>系學會</span><span>資訊股</span><span>SEP</span>
            <p>SEP 20, 2025</p>
            <a href="/announcement/welcome-party">Welcome   Party</a>
        </div>
        <div class="card">
            <span>總務股</span>
            <a href="/announcement/fee">Membership fee</a>
            <a href="/announcement/fee">Read more</a>
        </div>
    </body></html>"#;

    const DETAIL: &str = r#"<html><body>
        <header><h1>Site name</h1></header>
        <main>
            <h1>Welcome Party 2025</h1>
            <p>公告日期：2025年9月22日</p>
            <p>Join us   </p>



            <p><img src="/img/poster.png"></p>
            <p>Back to top</p>
            <footer>links</footer>
        </main>
    </body></html>"#;

    fn allowed() -> Vec<String> {
        ["會長股", "系學會", "總務股", "資訊股"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn listing_yields_one_card_per_announcement() {
        let cards = parse_listing(LISTING, BASE, &allowed()).unwrap();

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].url, "https://club.example.org/announcement/welcome-party");
        assert_eq!(cards[0].title_hint, "Welcome Party");
        assert_eq!(cards[0].tags, vec!["系學會".to_string(), "資訊股".to_string()]);
        assert_eq!(
            cards[0].timestamp_hint.map(|t| t.to_rfc3339()),
            Some("2025-09-20T00:00:00+00:00".to_string())
        );
        assert_eq!(cards[1].tags, vec!["總務股".to_string()]);
        assert!(cards[1].timestamp_hint.is_none());
    }

    #[test]
    fn detail_page_fills_in_the_record() {
        let card = Card {
            url: format!("{BASE}/announcement/welcome-party"),
            title_hint: "Welcome Party".to_string(),
            tags: vec!["系學會".to_string()],
            timestamp_hint: None,
        };

        let item = parse_detail(DETAIL, card, BASE).unwrap();

        assert_eq!(item.id, item.url);
        assert_eq!(item.title, "Welcome Party 2025");
        assert_eq!(item.timestamp.to_rfc3339(), "2025-09-22T00:00:00+00:00");
        assert_eq!(item.images, vec![format!("{BASE}/img/poster.png")]);
        assert!(item.content.contains("Join us"));
        assert!(!item.content.contains("Back to top"));
        assert!(!item.content.contains("links"));
    }

    #[test]
    fn detail_without_date_keeps_card_date() {
        let hint = find_english_date("Oct 1, 2025");
        let card = Card {
            url: format!("{BASE}/announcement/x"),
            title_hint: "Fallback title".to_string(),
            tags: vec![],
            timestamp_hint: hint,
        };

        let item = parse_detail("<html><body><p>Body only</p></body></html>", card, BASE).unwrap();
        assert_eq!(item.title, "Fallback title");
        assert_eq!(Some(item.timestamp), hint);
    }
}
