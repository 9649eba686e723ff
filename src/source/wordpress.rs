use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::WordPressConfig;
use crate::error::{AppError, Result};
use crate::models::RawItem;

use super::normalize::{filter_tags, html_to_text, image_urls, inline_text, partition_media, resolve_url};
use super::Source;

const PER_PAGE: u32 = 100;
const CATEGORY_CONCURRENCY: usize = 3;

static CATEGORY_LINK: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Default, Deserialize)]
pub struct Rendered {
    #[serde(default)]
    pub rendered: String,
}

#[derive(Debug, Deserialize)]
pub struct FeaturedMedia {
    pub source_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Embedded {
    #[serde(default, rename = "wp:featuredmedia")]
    pub featured_media: Vec<FeaturedMedia>,
}

/// The subset of a `/wp/v2/posts` entry we use.
#[derive(Debug, Deserialize)]
pub struct WpPost {
    pub id: u64,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub title: Rendered,
    #[serde(default)]
    pub content: Rendered,
    pub date_gmt: Option<String>,
    #[serde(default)]
    pub categories: Vec<u64>,
    #[serde(default, rename = "_embedded")]
    pub embedded: Option<Embedded>,
}

#[derive(Debug, Deserialize)]
struct WpCategory {
    name: Option<String>,
}

/// WordPress REST adapter. Posts are fetched per configured category page.
pub struct WordPressSource {
    client: Client,
    config: WordPressConfig,
    stoplist: Vec<String>,
}

impl WordPressSource {
    pub fn new(client: Client, config: WordPressConfig, stoplist: Vec<String>) -> Self {
        Self {
            client,
            config,
            stoplist,
        }
    }

    /// Category id advertised in the `Link` header of a category page.
    async fn category_id(&self, page_url: &str) -> Result<Option<u64>> {
        let response = self.client.head(page_url).send().await?;
        let link = response
            .headers()
            .get_all(reqwest::header::LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(category_id_from_link(&link))
    }

    async fn category_name(&self, id: u64) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/categories/{}", self.config.api_base, id))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Category lookup failed: HTTP {}", response.status()).into());
        }
        let category: WpCategory = response.json().await?;
        Ok(category
            .name
            .map(|n| inline_text(&n))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.to_string()))
    }

    async fn cache_category_names(&self, ids: &[u64], cache: &mut HashMap<u64, String>) {
        for &id in ids {
            if cache.contains_key(&id) {
                continue;
            }
            match self.category_name(id).await {
                Ok(name) => {
                    cache.insert(id, name);
                }
                Err(e) => tracing::warn!(category = id, error = %e, "failed to look up category name"),
            }
        }
    }

    async fn posts_in_category(&self, category: u64) -> Result<Vec<WpPost>> {
        let mut posts = Vec::new();
        let mut page = 1u32;

        loop {
            let response = self
                .client
                .get(format!("{}/posts", self.config.api_base))
                .query(&[
                    ("categories", category.to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                    ("_embed", "1".to_string()),
                ])
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::BAD_REQUEST {
                let body = response.text().await?;
                if body.contains("rest_post_invalid_page_number") {
                    break;
                }
                return Err(AppError::source_fetch(
                    format!("category {category} page {page}"),
                    format!("HTTP {status}"),
                ));
            }
            if !status.is_success() {
                return Err(AppError::source_fetch(
                    format!("category {category} page {page}"),
                    format!("HTTP {status}"),
                ));
            }

            let total_pages: u32 = response
                .headers()
                .get("X-WP-TotalPages")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(1);

            let batch: Vec<WpPost> = response.json().await?;
            if batch.is_empty() {
                break;
            }
            posts.extend(batch);

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        Ok(posts)
    }
}

#[async_trait]
impl Source for WordPressSource {
    fn name(&self) -> &str {
        "wordpress"
    }

    async fn fetch_all(&self) -> Vec<RawItem> {
        let mut category_ids: Vec<u64> = Vec::new();
        for url in &self.config.category_urls {
            match self.category_id(url).await {
                Ok(Some(id)) => {
                    if !category_ids.contains(&id) {
                        category_ids.push(id);
                    }
                }
                Ok(None) => tracing::warn!(url = %url, "not a category page, skipping"),
                Err(e) => tracing::warn!(url = %url, error = %e, "failed to resolve category"),
            }
        }

        if category_ids.is_empty() {
            tracing::warn!("no category could be resolved");
            return Vec::new();
        }

        let fetched: Vec<(u64, Result<Vec<WpPost>>)> = stream::iter(category_ids)
            .map(|id| async move { (id, self.posts_in_category(id).await) })
            .buffered(CATEGORY_CONCURRENCY)
            .collect()
            .await;

        let mut names: HashMap<u64, String> = HashMap::new();
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for (category, result) in fetched {
            let posts = match result {
                Ok(posts) => posts,
                Err(e) => {
                    tracing::warn!(category, error = %e, "failed to fetch category posts");
                    continue;
                }
            };
            tracing::debug!(category, posts = posts.len(), "fetched category");

            for post in posts {
                if seen.contains(&post.id) {
                    continue;
                }
                self.cache_category_names(&post.categories, &mut names).await;
                let post_id = post.id;
                match post_to_raw_item(post, &self.config.base_url, &names, &self.stoplist) {
                    Ok(item) => {
                        seen.insert(post_id);
                        items.push(item);
                    }
                    Err(e) => tracing::warn!(item_id = post_id, error = %e, "skipping post"),
                }
            }
        }

        items
    }
}

pub fn category_id_from_link(link_header: &str) -> Option<u64> {
    let re = CATEGORY_LINK
        .get_or_init(|| Regex::new(r"/wp/v2/categories/(\d+)").expect("static regex"));
    re.captures(link_header)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn parse_date_gmt(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convert a REST post into a validated record.
pub fn post_to_raw_item(
    post: WpPost,
    base_url: &str,
    category_names: &HashMap<u64, String>,
    stoplist: &[String],
) -> Result<RawItem> {
    let content_html = post.content.rendered;

    let featured = post
        .embedded
        .unwrap_or_default()
        .featured_media
        .into_iter()
        .next()
        .and_then(|m| m.source_url)
        .and_then(|src| resolve_url(&src, base_url));
    let mut media: Vec<String> = featured.into_iter().collect();
    media.extend(image_urls(&content_html, base_url)?);
    let (images, files) = partition_media(media);

    let tags = filter_tags(
        post.categories
            .iter()
            .filter_map(|id| category_names.get(id).cloned()),
        stoplist,
    );

    let timestamp = post
        .date_gmt
        .as_deref()
        .and_then(parse_date_gmt)
        .unwrap_or_else(|| {
            tracing::debug!(item_id = post.id, "post has no usable date_gmt, using fetch time");
            Utc::now()
        });

    RawItem {
        id: post.id.to_string(),
        url: post.link,
        title: inline_text(&post.title.rendered),
        tags,
        content: html_to_text(&content_html),
        images,
        files,
        timestamp,
    }
    .validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST_JSON: &str = r#"{
        "id": 9127,
        "link": "https://www.example.edu/index.php/2024/01/01/contest/",
        "date_gmt": "2024-01-01T00:00:00",
        "title": {"rendered": "Programming Contest &#8211; Call for Teams"},
        "content": {"rendered": "<p>Register by Friday.</p>\n<p><img src=\"/wp-content/uploads/poster.png\"></p>\n<p><a href=\"/files/rules.pdf\">rules</a></p>"},
        "categories": [12, 1],
        "_embedded": {
            "wp:featuredmedia": [{"source_url": "/wp-content/uploads/brochure.pdf"}]
        }
    }"#;

    fn names() -> HashMap<u64, String> {
        HashMap::from([
            (12, "Competition".to_string()),
            (1, "Uncategorized".to_string()),
        ])
    }

    #[test]
    fn category_id_is_read_from_link_header() {
        let link = r#"<https://www.example.edu/index.php/wp-json/>; rel="https://api.w.org/", <https://www.example.edu/index.php/wp-json/wp/v2/categories/12>; rel="alternate"; type="application/json""#;
        assert_eq!(category_id_from_link(link), Some(12));
        assert_eq!(category_id_from_link("<https://x/wp-json/>; rel=\"https://api.w.org/\""), None);
    }

    #[test]
    fn post_is_normalized_into_a_raw_item() {
        let post: WpPost = serde_json::from_str(POST_JSON).unwrap();
        let stoplist = vec!["Uncategorized".to_string()];

        let item = post_to_raw_item(post, "https://www.example.edu", &names(), &stoplist).unwrap();

        assert_eq!(item.id, "9127");
        assert_eq!(item.title, "Programming Contest – Call for Teams");
        assert_eq!(item.tags, vec!["Competition".to_string()]);
        assert_eq!(
            item.images,
            vec!["https://www.example.edu/wp-content/uploads/poster.png".to_string()]
        );
        assert_eq!(
            item.files,
            vec!["https://www.example.edu/wp-content/uploads/brochure.pdf".to_string()]
        );
        assert!(item.content.contains("Register by Friday."));
        assert_eq!(item.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn missing_embeds_and_unknown_categories_are_tolerated() {
        let post: WpPost = serde_json::from_str(
            r#"{"id": 5, "link": "https://www.example.edu/?p=5", "title": {"rendered": "Notice"},
                "content": {"rendered": "<p>Hi</p>"}, "date_gmt": null, "categories": [99]}"#,
        )
        .unwrap();

        let item = post_to_raw_item(post, "https://www.example.edu", &names(), &[]).unwrap();
        assert!(item.tags.is_empty());
        assert!(item.images.is_empty() && item.files.is_empty());
    }

    #[test]
    fn post_without_title_is_rejected() {
        let post: WpPost = serde_json::from_str(
            r#"{"id": 6, "link": "https://www.example.edu/?p=6", "title": {"rendered": "  "}}"#,
        )
        .unwrap();

        assert!(post_to_raw_item(post, "https://www.example.edu", &names(), &[]).is_err());
    }
}
