mod normalize;
mod static_site;
mod wordpress;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;

use crate::error::Result;
use crate::models::RawItem;

pub use static_site::StaticSiteSource;
pub use wordpress::WordPressSource;

const USER_AGENT_STRING: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A remote origin of announcements.
///
/// `fetch_all` starts from scratch on every call. Pages that fail are logged
/// and skipped, so the result holds whatever could be fetched.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_all(&self) -> Vec<RawItem>;
}

/// HTTP client shared by the scraping adapters.
pub fn scraper_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json,text/html;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-TW,zh;q=0.9,en;q=0.6"),
    );

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT_STRING)
        .default_headers(headers)
        .build()?;
    Ok(client)
}

/// Several sources fetched in order; the first record seen for an id wins.
pub struct SourceSet {
    sources: Vec<Box<dyn Source>>,
}

impl SourceSet {
    pub fn new(sources: Vec<Box<dyn Source>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Source for SourceSet {
    fn name(&self) -> &str {
        "all sources"
    }

    async fn fetch_all(&self) -> Vec<RawItem> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for source in &self.sources {
            let fetched = source.fetch_all().await;
            tracing::info!(source = source.name(), count = fetched.len(), "fetched source");
            for item in fetched {
                if seen.insert(item.id.clone()) {
                    items.push(item);
                } else {
                    tracing::debug!(item_id = %item.id, source = source.name(), "duplicate id dropped");
                }
            }
        }

        items
    }
}
