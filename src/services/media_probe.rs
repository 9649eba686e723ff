use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;

use super::MediaProbe;

/// Reads media sizes with a HEAD request.
pub struct HttpMediaProbe {
    client: Client,
}

impl HttpMediaProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaProbe for HttpMediaProbe {
    async fn content_length(&self, url: &str) -> Option<u64> {
        let response = match self.client.head(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!("HEAD {} returned {}", url, r.status());
                return None;
            }
            Err(e) => {
                tracing::debug!("HEAD {} failed: {}", url, e);
                return None;
            }
        };

        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}
