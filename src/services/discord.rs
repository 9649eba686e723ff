use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{ChannelId, ForumHandle, ForumTag, OutgoingPost};

use super::ForumPlatform;

const DISCORD_API_URL: &str = "https://discord.com/api/v10";
const GUILD_FORUM: u8 = 15;

pub const MAX_FORUM_TAGS: usize = 20;
pub const MAX_APPLIED_TAGS: usize = 5;

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    available_tags: Vec<ForumTag>,
}

#[derive(Debug, Deserialize)]
struct Thread {
    id: String,
}

#[derive(Debug, Serialize)]
struct AttachmentRef {
    id: usize,
    filename: String,
}

#[derive(Debug, Serialize)]
struct StarterMessage {
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Serialize)]
struct CreateThreadRequest {
    name: String,
    applied_tags: Vec<String>,
    message: StarterMessage,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    retry_after: Option<f64>,
}

struct Download {
    filename: String,
    bytes: Vec<u8>,
}

/// Bot-token client for the Discord REST API.
pub struct DiscordClient {
    client: Client,
    token: String,
}

impl DiscordClient {
    pub fn new(token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, token })
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn get_channel_json(&self, channel_id: ChannelId) -> Result<Option<Value>> {
        let response = self
            .client
            .get(format!("{}/channels/{}", DISCORD_API_URL, channel_id))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        Ok(Some(response.json().await?))
    }

    async fn download(&self, url: &str) -> Result<Download> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to download attachment: HTTP {}", response.status()).into());
        }
        let bytes = response.bytes().await?.to_vec();
        Ok(Download {
            filename: filename_from_url(url),
            bytes,
        })
    }
}

/// Map a non-success response to a platform error.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiError>(&body).ok();
    let message = match (status, detail) {
        (StatusCode::TOO_MANY_REQUESTS, Some(e)) => format!(
            "rate limited, retry after {:.1}s",
            e.retry_after.unwrap_or_default()
        ),
        (_, Some(e)) if !e.message.is_empty() => format!("{}: {}", status, e.message),
        _ => format!("{}: {}", status, body),
    };
    Err(AppError::Platform(message))
}

/// Last path segment of a URL, percent-decoded, without the query string.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    if decoded.is_empty() {
        "attachment".to_string()
    } else {
        decoded
    }
}

#[async_trait]
impl ForumPlatform for DiscordClient {
    async fn resolve(&self, channel_id: ChannelId) -> Result<Option<ForumHandle>> {
        let Some(raw) = self.get_channel_json(channel_id).await? else {
            return Ok(None);
        };
        let channel: Channel = serde_json::from_value(raw)?;
        if channel.kind != GUILD_FORUM {
            tracing::warn!(channel_id, kind = channel.kind, "channel is not a forum");
            return Ok(None);
        }

        Ok(Some(ForumHandle {
            channel_id,
            name: channel.name.unwrap_or_else(|| channel_id.to_string()),
            available_tags: channel.available_tags,
        }))
    }

    async fn create_tag(&self, forum: &ForumHandle, name: &str) -> Result<ForumTag> {
        // PATCH replaces the whole list, so start from the current raw tags.
        let raw = self
            .get_channel_json(forum.channel_id)
            .await?
            .ok_or(AppError::DestinationGone(forum.channel_id))?;
        let mut tags: Vec<Value> = raw
            .get("available_tags")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if tags.len() >= MAX_FORUM_TAGS {
            return Err(AppError::Platform(format!(
                "forum {} already has {} tags",
                forum.channel_id, MAX_FORUM_TAGS
            )));
        }
        tags.push(serde_json::json!({ "name": name }));

        let response = self
            .client
            .patch(format!("{}/channels/{}", DISCORD_API_URL, forum.channel_id))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(&serde_json::json!({ "available_tags": tags }))
            .send()
            .await?;
        let channel: Channel = check(response).await?.json().await?;

        channel
            .available_tags
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| AppError::Platform(format!("tag '{}' missing after update", name)))
    }

    async fn create_thread(&self, forum: &ForumHandle, post: &OutgoingPost) -> Result<String> {
        let mut downloads = Vec::new();
        for url in &post.attachments {
            match self.download(url).await {
                Ok(d) => downloads.push(d),
                Err(e) => tracing::warn!(channel_id = forum.channel_id, url = %url, error = %e, "attachment download failed, skipping"),
            }
        }

        let request = CreateThreadRequest {
            name: post.title.clone(),
            applied_tags: post.tag_ids.clone(),
            message: StarterMessage {
                content: post.content.clone(),
                attachments: downloads
                    .iter()
                    .enumerate()
                    .map(|(id, d)| AttachmentRef {
                        id,
                        filename: d.filename.clone(),
                    })
                    .collect(),
            },
        };

        let builder = self
            .client
            .post(format!("{}/channels/{}/threads", DISCORD_API_URL, forum.channel_id))
            .header(reqwest::header::AUTHORIZATION, self.auth());

        let builder = if downloads.is_empty() {
            builder.json(&request)
        } else {
            let mut form = Form::new().text("payload_json", serde_json::to_string(&request)?);
            for (i, d) in downloads.into_iter().enumerate() {
                let part = Part::bytes(d.bytes).file_name(d.filename);
                form = form.part(format!("files[{}]", i), part);
            }
            builder.multipart(form)
        };

        let response = builder.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::DestinationGone(forum.channel_id));
        }
        let thread: Thread = check(response).await?.json().await?;
        Ok(thread.id)
    }

    fn max_forum_tags(&self) -> usize {
        MAX_FORUM_TAGS
    }

    fn max_applied_tags(&self) -> usize {
        MAX_APPLIED_TAGS
    }
}
