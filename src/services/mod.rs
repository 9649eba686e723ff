mod discord;
mod media_probe;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChannelId, ForumHandle, ForumTag, OutgoingPost};

pub use discord::DiscordClient;
pub use media_probe::HttpMediaProbe;

/// The chat platform's forum API as used by the dispatcher.
#[async_trait]
pub trait ForumPlatform: Send + Sync {
    /// `None` when the channel does not exist or is not a forum.
    async fn resolve(&self, channel_id: ChannelId) -> Result<Option<ForumHandle>>;

    async fn create_tag(&self, forum: &ForumHandle, name: &str) -> Result<ForumTag>;

    /// Create a thread and return its id.
    async fn create_thread(&self, forum: &ForumHandle, post: &OutgoingPost) -> Result<String>;

    fn max_forum_tags(&self) -> usize;

    fn max_applied_tags(&self) -> usize;
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Size reported by the host, or `None` if it could not be determined.
    async fn content_length(&self, url: &str) -> Option<u64>;
}
