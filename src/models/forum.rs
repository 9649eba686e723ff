use serde::{Deserialize, Serialize};

/// Platform channel identifier (a snowflake, stored as SQLite INTEGER).
pub type ChannelId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumTag {
    pub id: String,
    pub name: String,
}

/// A resolved forum channel.
#[derive(Debug, Clone)]
pub struct ForumHandle {
    pub channel_id: ChannelId,
    pub name: String,
    pub available_tags: Vec<ForumTag>,
}

impl ForumHandle {
    pub fn tag_named(&self, name: &str) -> Option<&ForumTag> {
        self.available_tags.iter().find(|t| t.name == name)
    }
}

/// A thread ready to be created: first message plus metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingPost {
    pub title: String,
    pub content: String,
    pub tag_ids: Vec<String>,
    /// Media URLs to upload as binary attachments.
    pub attachments: Vec<String>,
}
