use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::forum::ChannelId;
use super::item::Item;

/// A delivery task joined with its item and any existing thread.
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub channel_id: ChannelId,
    pub item: Item,
    /// Set when the item already has a thread in this channel.
    pub thread_id: Option<String>,
}

/// Tag and media associations of one item, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemExtras {
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub channel_id: ChannelId,
    pub item_id: String,
    pub thread_id: String,
    pub posted_at: DateTime<Utc>,
}
