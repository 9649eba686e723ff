mod delivery;
mod forum;
mod item;

pub use delivery::{DeliveryRecord, ItemExtras, PendingTask};
pub use forum::{ChannelId, ForumHandle, ForumTag, OutgoingPost};
pub use item::{Item, RawItem};
