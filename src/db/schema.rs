pub const SCHEMA: &str = r#"
-- registered forum channels
CREATE TABLE IF NOT EXISTS destinations (
    channel_id INTEGER PRIMARY KEY,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- normalized announcements
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_items_timestamp ON items(timestamp);

-- tags table
CREATE TABLE IF NOT EXISTS tags (
    tag_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS item_tags (
    item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(tag_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (item_id, tag_id)
);

-- images and files attached to an item
CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('file', 'image')),
    UNIQUE(item_id, url, kind)
);

CREATE INDEX IF NOT EXISTS idx_media_item_id ON media(item_id);

-- pending deliveries (repost ledger)
CREATE TABLE IF NOT EXISTS delivery_tasks (
    destination_id INTEGER NOT NULL REFERENCES destinations(channel_id) ON DELETE CASCADE,
    item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (destination_id, item_id)
);

-- completed deliveries
CREATE TABLE IF NOT EXISTS delivery_records (
    destination_id INTEGER NOT NULL REFERENCES destinations(channel_id) ON DELETE CASCADE,
    item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    thread_id TEXT NOT NULL,
    posted_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (destination_id, item_id)
);
"#;
