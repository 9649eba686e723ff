use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::ingest::{self, UpsertSummary};
use crate::models::{ChannelId, DeliveryRecord, Item, ItemExtras, PendingTask, RawItem};

use super::schema::SCHEMA;
use super::{parse_datetime, sql_timestamp};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub items: usize,
    pub destinations: usize,
    pub pending_tasks: usize,
    pub delivered: usize,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    /// Open the store in WAL mode. Writers wait at most `busy_timeout` for
    /// the lock before the call fails with a lock timeout.
    pub async fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref().to_path_buf()).await?;

        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Item operations

    pub async fn upsert_items(&self, items: Vec<RawItem>) -> Result<UpsertSummary> {
        let summary = self
            .conn
            .call(move |conn| Ok(ingest::apply_items(conn, items)?))
            .await?;
        Ok(summary)
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let id = id.to_string();
        let item = self
            .conn
            .call(move |conn| {
                let item = conn
                    .query_row(
                        "SELECT id, title, url, content, content_hash, timestamp FROM items WHERE id = ?1",
                        params![id],
                        item_from_row,
                    )
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    /// Tags and media for a batch of items, one query per association table.
    pub async fn load_extras(&self, item_ids: Vec<String>) -> Result<HashMap<String, ItemExtras>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let extras = self
            .conn
            .call(move |conn| {
                let placeholders = vec!["?"; item_ids.len()].join(", ");
                let mut extras: HashMap<String, ItemExtras> = HashMap::new();

                let mut stmt = conn.prepare(&format!(
                    r#"SELECT it.item_id, t.name
                       FROM item_tags it
                       JOIN tags t ON t.tag_id = it.tag_id
                       WHERE it.item_id IN ({placeholders})
                       ORDER BY it.item_id, it.position"#
                ))?;
                let tags = stmt
                    .query_map(params_from_iter(item_ids.iter()), |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                for (item_id, name) in tags {
                    extras.entry(item_id).or_default().tags.push(name);
                }

                let mut stmt = conn.prepare(&format!(
                    r#"SELECT item_id, url, kind FROM media
                       WHERE item_id IN ({placeholders})
                       ORDER BY id"#
                ))?;
                let media = stmt
                    .query_map(params_from_iter(item_ids.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                for (item_id, url, kind) in media {
                    let entry = extras.entry(item_id).or_default();
                    if kind == "image" {
                        entry.images.push(url);
                    } else {
                        entry.files.push(url);
                    }
                }

                Ok(extras)
            })
            .await?;
        Ok(extras)
    }

    // Destination operations

    /// Register a channel and queue every known item for it.
    /// Returns `None` when the channel was already registered.
    pub async fn register_destination(&self, channel_id: ChannelId) -> Result<Option<usize>> {
        let backfilled = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO destinations (channel_id) VALUES (?1)",
                    params![channel_id],
                )?;
                if inserted == 0 {
                    return Ok(None);
                }
                let queued = tx.execute(
                    r#"INSERT OR IGNORE INTO delivery_tasks (destination_id, item_id)
                       SELECT ?1, id FROM items ORDER BY timestamp"#,
                    params![channel_id],
                )?;
                tx.commit()?;
                Ok(Some(queued))
            })
            .await?;
        Ok(backfilled)
    }

    /// Delete a channel together with its tasks and delivery records.
    pub async fn remove_destination(&self, channel_id: ChannelId) -> Result<bool> {
        let removed = self
            .conn
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM destinations WHERE channel_id = ?1",
                    params![channel_id],
                )?;
                Ok(removed > 0)
            })
            .await?;
        Ok(removed)
    }

    pub async fn list_destinations(&self) -> Result<Vec<ChannelId>> {
        let ids = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT channel_id FROM destinations ORDER BY registered_at, channel_id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    // Delivery operations

    /// Tasks whose item is published at or before `now`, in insertion order.
    pub async fn pending_tasks(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<PendingTask>> {
        let now = sql_timestamp(&now);
        let tasks = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT t.destination_id, i.id, i.title, i.url, i.content,
                              i.content_hash, i.timestamp, r.thread_id
                       FROM delivery_tasks t
                       JOIN items i ON i.id = t.item_id
                       LEFT JOIN delivery_records r
                              ON r.destination_id = t.destination_id AND r.item_id = t.item_id
                       WHERE i.timestamp <= ?1
                       ORDER BY t.rowid
                       LIMIT ?2"#,
                )?;
                let tasks = stmt
                    .query_map(params![now, limit], task_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(tasks)
            })
            .await?;
        Ok(tasks)
    }

    /// Store the thread id and consume the task in one transaction.
    pub async fn record_delivery(
        &self,
        channel_id: ChannelId,
        item_id: &str,
        thread_id: &str,
    ) -> Result<()> {
        let item_id = item_id.to_string();
        let thread_id = thread_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    r#"INSERT OR REPLACE INTO delivery_records (destination_id, item_id, thread_id)
                       VALUES (?1, ?2, ?3)"#,
                    params![channel_id, item_id, thread_id],
                )?;
                tx.execute(
                    "DELETE FROM delivery_tasks WHERE destination_id = ?1 AND item_id = ?2",
                    params![channel_id, item_id],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn consume_task(&self, channel_id: ChannelId, item_id: &str) -> Result<()> {
        let item_id = item_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM delivery_tasks WHERE destination_id = ?1 AND item_id = ?2",
                    params![channel_id, item_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delivery_record(
        &self,
        channel_id: ChannelId,
        item_id: &str,
    ) -> Result<Option<DeliveryRecord>> {
        let item_id = item_id.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        r#"SELECT destination_id, item_id, thread_id, posted_at
                           FROM delivery_records
                           WHERE destination_id = ?1 AND item_id = ?2"#,
                        params![channel_id, item_id],
                        record_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    pub async fn has_task(&self, channel_id: ChannelId, item_id: &str) -> Result<bool> {
        let item_id = item_id.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM delivery_tasks WHERE destination_id = ?1 AND item_id = ?2",
                    params![channel_id, item_id],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let stats = self
            .conn
            .call(|conn| {
                let count = |table: &str| -> rusqlite::Result<usize> {
                    let n: i64 =
                        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
                    Ok(n as usize)
                };
                Ok(StoreStats {
                    items: count("items")?,
                    destinations: count("destinations")?,
                    pending_tasks: count("delivery_tasks")?,
                    delivered: count("delivery_records")?,
                })
            })
            .await?;
        Ok(stats)
    }
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, String>(idx)
        .ok()
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        content: row.get(3)?,
        content_hash: row.get(4)?,
        timestamp: timestamp_column(row, 5)?,
    })
}

fn task_from_row(row: &Row) -> rusqlite::Result<PendingTask> {
    Ok(PendingTask {
        channel_id: row.get(0)?,
        item: Item {
            id: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            content: row.get(4)?,
            content_hash: row.get(5)?,
            timestamp: timestamp_column(row, 6)?,
        },
        thread_id: row.get(7)?,
    })
}

fn record_from_row(row: &Row) -> rusqlite::Result<DeliveryRecord> {
    Ok(DeliveryRecord {
        channel_id: row.get(0)?,
        item_id: row.get(1)?,
        thread_id: row.get(2)?,
        posted_at: timestamp_column(row, 3)?,
    })
}
