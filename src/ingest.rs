//! Change detection and upsert of scraped items.

use rusqlite::{params, Connection, OptionalExtension, Savepoint, TransactionBehavior};
use sha2::{Digest, Sha256};

use crate::db::sql_timestamp;
use crate::error::{is_busy, AppError};
use crate::models::RawItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    NoChange,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Delivery tasks fanned out for created items.
    pub tasks_queued: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.failed
    }
}

/// SHA-256 of the content bytes, hex encoded.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn classify(existing_hash: Option<&str>, new_content: &str) -> ChangeKind {
    match existing_hash {
        None => ChangeKind::Create,
        Some(hash) if hash != fingerprint(new_content) => ChangeKind::Update,
        Some(_) => ChangeKind::NoChange,
    }
}

/// Apply a scrape pass inside one transaction.
///
/// The write lock is taken up front so the connection's busy timeout applies.
/// Each item gets its own savepoint; a failing item is rolled back, logged and
/// counted while the rest of the pass still commits. A busy store aborts the
/// whole pass and nothing is written.
pub fn apply_items(conn: &mut Connection, items: Vec<RawItem>) -> rusqlite::Result<UpsertSummary> {
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut summary = UpsertSummary::default();

    for item in &items {
        let sp = tx.savepoint()?;
        let outcome = match apply_item(sp, item) {
            Err(e) if is_busy(&e) => return Err(e),
            other => other.map_err(|e| AppError::Upsert {
                item_id: item.id.clone(),
                message: e.to_string(),
            }),
        };
        match outcome {
            Ok((ChangeKind::Create, queued)) => {
                summary.created += 1;
                summary.tasks_queued += queued;
                tracing::debug!(item_id = %item.id, queued, "created item");
            }
            Ok((ChangeKind::Update, _)) => {
                summary.updated += 1;
                tracing::debug!(item_id = %item.id, "updated item");
            }
            Ok((ChangeKind::NoChange, _)) => summary.unchanged += 1,
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(item_id = %item.id, "{}", e);
            }
        }
    }

    tx.commit()?;
    Ok(summary)
}

fn apply_item(sp: Savepoint<'_>, item: &RawItem) -> rusqlite::Result<(ChangeKind, usize)> {
    let existing: Option<String> = sp
        .query_row(
            "SELECT content_hash FROM items WHERE id = ?1",
            params![item.id],
            |row| row.get(0),
        )
        .optional()?;

    let kind = classify(existing.as_deref(), &item.content);
    let hash = fingerprint(&item.content);
    let timestamp = sql_timestamp(&item.timestamp);

    let queued = match kind {
        // Savepoint rolls back on drop; nothing was written.
        ChangeKind::NoChange => return Ok((kind, 0)),
        ChangeKind::Create => {
            sp.execute(
                r#"INSERT INTO items (id, title, url, content, content_hash, timestamp)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                params![item.id, item.title, item.url, item.content, hash, timestamp],
            )?;
            write_associations(&sp, item)?;
            sp.execute(
                r#"INSERT OR IGNORE INTO delivery_tasks (destination_id, item_id)
                   SELECT channel_id, ?1 FROM destinations"#,
                params![item.id],
            )?
        }
        ChangeKind::Update => {
            sp.execute(
                r#"UPDATE items
                   SET title = ?2, url = ?3, content = ?4, content_hash = ?5,
                       timestamp = ?6, updated_at = datetime('now')
                   WHERE id = ?1"#,
                params![item.id, item.title, item.url, item.content, hash, timestamp],
            )?;
            sp.execute("DELETE FROM item_tags WHERE item_id = ?1", params![item.id])?;
            sp.execute("DELETE FROM media WHERE item_id = ?1", params![item.id])?;
            write_associations(&sp, item)?;
            // Pending tasks are left as they are; edits are not re-queued.
            0
        }
    };

    sp.commit()?;
    Ok((kind, queued))
}

fn write_associations(conn: &Connection, item: &RawItem) -> rusqlite::Result<()> {
    for (position, name) in item.tags.iter().enumerate() {
        conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![name])?;
        let tag_id: i64 =
            conn.query_row("SELECT tag_id FROM tags WHERE name = ?1", params![name], |row| {
                row.get(0)
            })?;
        conn.execute(
            "INSERT OR IGNORE INTO item_tags (item_id, tag_id, position) VALUES (?1, ?2, ?3)",
            params![item.id, tag_id, position as i64],
        )?;
    }

    let media = item
        .images
        .iter()
        .map(|url| (url, "image"))
        .chain(item.files.iter().map(|url| (url, "file")));
    for (url, kind) in media {
        conn.execute(
            "INSERT OR IGNORE INTO media (item_id, url, kind) VALUES (?1, ?2, ?3)",
            params![item.id, url, kind],
        )?;
    }
    Ok(())
}
