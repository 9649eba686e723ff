use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A scraped announcement as handed from a source adapter to the upsert engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    pub url: String,
    pub title: String,
    pub tags: Vec<String>,
    pub content: String,
    pub images: Vec<String>,
    pub files: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RawItem {
    /// Reject records the store cannot key or link to.
    pub fn validate(self) -> Result<Self> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "record from {} has no id",
                self.url
            )));
        }
        if self.url.trim().is_empty() {
            return Err(AppError::Validation(format!("item {} has no url", self.id)));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::Validation(format!("item {} has no title", self.id)));
        }
        Ok(self)
    }
}

/// An item row as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub url: String,
    pub content: String,
    pub content_hash: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, title: &str) -> RawItem {
        RawItem {
            id: id.to_string(),
            url: "https://example.edu/post/1".to_string(),
            title: title.to_string(),
            tags: vec![],
            content: "body".to_string(),
            images: vec![],
            files: vec![],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn blank_id_or_title_is_rejected() {
        assert!(raw(" ", "Title").validate().is_err());
        assert!(raw("7", "").validate().is_err());
        assert_eq!(raw("7", "Title").validate().unwrap().id, "7");
    }
}
