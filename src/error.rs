use rusqlite::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Database connection error: {0}")]
    Connection(tokio_rusqlite::Error),

    /// The store stayed locked past the configured busy timeout.
    #[error("Store is locked: {0}")]
    LockTimeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Failed to fetch {context}: {message}")]
    SourceFetch { context: String, message: String },

    #[error("Failed to upsert item {item_id}: {message}")]
    Upsert { item_id: String, message: String },

    #[error("Channel {0} no longer resolves")]
    DestinationGone(i64),

    #[error("Platform API error: {0}")]
    Platform(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn source_fetch(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::SourceFetch {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, AppError::LockTimeout(_))
    }
}

pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            AppError::LockTimeout(err.to_string())
        } else {
            AppError::Database(err)
        }
    }
}

impl From<tokio_rusqlite::Error> for AppError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(inner) => inner.into(),
            other => AppError::Connection(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_sqlite_errors_become_lock_timeouts() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(AppError::from(busy).is_lock_timeout());

        let wrapped = tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        ));
        assert!(AppError::from(wrapped).is_lock_timeout());
    }

    #[test]
    fn other_sqlite_errors_stay_database_errors() {
        let err = AppError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, AppError::Database(_)));
    }
}
