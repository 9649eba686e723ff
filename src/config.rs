use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Hard per-post attachment ceiling imposed by the forum platform.
pub const ATTACHMENT_HARD_CAP: usize = 10;

const APP_DIR: &str = "announce-relay";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub discord_token: Option<String>,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    /// Maximum number of delivery tasks drained per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_max_attachments")]
    pub max_attachments: usize,

    /// Character limit of a post's first message.
    #[serde(default = "default_content_limit")]
    pub content_limit: usize,

    /// Media larger than this is linked instead of attached.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,

    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,

    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Offset used when rendering the publication time in post footers.
    #[serde(default = "default_display_utc_offset_hours")]
    pub display_utc_offset_hours: i32,

    #[serde(default = "default_tag_stoplist")]
    pub tag_stoplist: Vec<String>,

    #[serde(default)]
    pub wordpress: WordPressConfig,

    #[serde(default)]
    pub static_site: Option<StaticSiteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordPressConfig {
    pub base_url: String,
    pub api_base: String,
    #[serde(default)]
    pub category_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticSiteConfig {
    pub base_url: String,
    pub announcement_url: String,
    #[serde(default)]
    pub allowed_tags: Vec<String>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("relay.db").to_string_lossy().to_string()
}

fn default_refresh_interval() -> u32 {
    30
}

fn default_batch_size() -> u32 {
    50
}

fn default_max_attachments() -> usize {
    ATTACHMENT_HARD_CAP
}

fn default_content_limit() -> usize {
    2000
}

fn default_max_attachment_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_dispatch_delay_ms() -> u64 {
    1500
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_display_utc_offset_hours() -> i32 {
    8
}

fn default_tag_stoplist() -> Vec<String> {
    vec![
        "Uncategorized".to_string(),
        "未分類".to_string(),
        "最新消息".to_string(),
    ]
}

impl Default for WordPressConfig {
    fn default() -> Self {
        let category = |slug: &str| {
            format!("https://www.csie.ntnu.edu.tw/index.php/category/news/{slug}/")
        };
        Self {
            base_url: "https://www.csie.ntnu.edu.tw".to_string(),
            api_base: "https://www.csie.ntnu.edu.tw/index.php/wp-json/wp/v2".to_string(),
            category_urls: [
                "competition",
                "announcement",
                "seminar",
                "enrollment",
                "honor-roll",
                "scholarship",
                "intern",
                "recruitment",
                "1",
            ]
            .iter()
            .map(|slug| category(slug))
            .collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            discord_token: None,
            refresh_interval_minutes: default_refresh_interval(),
            batch_size: default_batch_size(),
            max_attachments: default_max_attachments(),
            content_limit: default_content_limit(),
            max_attachment_bytes: default_max_attachment_bytes(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
            busy_timeout_secs: default_busy_timeout_secs(),
            display_utc_offset_hours: default_display_utc_offset_hours(),
            tag_stoplist: default_tag_stoplist(),
            wordpress: WordPressConfig::default(),
            static_site: None,
        }
    }
}

impl Config {
    /// Load the config at `path`, or at the default location when `None`.
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };

        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            if !token.trim().is_empty() {
                config.discord_token = Some(token);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.refresh_interval_minutes == 0 {
            return Err(AppError::Config(
                "refresh_interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AppError::Config("batch_size must be at least 1".to_string()));
        }
        if self.content_limit < 200 {
            return Err(AppError::Config(
                "content_limit is too small to hold a post footer".to_string(),
            ));
        }
        if !(-12..=14).contains(&self.display_utc_offset_hours) {
            return Err(AppError::Config(format!(
                "display_utc_offset_hours out of range: {}",
                self.display_utc_offset_hours
            )));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.refresh_interval_minutes) * 60)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    /// Configured attachment cap, never above the platform ceiling.
    pub fn attachment_cap(&self) -> usize {
        self.max_attachments.min(ATTACHMENT_HARD_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "db_path = \"/tmp/relay.db\"\nbatch_size = 5\nmax_attachments = 40\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.db_path, "/tmp/relay.db");
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.refresh_interval_minutes, 30);
        assert_eq!(config.attachment_cap(), ATTACHMENT_HARD_CAP);
        assert!(config.wordpress.category_urls.len() > 1);
        assert!(config.static_site.is_none());
    }

    #[test]
    fn missing_file_is_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.content_limit, 2000);

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.db_path, config.db_path);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "refresh_interval_minutes = 0\n").unwrap();

        assert!(matches!(Config::load(Some(&path)), Err(AppError::Config(_))));
    }
}
