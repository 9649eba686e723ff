use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::db::Repository;
use crate::dispatch::{refresh_store, DispatchSettings, Dispatcher};
use crate::error::{AppError, Result};
use crate::ingest::UpsertSummary;
use crate::models::ChannelId;
use crate::services::{DiscordClient, HttpMediaProbe};
use crate::source::{scraper_client, Source, SourceSet, StaticSiteSource, WordPressSource};

/// Owns the configuration and the long-lived HTTP session and builds the
/// pieces each command needs.
pub struct App {
    config: Config,
    client: Client,
    source: Arc<dyn Source>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let client = scraper_client()?;

        let mut sources: Vec<Box<dyn Source>> = vec![Box::new(WordPressSource::new(
            client.clone(),
            config.wordpress.clone(),
            config.tag_stoplist.clone(),
        ))];
        if let Some(site) = &config.static_site {
            sources.push(Box::new(StaticSiteSource::new(client.clone(), site.clone())));
        }
        tracing::debug!(count = sources.len(), "configured sources");

        Ok(Self {
            config,
            client,
            source: Arc::new(SourceSet::new(sources)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn open_store(&self) -> Result<Repository> {
        Repository::open(&self.config.db_path, self.config.busy_timeout()).await
    }

    /// Scrape and upsert without delivering anything.
    pub async fn refresh(&self) -> Result<UpsertSummary> {
        refresh_store(
            Arc::clone(&self.source),
            PathBuf::from(&self.config.db_path),
            self.config.busy_timeout(),
        )
        .await
    }

    fn token(&self) -> Option<String> {
        self.config
            .discord_token
            .clone()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn dispatcher(&self) -> Result<Dispatcher> {
        let token = self.token().ok_or_else(|| {
            AppError::Config("discord_token is not set (config file or DISCORD_TOKEN)".to_string())
        })?;

        Ok(Dispatcher::new(
            Arc::clone(&self.source),
            Arc::new(DiscordClient::new(token)?),
            Arc::new(HttpMediaProbe::new(self.client.clone())),
            DispatchSettings::from_config(&self.config),
        ))
    }

    /// Remove a destination through the dispatcher, or straight from the
    /// store when no token is configured.
    pub async fn unregister(&self, channel_id: ChannelId) -> Result<bool> {
        if self.token().is_some() {
            return self.dispatcher()?.unregister_destination(channel_id).await;
        }

        let removed = self.open_store().await?.remove_destination(channel_id).await?;
        if removed {
            tracing::info!(channel_id, "unregistered destination");
        }
        Ok(removed)
    }
}
