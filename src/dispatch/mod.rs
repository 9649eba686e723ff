//! Periodic refresh-then-deliver cycle.
//!
//! A cycle scrapes every source into the store, then drains a bounded batch
//! of ready delivery tasks into forum threads. Cycles and destination
//! changes share one async mutex, so at most one of them touches the store
//! at a time.

mod compose;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::db::{Repository, StoreStats};
use crate::error::{AppError, Result};
use crate::ingest::UpsertSummary;
use crate::models::{ChannelId, ForumHandle, Item, ItemExtras, OutgoingPost};
use crate::services::{ForumPlatform, MediaProbe};
use crate::source::Source;

pub use compose::{compose_body, plan_media, thread_title, ComposeOptions, TITLE_LIMIT};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub db_path: PathBuf,
    pub refresh_interval: Duration,
    pub batch_size: u32,
    pub busy_timeout: Duration,
    pub dispatch_delay: Duration,
    pub compose: ComposeOptions,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        let display_offset = FixedOffset::east_opt(config.display_utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());

        Self {
            db_path: PathBuf::from(&config.db_path),
            refresh_interval: config.refresh_interval(),
            batch_size: config.batch_size,
            busy_timeout: config.busy_timeout(),
            dispatch_delay: config.dispatch_delay(),
            compose: ComposeOptions {
                content_limit: config.content_limit,
                attachment_cap: config.attachment_cap(),
                max_attachment_bytes: config.max_attachment_bytes,
                display_offset,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub selected: usize,
    pub attempted: usize,
    pub delivered: usize,
    /// Tasks whose item already had a thread in the channel.
    pub skipped_existing: usize,
    pub failed: usize,
    pub pruned_destinations: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub upsert: UpsertSummary,
    pub drain: DrainReport,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} failed; delivered {}/{} attempted ({} pending selected, {} destinations pruned)",
            self.upsert.created,
            self.upsert.updated,
            self.upsert.unchanged,
            self.upsert.failed,
            self.drain.delivered,
            self.drain.attempted,
            self.drain.selected,
            self.drain.pruned_destinations,
        )
    }
}

/// Scrape `source` and upsert the result on a spawned task.
pub async fn refresh_store(
    source: Arc<dyn Source>,
    db_path: PathBuf,
    busy_timeout: Duration,
) -> Result<UpsertSummary> {
    tokio::spawn(async move {
        let items = source.fetch_all().await;
        tracing::info!(count = items.len(), "scraped items");
        let repository = Repository::open(&db_path, busy_timeout).await?;
        repository.upsert_items(items).await
    })
    .await?
}

pub struct Dispatcher {
    source: Arc<dyn Source>,
    platform: Arc<dyn ForumPlatform>,
    probe: Arc<dyn MediaProbe>,
    settings: DispatchSettings,
    cycle_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn Source>,
        platform: Arc<dyn ForumPlatform>,
        probe: Arc<dyn MediaProbe>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            source,
            platform,
            probe,
            settings,
            cycle_lock: Mutex::new(()),
        }
    }

    async fn open_store(&self) -> Result<Repository> {
        Repository::open(&self.settings.db_path, self.settings.busy_timeout).await
    }

    /// Run cycles every refresh interval until `shutdown` flips to true.
    /// A cycle in flight completes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) => tracing::info!("Cycle finished: {}", report),
                Err(e) if e.is_lock_timeout() => {
                    tracing::warn!("Cycle skipped, store is busy: {}", e)
                }
                Err(e) => tracing::error!("Cycle failed: {}", e),
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;

        let upsert = refresh_store(
            Arc::clone(&self.source),
            self.settings.db_path.clone(),
            self.settings.busy_timeout,
        )
        .await?;
        tracing::info!(
            total = upsert.total(),
            created = upsert.created,
            updated = upsert.updated,
            unchanged = upsert.unchanged,
            failed = upsert.failed,
            queued = upsert.tasks_queued,
            "store refreshed"
        );

        let repository = self.open_store().await?;
        let drain = self.drain(&repository, Utc::now()).await?;

        Ok(CycleReport { upsert, drain })
    }

    /// Deliver up to one batch of tasks that are ready at `now`.
    pub async fn drain(&self, repository: &Repository, now: DateTime<Utc>) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        let tasks = repository.pending_tasks(now, self.settings.batch_size).await?;
        report.selected = tasks.len();
        if tasks.is_empty() {
            tracing::debug!("no pending tasks");
            return Ok(report);
        }

        let mut item_ids: Vec<String> = tasks.iter().map(|t| t.item.id.clone()).collect();
        item_ids.sort();
        item_ids.dedup();
        let extras = repository.load_extras(item_ids).await?;

        let mut forums: HashMap<ChannelId, ForumHandle> = HashMap::new();
        let mut gone: HashSet<ChannelId> = HashSet::new();
        let mut unavailable: HashSet<ChannelId> = HashSet::new();

        for task in tasks {
            let channel_id = task.channel_id;
            let item_id = task.item.id.as_str();

            if gone.contains(&channel_id) || unavailable.contains(&channel_id) {
                continue;
            }

            if let Some(thread_id) = &task.thread_id {
                tracing::debug!(channel_id, item_id, thread_id = %thread_id, "already posted, dropping task");
                repository.consume_task(channel_id, item_id).await?;
                report.skipped_existing += 1;
                continue;
            }

            if !forums.contains_key(&channel_id) {
                match self.platform.resolve(channel_id).await {
                    Ok(Some(forum)) => {
                        forums.insert(channel_id, forum);
                    }
                    Ok(None) => {
                        tracing::warn!(channel_id, "destination no longer resolves, removing it");
                        repository.remove_destination(channel_id).await?;
                        gone.insert(channel_id);
                        report.pruned_destinations += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(channel_id, error = %e, "could not resolve destination, retrying next cycle");
                        unavailable.insert(channel_id);
                        report.failed += 1;
                        continue;
                    }
                }
            }
            let Some(forum) = forums.get_mut(&channel_id) else {
                continue;
            };

            if report.attempted > 0 && !self.settings.dispatch_delay.is_zero() {
                tokio::time::sleep(self.settings.dispatch_delay).await;
            }
            report.attempted += 1;

            match self.deliver(forum, &task.item, extras.get(item_id)).await {
                Ok(thread_id) => {
                    repository.record_delivery(channel_id, item_id, &thread_id).await?;
                    tracing::info!(channel_id, item_id, thread_id = %thread_id, "posted");
                    report.delivered += 1;
                }
                Err(AppError::DestinationGone(_)) => {
                    tracing::warn!(channel_id, item_id, "destination vanished while posting, removing it");
                    repository.remove_destination(channel_id).await?;
                    gone.insert(channel_id);
                    report.pruned_destinations += 1;
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(channel_id, item_id, error = %e, "delivery failed, task stays pending");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            "drained delivery queue"
        );
        Ok(report)
    }

    async fn deliver(
        &self,
        forum: &mut ForumHandle,
        item: &Item,
        extras: Option<&ItemExtras>,
    ) -> Result<String> {
        let empty = ItemExtras::default();
        let extras = extras.unwrap_or(&empty);
        let opts = &self.settings.compose;

        let tag_ids = self.resolve_tags(forum, &extras.tags).await;
        let media = plan_media(&extras.images, &extras.files, opts, self.probe.as_ref()).await;

        let post = OutgoingPost {
            title: thread_title(&item.title, TITLE_LIMIT),
            content: compose_body(&item.content, &media.links, &item.url, item.timestamp, opts),
            tag_ids,
            attachments: media.attachments,
        };

        self.platform.create_thread(forum, &post).await
    }

    /// Map tag names to forum tag ids, creating missing tags while the forum
    /// has room. Tags that cannot be created are left off the post.
    async fn resolve_tags(&self, forum: &mut ForumHandle, names: &[String]) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();

        for name in names {
            if ids.len() >= self.platform.max_applied_tags() {
                break;
            }
            if let Some(tag) = forum.tag_named(name) {
                if !ids.contains(&tag.id) {
                    ids.push(tag.id.clone());
                }
                continue;
            }
            if forum.available_tags.len() >= self.platform.max_forum_tags() {
                tracing::debug!(channel_id = forum.channel_id, tag = %name, "forum tag list is full");
                continue;
            }
            match self.platform.create_tag(forum, name).await {
                Ok(tag) => {
                    tracing::info!(channel_id = forum.channel_id, tag = %tag.name, "created forum tag");
                    ids.push(tag.id.clone());
                    forum.available_tags.push(tag);
                }
                Err(e) => {
                    tracing::warn!(channel_id = forum.channel_id, tag = %name, error = %e, "failed to create tag")
                }
            }
        }

        ids
    }

    /// Register a forum channel and queue every known item for it.
    /// Returns `None` if it was already registered.
    pub async fn register_destination(&self, channel_id: ChannelId) -> Result<Option<usize>> {
        let _guard = self.cycle_lock.lock().await;

        let Some(forum) = self.platform.resolve(channel_id).await? else {
            return Err(AppError::DestinationGone(channel_id));
        };
        let repository = self.open_store().await?;
        let backfilled = repository.register_destination(channel_id).await?;
        if let Some(count) = backfilled {
            tracing::info!(channel_id, forum = %forum.name, backfilled = count, "registered destination");
        }
        Ok(backfilled)
    }

    pub async fn unregister_destination(&self, channel_id: ChannelId) -> Result<bool> {
        let _guard = self.cycle_lock.lock().await;

        let removed = self.open_store().await?.remove_destination(channel_id).await?;
        if removed {
            tracing::info!(channel_id, "unregistered destination");
        }
        Ok(removed)
    }

    pub async fn destinations(&self) -> Result<Vec<ChannelId>> {
        self.open_store().await?.list_destinations().await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.open_store().await?.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ForumTag, RawItem};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex as StdMutex;
    use tokio_test::assert_ok;

    struct FakeSource {
        items: StdMutex<Vec<RawItem>>,
    }

    impl FakeSource {
        fn new(items: Vec<RawItem>) -> Arc<Self> {
            Arc::new(Self {
                items: StdMutex::new(items),
            })
        }

        fn set(&self, items: Vec<RawItem>) {
            *self.items.lock().unwrap() = items;
        }
    }

    #[async_trait]
    impl Source for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch_all(&self) -> Vec<RawItem> {
            self.items.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct FakePlatform {
        forums: StdMutex<HashMap<ChannelId, ForumHandle>>,
        failing_titles: HashSet<String>,
        /// Channels that still resolve but reject new threads as deleted.
        vanishing: HashSet<ChannelId>,
        threads: StdMutex<Vec<(ChannelId, OutgoingPost)>>,
        tag_limit: usize,
    }

    impl FakePlatform {
        fn with_forums(ids: &[ChannelId]) -> Self {
            let forums = ids
                .iter()
                .map(|&id| {
                    (
                        id,
                        ForumHandle {
                            channel_id: id,
                            name: format!("forum-{id}"),
                            available_tags: vec![],
                        },
                    )
                })
                .collect();
            Self {
                forums: StdMutex::new(forums),
                tag_limit: 20,
                ..Default::default()
            }
        }

        fn delete_forum(&self, id: ChannelId) {
            self.forums.lock().unwrap().remove(&id);
        }

        fn posts(&self) -> Vec<(ChannelId, OutgoingPost)> {
            self.threads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ForumPlatform for FakePlatform {
        async fn resolve(&self, channel_id: ChannelId) -> Result<Option<ForumHandle>> {
            Ok(self.forums.lock().unwrap().get(&channel_id).cloned())
        }

        async fn create_tag(&self, forum: &ForumHandle, name: &str) -> Result<ForumTag> {
            let mut forums = self.forums.lock().unwrap();
            let handle = forums
                .get_mut(&forum.channel_id)
                .ok_or(AppError::DestinationGone(forum.channel_id))?;
            let tag = ForumTag {
                id: format!("tag-{}", handle.available_tags.len()),
                name: name.to_string(),
            };
            handle.available_tags.push(tag.clone());
            Ok(tag)
        }

        async fn create_thread(&self, forum: &ForumHandle, post: &OutgoingPost) -> Result<String> {
            if self.failing_titles.contains(&post.title) {
                return Err(AppError::Platform("500 Internal Server Error".to_string()));
            }
            if self.vanishing.contains(&forum.channel_id)
                || !self.forums.lock().unwrap().contains_key(&forum.channel_id)
            {
                return Err(AppError::DestinationGone(forum.channel_id));
            }
            let mut threads = self.threads.lock().unwrap();
            threads.push((forum.channel_id, post.clone()));
            Ok(format!("thread-{}", threads.len()))
        }

        fn max_forum_tags(&self) -> usize {
            self.tag_limit
        }

        fn max_applied_tags(&self) -> usize {
            5
        }
    }

    struct SmallMedia;

    #[async_trait]
    impl MediaProbe for SmallMedia {
        async fn content_length(&self, _url: &str) -> Option<u64> {
            Some(1024)
        }
    }

    fn item(id: &str, title: &str, content: &str) -> RawItem {
        RawItem {
            id: id.to_string(),
            url: format!("https://www.example.edu/?p={id}"),
            title: title.to_string(),
            tags: vec![],
            content: content.to_string(),
            images: vec![],
            files: vec![],
            timestamp: Utc::now() - ChronoDuration::hours(1),
        }
    }

    fn settings(dir: &tempfile::TempDir) -> DispatchSettings {
        DispatchSettings {
            db_path: dir.path().join("relay.db"),
            refresh_interval: Duration::from_secs(60),
            batch_size: 50,
            busy_timeout: Duration::from_secs(5),
            dispatch_delay: Duration::ZERO,
            compose: ComposeOptions {
                content_limit: 2000,
                attachment_cap: 10,
                max_attachment_bytes: 10 * 1024 * 1024,
                display_offset: FixedOffset::east_opt(8 * 3600).unwrap(),
            },
        }
    }

    fn dispatcher(
        dir: &tempfile::TempDir,
        source: Arc<FakeSource>,
        platform: Arc<FakePlatform>,
    ) -> Dispatcher {
        Dispatcher::new(source, platform, Arc::new(SmallMedia), settings(dir))
    }

    #[tokio::test]
    async fn delivered_item_is_posted_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![item("1", "Exam schedule", "Body")]);
        let platform = Arc::new(FakePlatform::with_forums(&[100]));
        let dispatcher = dispatcher(&dir, source, platform.clone());

        assert_eq!(assert_ok!(dispatcher.register_destination(100).await), Some(0));

        let first = assert_ok!(dispatcher.run_cycle().await);
        assert_eq!(first.upsert.created, 1);
        assert_eq!(first.drain.delivered, 1);

        let second = assert_ok!(dispatcher.run_cycle().await);
        assert_eq!(second.upsert.unchanged, 1);
        assert_eq!(second.drain.selected, 0);

        let posts = platform.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1.title, "Exam schedule");
        assert!(posts[0].1.content.starts_with("Body\n\nSource: https://www.example.edu/?p=1"));

        let repository = dispatcher.open_store().await.unwrap();
        let record = repository.delivery_record(100, "1").await.unwrap().unwrap();
        assert_eq!(record.thread_id, "thread-1");
        assert!(!repository.has_task(100, "1").await.unwrap());
    }

    #[tokio::test]
    async fn vanished_destination_is_removed_without_affecting_others() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![item("1", "One", "a"), item("2", "Two", "b")]);
        let platform = Arc::new(FakePlatform::with_forums(&[100, 200]));
        let dispatcher = dispatcher(&dir, source, platform.clone());

        dispatcher.register_destination(100).await.unwrap();
        dispatcher.register_destination(200).await.unwrap();
        platform.delete_forum(200);

        let report = dispatcher.run_cycle().await.unwrap();

        assert_eq!(report.drain.pruned_destinations, 1);
        assert_eq!(report.drain.delivered, 2);
        assert!(platform.posts().iter().all(|(channel, _)| *channel == 100));
        assert_eq!(dispatcher.destinations().await.unwrap(), vec![100]);

        let stats = dispatcher.stats().await.unwrap();
        assert_eq!(stats.pending_tasks, 0);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn forum_deleted_after_resolving_is_pruned_mid_drain() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![item("1", "One", "a"), item("2", "Two", "b")]);
        let platform = Arc::new(FakePlatform {
            vanishing: HashSet::from([200]),
            ..FakePlatform::with_forums(&[100, 200])
        });
        let dispatcher = dispatcher(&dir, source, platform.clone());

        dispatcher.register_destination(100).await.unwrap();
        dispatcher.register_destination(200).await.unwrap();

        let report = dispatcher.run_cycle().await.unwrap();

        assert_eq!(report.drain.pruned_destinations, 1);
        assert_eq!(report.drain.failed, 1);
        assert_eq!(report.drain.delivered, 2);
        assert!(platform.posts().iter().all(|(channel, _)| *channel == 100));
        assert_eq!(dispatcher.destinations().await.unwrap(), vec![100]);

        let stats = dispatcher.stats().await.unwrap();
        assert_eq!(stats.pending_tasks, 0);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn locked_store_aborts_the_cycle_before_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![item("1", "One", "a")]);
        let platform = Arc::new(FakePlatform::with_forums(&[100]));
        let dispatcher = Dispatcher::new(
            source,
            platform.clone(),
            Arc::new(SmallMedia),
            DispatchSettings {
                busy_timeout: Duration::from_millis(200),
                ..settings(&dir)
            },
        );
        dispatcher.register_destination(100).await.unwrap();

        let writer = rusqlite::Connection::open(dir.path().join("relay.db")).unwrap();
        writer
            .execute_batch("BEGIN IMMEDIATE; INSERT INTO destinations (channel_id) VALUES (9);")
            .unwrap();

        let err = dispatcher.run_cycle().await.unwrap_err();
        assert!(err.is_lock_timeout(), "unexpected error: {err}");
        assert!(platform.posts().is_empty());

        writer.execute_batch("ROLLBACK").unwrap();
        assert_eq!(dispatcher.stats().await.unwrap().items, 0);

        let report = assert_ok!(dispatcher.run_cycle().await);
        assert_eq!(report.upsert.created, 1);
        assert_eq!(report.drain.delivered, 1);
    }

    #[tokio::test]
    async fn failed_delivery_stays_pending_while_others_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![
            item("1", "First", "a"),
            item("2", "Second", "b"),
            item("3", "Third", "c"),
        ]);
        let platform = Arc::new(FakePlatform {
            failing_titles: HashSet::from(["Second".to_string()]),
            ..FakePlatform::with_forums(&[100])
        });
        let dispatcher = dispatcher(&dir, source, platform.clone());
        dispatcher.register_destination(100).await.unwrap();

        let report = dispatcher.run_cycle().await.unwrap();
        assert_eq!(report.drain.attempted, 3);
        assert_eq!(report.drain.delivered, 2);
        assert_eq!(report.drain.failed, 1);

        let repository = dispatcher.open_store().await.unwrap();
        assert!(repository.has_task(100, "2").await.unwrap());
        assert!(!repository.has_task(100, "1").await.unwrap());
        assert!(!repository.has_task(100, "3").await.unwrap());
    }

    #[tokio::test]
    async fn changed_content_updates_in_place_without_requeueing() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("relay.db");
        let busy = Duration::from_secs(5);

        let repository = Repository::open(&db_path, busy).await.unwrap();
        repository.register_destination(7).await.unwrap();

        let mut first = item("42", "Notice", "A");
        first.tags = vec!["競賽".to_string()];
        let source = FakeSource::new(vec![first.clone()]);

        let created = refresh_store(source.clone(), db_path.clone(), busy).await.unwrap();
        assert_eq!((created.created, created.tasks_queued), (1, 1));

        let unchanged = refresh_store(source.clone(), db_path.clone(), busy).await.unwrap();
        assert_eq!(unchanged.unchanged, 1);

        let mut second = first.clone();
        second.content = "B".to_string();
        second.tags = vec!["獎學金".to_string()];
        source.set(vec![second]);

        let updated = refresh_store(source.clone(), db_path.clone(), busy).await.unwrap();
        assert_eq!(updated.updated, 1);
        assert_eq!(updated.tasks_queued, 0);

        let stats = repository.stats().await.unwrap();
        assert_eq!(stats.pending_tasks, 1);
        let extras = repository.load_extras(vec!["42".to_string()]).await.unwrap();
        assert_eq!(extras["42"].tags, vec!["獎學金".to_string()]);
    }

    #[tokio::test]
    async fn future_items_wait_in_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduled = item("9", "Next week", "later");
        scheduled.timestamp = Utc::now() + ChronoDuration::days(1);
        let source = FakeSource::new(vec![scheduled]);
        let platform = Arc::new(FakePlatform::with_forums(&[100]));
        let dispatcher = dispatcher(&dir, source, platform.clone());
        dispatcher.register_destination(100).await.unwrap();

        let report = dispatcher.run_cycle().await.unwrap();
        assert_eq!(report.drain.selected, 0);
        assert!(platform.posts().is_empty());

        let repository = dispatcher.open_store().await.unwrap();
        assert!(repository.has_task(100, "9").await.unwrap());
    }

    #[tokio::test]
    async fn missing_tags_are_created_until_the_forum_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut tagged = item("1", "Tagged", "body");
        tagged.tags = vec!["競賽".to_string(), "演講".to_string(), "實習".to_string()];
        let source = FakeSource::new(vec![tagged]);
        let platform = Arc::new(FakePlatform {
            tag_limit: 2,
            ..FakePlatform::with_forums(&[100])
        });
        let dispatcher = dispatcher(&dir, source, platform.clone());
        dispatcher.register_destination(100).await.unwrap();

        dispatcher.run_cycle().await.unwrap();

        let posts = platform.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1.tag_ids, vec!["tag-0".to_string(), "tag-1".to_string()]);
    }

    #[tokio::test]
    async fn unresolvable_channel_cannot_be_registered() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::with_forums(&[100]));
        let dispatcher = dispatcher(&dir, FakeSource::new(vec![]), platform);

        let err = dispatcher.register_destination(555).await.unwrap_err();
        assert!(matches!(err, AppError::DestinationGone(555)));
        assert!(dispatcher.destinations().await.unwrap().is_empty());
        assert_eq!(dispatcher.register_destination(100).await.unwrap(), Some(0));
        assert_eq!(dispatcher.register_destination(100).await.unwrap(), None);
        assert!(dispatcher.unregister_destination(100).await.unwrap());
    }
}
