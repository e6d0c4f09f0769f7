use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use serde::Serialize;

use crate::checkpoint::{self, Checkpoint};
use crate::compose::{self, ComposeOptions};
use crate::config::Config;
use crate::error::SyncError;
use crate::model::SettingKey;
use crate::names::NameRules;
use crate::readwise::{self, Book, Highlight, PageSource};
use crate::store::SiteStore;
use crate::tags::{self, Routed, TagRules};

/// Entry meta key holding the highlight's source key; marks entries created by a sync.
pub const MARKER_META_KEY: &str = "readwise_source";

pub enum SyncResult<T> {
    Created(T),
    Duplicate(T),
    Skipped,
    Error,
}

impl<T> SyncResult<T> {
    pub fn record(self, stats: &mut SyncStats) -> Option<T> {
        match self {
            SyncResult::Created(id) => {
                stats.created += 1;
                Some(id)
            }
            SyncResult::Duplicate(id) => {
                stats.duplicates += 1;
                Some(id)
            }
            SyncResult::Skipped => {
                stats.skipped += 1;
                None
            }
            SyncResult::Error => {
                stats.failed += 1;
                None
            }
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncStats {
    pub created: i32,
    pub skipped: i32,
    pub duplicates: i32,
    pub failed: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Fetching,
    Processing,
    Committing,
}

/// Everything a run needs from the settings store, read once when it starts.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub access_token: String,
    pub since: DateTime<Utc>,
    pub name_rules: NameRules,
    pub tag_rules: TagRules,
}

impl SyncSettings {
    pub async fn load(
        store: &dyn SiteStore,
        fetch_all: bool,
        strict_name_rules: bool,
    ) -> Result<Self, SyncError> {
        let access_token = setting(store, SettingKey::AccessToken).await?;
        let names = setting(store, SettingKey::NewNameSets).await?;
        let added = setting(store, SettingKey::UserAddedTags).await?;
        let removed = setting(store, SettingKey::UserRemovedTags).await?;
        let since = Checkpoint::new(store).read(fetch_all).await?;

        let name_rules = NameRules::parse_with(&names, strict_name_rules)?;
        if name_rules.is_empty() && !names.trim().is_empty() {
            tracing::warn!("name rules are set but none of them could be used");
        }

        Ok(Self {
            access_token,
            since,
            name_rules,
            tag_rules: TagRules::from_settings(&added, &removed),
        })
    }
}

async fn setting(store: &dyn SiteStore, key: SettingKey) -> Result<String, SyncError> {
    Ok(store
        .get_setting(key)
        .await
        .map_err(SyncError::Store)?
        .unwrap_or_default())
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub compose: ComposeOptions,
    pub skip_duplicates: bool,
    pub strict_name_rules: bool,
    pub lease: Duration,
}

impl From<&Config> for SyncOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            compose: ComposeOptions::from(&cfg.publish),
            skip_duplicates: cfg.publish.skip_duplicates,
            strict_name_rules: cfg.publish.strict_name_rules,
            lease: Duration::from_secs(cfg.app.lease_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryFailure {
    pub highlight_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub fetch_all: bool,
    pub since: String,
    pub checkpoint: String,
    pub pages: usize,
    pub collections: usize,
    pub highlights: usize,
    pub stats: SyncStats,
    pub failures: Vec<EntryFailure>,
    pub results: Vec<Book>,
}

pub struct Syncer {
    source: Arc<dyn PageSource>,
    store: Arc<dyn SiteStore>,
    options: SyncOptions,
}

impl Syncer {
    pub fn new(source: Arc<dyn PageSource>, store: Arc<dyn SiteStore>, options: SyncOptions) -> Self {
        Self {
            source,
            store,
            options,
        }
    }

    /// Runs one sync under the run lease. The checkpoint only moves if the run succeeds.
    pub async fn run(&self, fetch_all: bool) -> Result<SyncReport, SyncError> {
        let holder = lease_holder();
        let acquired = self
            .store
            .acquire_lease(&holder, self.options.lease)
            .await
            .map_err(SyncError::Store)?;
        if !acquired {
            tracing::info!("sync skipped, another run holds the lease");
            return Err(SyncError::Busy);
        }

        let result = self.run_locked(fetch_all).await;

        if let Err(e) = self.store.release_lease(&holder).await {
            tracing::warn!(error = %e, holder = %holder, "failed to release sync lease");
        }

        match &result {
            Ok(report) => tracing::info!(
                phase = ?SyncPhase::Idle,
                created = report.stats.created,
                skipped = report.stats.skipped,
                duplicates = report.stats.duplicates,
                failed = report.stats.failed,
                checkpoint = %report.checkpoint,
                "sync finished"
            ),
            Err(e) => tracing::error!(
                phase = ?SyncPhase::Idle,
                kind = e.kind(),
                error = %crate::unpack_error(e),
                "sync failed, checkpoint left unchanged"
            ),
        }

        result
    }

    async fn run_locked(&self, fetch_all: bool) -> Result<SyncReport, SyncError> {
        let started_at = checkpoint::run_started_at();
        let settings =
            SyncSettings::load(self.store.as_ref(), fetch_all, self.options.strict_name_rules).await?;
        let since = checkpoint::format_timestamp(settings.since);

        tracing::info!(
            phase = ?SyncPhase::Fetching,
            since = %since,
            fetch_all,
            name_rules = settings.name_rules.len(),
            "fetching highlights"
        );
        let (pages, books) = self.fetch(&settings.access_token, &since).await?;

        let mut report = SyncReport {
            fetch_all,
            since,
            checkpoint: checkpoint::format_timestamp(started_at),
            pages,
            collections: books.len(),
            highlights: books.iter().map(|b| b.highlights.len()).sum(),
            stats: SyncStats::default(),
            failures: vec![],
            results: vec![],
        };

        tracing::info!(
            phase = ?SyncPhase::Processing,
            pages,
            collections = report.collections,
            highlights = report.highlights,
            "processing highlights"
        );
        for book in &books {
            self.process_book(book, &settings, &mut report).await;
        }

        tracing::info!(phase = ?SyncPhase::Committing, checkpoint = %report.checkpoint, "committing checkpoint");
        Checkpoint::new(self.store.as_ref()).commit(started_at).await?;

        report.results = books;
        Ok(report)
    }

    async fn fetch(&self, token: &str, since: &str) -> Result<(usize, Vec<Book>), SyncError> {
        let mut stream = pin!(readwise::pages(self.source.as_ref(), token, since));
        let mut pages = 0;
        let mut books = vec![];

        while let Some(page) = stream.try_next().await? {
            pages += 1;
            tracing::debug!(page = pages, results = page.results.len(), "fetched export page");
            books.extend(page.results);
        }

        Ok((pages, books))
    }

    async fn process_book(&self, book: &Book, settings: &SyncSettings, report: &mut SyncReport) {
        let author = settings
            .name_rules
            .apply(book.author.as_deref().unwrap_or_default());

        for highlight in &book.highlights {
            let Some(routed) = tags::route(highlight.tag_names(), &settings.tag_rules) else {
                SyncResult::<i64>::Skipped.record(&mut report.stats);
                continue;
            };

            match self.publish(book, highlight, author, routed).await {
                Ok(result) => {
                    result.record(&mut report.stats);
                }
                Err(e) => {
                    tracing::error!(
                        highlight_id = highlight.id,
                        book = %book.title,
                        error = %crate::unpack_error(&e),
                        "failed to create entry"
                    );
                    report.failures.push(EntryFailure {
                        highlight_id: highlight.id,
                        error: crate::unpack_error(&e),
                    });
                    SyncResult::<i64>::Error.record(&mut report.stats);
                }
            }
        }
    }

    async fn publish(
        &self,
        book: &Book,
        highlight: &Highlight,
        author: &str,
        routed: Routed,
    ) -> Result<SyncResult<i64>, SyncError> {
        let create_error = |source| SyncError::CreateEntry {
            highlight_id: highlight.id,
            source,
        };
        let key = compose::source_key(book, highlight);

        if self.options.skip_duplicates {
            if let Some(existing) = self
                .store
                .find_entry_by_meta(MARKER_META_KEY, &key)
                .await
                .map_err(create_error)?
            {
                tracing::debug!(highlight_id = highlight.id, entry_id = existing, "entry already exists");
                return Ok(SyncResult::Duplicate(existing));
            }
        }

        let mut entry = compose::compose(book, highlight, author, routed, &self.options.compose);
        entry.meta.push((MARKER_META_KEY.to_string(), key));
        let entry_id = self.store.create_entry(&entry).await.map_err(create_error)?;

        tracing::info!(
            entry_id,
            highlight_id = highlight.id,
            status = entry.status.as_str(),
            title = %entry.title,
            "created entry"
        );
        Ok(SyncResult::Created(entry_id))
    }
}

/// Rejects values a later sync could not use: malformed name rules or checkpoints.
pub fn validate_setting(key: SettingKey, value: &str) -> Result<(), SyncError> {
    match key {
        SettingKey::NewNameSets => NameRules::parse(value).map(|_| ()),
        SettingKey::TimeLastChecked if !value.trim().is_empty() => {
            checkpoint::parse_timestamp(value).map(|_| ())
        }
        _ => Ok(()),
    }
}

fn lease_holder() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_millis(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
