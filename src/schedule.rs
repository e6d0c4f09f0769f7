use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::sync::Syncer;

/// Runs incremental syncs on a fixed interval until cancelled. The first run starts right away.
pub struct Scheduler {
    syncer: Arc<Syncer>,
    every: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(syncer: Arc<Syncer>, every: Duration) -> Self {
        Self {
            syncer,
            every,
            task: Mutex::new(None),
        }
    }

    /// Spawns the recurring task. Returns false, spawning nothing, if it already runs.
    pub fn start(&self, token: CancellationToken) -> bool {
        let mut task = match self.task.lock() {
            Ok(task) => task,
            Err(poisoned) => poisoned.into_inner(),
        };
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let syncer = self.syncer.clone();
        let every = self.every;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => run_once(&syncer).await,
                    _ = token.cancelled() => {
                        tracing::info!("sync scheduler shutting down");
                        break;
                    }
                }
            }
        }));

        tracing::info!(every_seconds = every.as_secs(), "sync scheduler started");
        true
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(task) => task.as_ref().is_some_and(|t| !t.is_finished()),
            Err(poisoned) => poisoned.into_inner().as_ref().is_some_and(|t| !t.is_finished()),
        }
    }
}

async fn run_once(syncer: &Syncer) {
    match syncer.run(false).await {
        Ok(_) => {}
        Err(SyncError::Busy) => tracing::info!("scheduled sync skipped, a run is in progress"),
        Err(e) if e.is_retryable() => {
            tracing::warn!(kind = e.kind(), "scheduled sync failed, retrying next interval")
        }
        Err(e) => tracing::error!(kind = e.kind(), "scheduled sync failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::SettingKey;
    use crate::readwise::{ExportPage, PageSource};
    use crate::sync::SyncOptions;
    use async_trait::async_trait;

    struct EmptySource;

    #[async_trait]
    impl PageSource for EmptySource {
        async fn fetch(&self, _: &str, _: &str, _: Option<&str>) -> Result<ExportPage, SyncError> {
            Ok(ExportPage {
                count: 0,
                next_page_cursor: None,
                results: vec![],
            })
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stops_on_cancel() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let options = SyncOptions::from(&crate::config::Config::default());
        let syncer = Arc::new(Syncer::new(Arc::new(EmptySource), db.clone(), options));
        let scheduler = Scheduler::new(syncer, Duration::from_secs(3600));
        let token = CancellationToken::new();

        assert!(scheduler.start(token.clone()));
        assert!(!scheduler.start(token.clone()));
        assert!(scheduler.is_running());

        // the first sync does not wait for a full interval
        let mut committed = None;
        for _ in 0..50 {
            committed = db.get_setting(SettingKey::TimeLastChecked).await.unwrap();
            if committed.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(committed.is_some());

        token.cancel();
        for _ in 0..50 {
            if !scheduler.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!scheduler.is_running());
    }
}
