use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::SyncError;
use crate::model::SettingKey;
use crate::store::SiteStore;

/// Sent as `updatedAfter` when everything should be fetched again.
pub const EPOCH: &str = "1970-01-01T00:00:00Z";

/// The `updatedAfter` boundary of the next sync, kept in the settings store.
pub struct Checkpoint<'a> {
    store: &'a dyn SiteStore,
}

impl<'a> Checkpoint<'a> {
    pub fn new(store: &'a dyn SiteStore) -> Self {
        Self { store }
    }

    /// The stored checkpoint, or the epoch when `fetch_all` is set or nothing is stored yet.
    pub async fn read(&self, fetch_all: bool) -> Result<DateTime<Utc>, SyncError> {
        if fetch_all {
            return Ok(DateTime::<Utc>::UNIX_EPOCH);
        }

        let stored = self
            .store
            .get_setting(SettingKey::TimeLastChecked)
            .await
            .map_err(SyncError::Store)?;

        match stored.as_deref().map(str::trim) {
            None | Some("") => Ok(DateTime::<Utc>::UNIX_EPOCH),
            Some(raw) => parse_timestamp(raw),
        }
    }

    pub async fn commit(&self, at: DateTime<Utc>) -> Result<(), SyncError> {
        self.store
            .set_setting(SettingKey::TimeLastChecked, &format_timestamp(at))
            .await
            .map_err(SyncError::Store)
    }
}

/// The moment a run starts, at the millisecond precision the checkpoint is stored with.
pub fn run_started_at() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::ConfigFormat(format!("invalid checkpoint {:?}: {}", raw, e)))
}
