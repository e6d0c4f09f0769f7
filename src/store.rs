use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{NewEntry, SettingKey};

/// The publishing side of a sync: settings, entries and the run lease.
#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn get_setting(&self, key: SettingKey) -> Result<Option<String>>;

    async fn set_setting(&self, key: SettingKey, value: &str) -> Result<()>;

    /// Creates an entry together with its tags and meta, and returns its id.
    async fn create_entry(&self, entry: &NewEntry) -> Result<i64>;

    async fn find_entry_by_meta(&self, key: &str, value: &str) -> Result<Option<i64>>;

    /// Takes the run lease for `ttl` if it is free or expired. Returns whether it was taken.
    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool>;

    async fn release_lease(&self, holder: &str) -> Result<()>;
}
