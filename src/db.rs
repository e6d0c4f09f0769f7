use crate::config::Config;
use crate::handler::HandlerParams;
use crate::model::{ContentEntry, NewEntry, PostStatus, SettingKey};
use crate::store::SiteStore;
use anyhow::Result;
use async_trait::async_trait;
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_schema.sql", include_str!("migrations/001_schema.sql")),
    ("002_sync_lease.sql", include_str!("migrations/002_sync_lease.sql")),
];

const REPLICA_SYNC_INTERVAL: Duration = Duration::from_secs(60);

pub struct Database {
    // Keeps the handle alive for replicated mode, where it owns the sync loop.
    _db: LibsqlDatabase,
    conn: Connection,
    tx_lock: Mutex<()>,
}

impl Database {
    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());
        let turso_url = cfg.app.turso_url.clone();
        let turso_auth_token = cfg.app.turso_auth_token.clone();

        let db = match (&turso_url, &turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                Builder::new_synced_database(&path, url.clone(), token.clone())
                    .sync_interval(REPLICA_SYNC_INTERVAL)
                    .build()
                    .await?
            }
            _ => Builder::new_local(&path).build().await?,
        };

        Self::setup(db).await
    }

    /// A throwaway database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::setup(db).await
    }

    async fn setup(db: LibsqlDatabase) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            _db: db,
            conn,
            tx_lock: Mutex::new(()),
        })
    }

    pub async fn get_setting(&self, key: SettingKey) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", libsql::params![key.as_str()])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub async fn set_setting(&self, key: SettingKey, value: &str) -> Result<()> {
        // Writes share the connection with entry transactions.
        let _guard = self.tx_lock.lock().await;
        let query = r#"
            INSERT INTO settings (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        "#;
        self.conn
            .execute(query, libsql::params![key.as_str(), value])
            .await?;
        Ok(())
    }

    pub async fn get_or_create_tag(&self, name: &str) -> Result<i64> {
        let insert_query = "INSERT OR IGNORE INTO tags (name) VALUES (?)";
        self.conn.execute(insert_query, libsql::params![name]).await?;

        let select_query = "SELECT id FROM tags WHERE name = ? LIMIT 1";
        let mut rows = self.conn.query(select_query, libsql::params![name]).await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            anyhow::bail!("Failed to get or create tag: {}", name)
        }
    }

    pub async fn create_entry(&self, entry: &NewEntry) -> Result<i64> {
        let _guard = self.tx_lock.lock().await;

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        match self.create_entry_internal(entry).await {
            Ok(entry_id) => {
                self.conn.execute("COMMIT", ()).await?;
                Ok(entry_id)
            }
            Err(e) => {
                let _ = self.conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn create_entry_internal(&self, entry: &NewEntry) -> Result<i64> {
        let insert_entry = r#"
            INSERT INTO entries (title, content, status, author_id, byline, format, thumbnail_url)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#;

        let mut rows = self
            .conn
            .query(
                insert_entry,
                libsql::params![
                    entry.title.as_str(),
                    entry.content.as_str(),
                    entry.status.as_str(),
                    entry.author_id,
                    entry.byline.as_str(),
                    entry.format.as_str(),
                    entry.thumbnail_url.clone()
                ],
            )
            .await?;

        let entry_id: i64 = if let Some(row) = rows.next().await? {
            row.get(0)?
        } else {
            anyhow::bail!("Failed to create entry")
        };
        drop(rows);

        for (key, value) in &entry.meta {
            let meta_query = "INSERT INTO entry_meta (entry_id, meta_key, meta_value) VALUES (?, ?, ?)";
            self.conn
                .execute(meta_query, libsql::params![entry_id, key.as_str(), value.as_str()])
                .await?;
        }

        for (position, tag_name) in entry.tags.iter().enumerate() {
            let tag_id = self.get_or_create_tag(tag_name).await?;
            let link_query =
                "INSERT OR IGNORE INTO entry_tags (entry_id, tag_id, position) VALUES (?, ?, ?)";
            self.conn
                .execute(link_query, libsql::params![entry_id, tag_id, position as i64])
                .await?;
        }

        Ok(entry_id)
    }

    pub async fn find_entry_by_meta(&self, key: &str, value: &str) -> Result<Option<i64>> {
        let query = "SELECT entry_id FROM entry_meta WHERE meta_key = ? AND meta_value = ? LIMIT 1";
        let mut rows = self.conn.query(query, libsql::params![key, value]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    async fn entry_tags(&self, entry_id: i64) -> Result<Vec<String>> {
        let query = r#"
            SELECT tags.name
            FROM entry_tags
            JOIN tags ON tags.id = entry_tags.tag_id
            WHERE entry_tags.entry_id = ?
            ORDER BY entry_tags.position
        "#;
        let mut rows = self.conn.query(query, libsql::params![entry_id]).await?;
        let mut tags = vec![];
        while let Some(row) = rows.next().await? {
            tags.push(row.get(0)?);
        }
        Ok(tags)
    }

    async fn entry_meta(&self, entry_id: i64) -> Result<BTreeMap<String, String>> {
        let query = "SELECT meta_key, meta_value FROM entry_meta WHERE entry_id = ?";
        let mut rows = self.conn.query(query, libsql::params![entry_id]).await?;
        let mut meta = BTreeMap::new();
        while let Some(row) = rows.next().await? {
            meta.insert(row.get(0)?, row.get(1)?);
        }
        Ok(meta)
    }

    fn row_to_entry(row: &libsql::Row) -> Result<ContentEntry> {
        let status: String = row.get(3)?;
        let status = PostStatus::from_str(&status)
            .ok_or_else(|| anyhow::anyhow!("Invalid entry status: {}", status))?;

        Ok(ContentEntry {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            status,
            author_id: row.get(4)?,
            byline: row.get(5)?,
            format: row.get(6)?,
            thumbnail_url: row.get(7)?,
            created_at: row.get(8)?,
            tags: vec![],
            meta: BTreeMap::new(),
        })
    }

    pub async fn get_entry(&self, entry_id: i64) -> Result<Option<ContentEntry>> {
        let query = r#"
            SELECT id, title, content, status, author_id, byline, format, thumbnail_url, created_at
            FROM entries WHERE id = ?
        "#;
        let mut rows = self.conn.query(query, libsql::params![entry_id]).await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        drop(rows);
        let mut entry = Self::row_to_entry(&row)?;
        entry.tags = self.entry_tags(entry.id).await?;
        entry.meta = self.entry_meta(entry.id).await?;
        Ok(Some(entry))
    }

    pub async fn list_entries(&self, params: &HandlerParams) -> Result<Vec<ContentEntry>> {
        let query = r#"
            SELECT id, title, content, status, author_id, byline, format, thumbnail_url, created_at
            FROM entries
            ORDER BY id DESC
            LIMIT ? OFFSET ?
        "#;
        let mut rows = self
            .conn
            .query(query, libsql::params![params.limit as i64, params.offset as i64])
            .await?;

        let mut entries = vec![];
        while let Some(row) = rows.next().await? {
            entries.push(Self::row_to_entry(&row)?);
        }
        for entry in entries.iter_mut() {
            entry.tags = self.entry_tags(entry.id).await?;
            entry.meta = self.entry_meta(entry.id).await?;
        }
        Ok(entries)
    }

    pub async fn count_entries(&self) -> Result<i64> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM entries", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let _guard = self.tx_lock.lock().await;
        let now = chrono::Utc::now().timestamp();
        let expires_at = now + ttl.as_secs() as i64;
        let query = r#"
            INSERT INTO sync_lease (id, holder, expires_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE sync_lease.expires_at <= ?
        "#;
        let changed = self
            .conn
            .execute(query, libsql::params![holder, expires_at, now])
            .await?;
        Ok(changed > 0)
    }

    pub async fn release_lease(&self, holder: &str) -> Result<()> {
        let _guard = self.tx_lock.lock().await;
        self.conn
            .execute("DELETE FROM sync_lease WHERE holder = ?", libsql::params![holder])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SiteStore for Database {
    async fn get_setting(&self, key: SettingKey) -> Result<Option<String>> {
        Database::get_setting(self, key).await
    }

    async fn set_setting(&self, key: SettingKey, value: &str) -> Result<()> {
        Database::set_setting(self, key, value).await
    }

    async fn create_entry(&self, entry: &NewEntry) -> Result<i64> {
        Database::create_entry(self, entry).await
    }

    async fn find_entry_by_meta(&self, key: &str, value: &str) -> Result<Option<i64>> {
        Database::find_entry_by_meta(self, key, value).await
    }

    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        Database::acquire_lease(self, holder, ttl).await
    }

    async fn release_lease(&self, holder: &str) -> Result<()> {
        Database::release_lease(self, holder).await
    }
}
