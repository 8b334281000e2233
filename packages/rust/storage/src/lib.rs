//! Durable local state for the content pipeline (libSQL, offline mode).
//!
//! [`Storage`] is a string key/value store shaped like browser local storage.
//! The pipeline keeps these keys in it:
//!
//! | key | value |
//! |---|---|
//! | `content-cache-<name>` | processed fragment HTML |
//! | `content-cache-<name>-timestamp` | fetch time, epoch ms |
//! | `content-config` | JSON [`ConfigOverride`] |
//! | `content-analytics` | JSON array of [`AnalyticsEvent`] |
//! | `theme` | `dark` or `light` |

mod migrations;

use std::path::Path;

use chrono::Utc;
use fragmentsync_shared::{
    AnalyticsEvent, CacheEntry, ConfigOverride, FragmentSyncError, Result, Theme,
};
use libsql::{Connection, Database, params};

/// Prefix shared by every cached fragment key.
pub const CACHE_KEY_PREFIX: &str = "content-cache-";

/// Suffix of the per-component cache timestamp key.
const TIMESTAMP_SUFFIX: &str = "-timestamp";

/// Key of the persisted config override.
pub const CONFIG_KEY: &str = "content-config";

/// Key of the rolling analytics buffer.
pub const ANALYTICS_KEY: &str = "content-analytics";

/// Key of the persisted theme.
pub const THEME_KEY: &str = "theme";

/// `content-cache-<name>`
pub fn cache_key(component: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{component}")
}

/// `content-cache-<name>-timestamp`
pub fn cache_timestamp_key(component: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{component}{TIMESTAMP_SUFFIX}")
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FragmentSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (dashboards and inspection).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        FragmentSyncError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(FragmentSyncError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw key/value operations
    // -----------------------------------------------------------------------

    /// Read the value stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM local_state WHERE key = ?1", params![key])
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| FragmentSyncError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(FragmentSyncError::Storage(e.to_string())),
        }
    }

    /// Insert or replace the value under `key`.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO local_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove `key`. Returns whether a value was present.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute("DELETE FROM local_state WHERE key = ?1", params![key])
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;
        Ok(removed > 0)
    }

    /// All keys starting with `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key FROM local_state WHERE substr(key, 1, ?1) = ?2 ORDER BY key",
                params![prefix.chars().count() as i64, prefix],
            )
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;

        let mut keys = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            keys.push(
                row.get::<String>(0)
                    .map_err(|e| FragmentSyncError::Storage(e.to_string()))?,
            );
        }
        Ok(keys)
    }

    // -----------------------------------------------------------------------
    // Fragment cache
    // -----------------------------------------------------------------------

    /// Cached content for a component, if present.
    ///
    /// A missing or unreadable timestamp is reported as `0` (infinitely old).
    pub async fn get_cache_entry(&self, component: &str) -> Result<Option<CacheEntry>> {
        let Some(content) = self.get(&cache_key(component)).await? else {
            return Ok(None);
        };

        let fetched_at_ms = self
            .get(&cache_timestamp_key(component))
            .await?
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);

        Ok(Some(CacheEntry {
            component: component.to_string(),
            content,
            fetched_at_ms,
        }))
    }

    /// Persist a component's processed content and its fetch timestamp together.
    pub async fn put_cache_entry(
        &self,
        component: &str,
        content: &str,
        fetched_at_ms: i64,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let stamp = fetched_at_ms.to_string();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;

        for (key, value) in [
            (cache_key(component), content),
            (cache_timestamp_key(component), stamp.as_str()),
        ] {
            tx.execute(
                "INSERT INTO local_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key.as_str(), value, now.as_str()],
            )
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Every cached component entry, sorted by component name.
    pub async fn list_cache_entries(&self) -> Result<Vec<CacheEntry>> {
        let keys = self.keys_with_prefix(CACHE_KEY_PREFIX).await?;

        let mut entries = Vec::new();
        for key in keys.iter().filter(|k| !k.ends_with(TIMESTAMP_SUFFIX)) {
            let component = &key[CACHE_KEY_PREFIX.len()..];
            if let Some(entry) = self.get_cache_entry(component).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Remove every cached fragment and timestamp. Returns the number of keys removed.
    pub async fn clear_content_cache(&self) -> Result<u64> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM local_state WHERE substr(key, 1, ?1) = ?2",
                params![CACHE_KEY_PREFIX.len() as i64, CACHE_KEY_PREFIX],
            )
            .await
            .map_err(|e| FragmentSyncError::Storage(e.to_string()))?;

        tracing::debug!(removed, "cleared content cache");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Config override
    // -----------------------------------------------------------------------

    /// Load the persisted override, or an empty one.
    ///
    /// A corrupt override is logged and ignored so a bad write can never
    /// prevent the pipeline from starting.
    pub async fn load_config_override(&self) -> Result<ConfigOverride> {
        let Some(raw) = self.get(CONFIG_KEY).await? else {
            return Ok(ConfigOverride::default());
        };

        match serde_json::from_str(&raw) {
            Ok(over) => Ok(over),
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse saved config override, ignoring");
                Ok(ConfigOverride::default())
            }
        }
    }

    pub async fn save_config_override(&self, over: &ConfigOverride) -> Result<()> {
        let json = serde_json::to_string(over)
            .map_err(|e| FragmentSyncError::Storage(format!("serialize override: {e}")))?;
        self.set(CONFIG_KEY, &json).await
    }

    // -----------------------------------------------------------------------
    // Analytics buffer
    // -----------------------------------------------------------------------

    /// Load the rolling analytics buffer (oldest first).
    pub async fn load_analytics(&self) -> Result<Vec<AnalyticsEvent>> {
        let Some(raw) = self.get(ANALYTICS_KEY).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(events) => Ok(events),
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse analytics buffer, starting empty");
                Ok(Vec::new())
            }
        }
    }

    pub async fn save_analytics(&self, events: &[AnalyticsEvent]) -> Result<()> {
        let json = serde_json::to_string(events)
            .map_err(|e| FragmentSyncError::Storage(format!("serialize analytics: {e}")))?;
        self.set(ANALYTICS_KEY, &json).await
    }

    // -----------------------------------------------------------------------
    // Theme
    // -----------------------------------------------------------------------

    /// The persisted theme, if one was ever set and is valid.
    pub async fn get_theme(&self) -> Result<Option<Theme>> {
        Ok(self
            .get(THEME_KEY)
            .await?
            .and_then(|raw| raw.parse::<Theme>().ok()))
    }

    pub async fn set_theme(&self, theme: Theme) -> Result<()> {
        self.set(THEME_KEY, theme.as_str()).await
    }
}
