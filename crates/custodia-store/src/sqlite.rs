//! SQLite store — the reference backend.
//!
//! A single table `(key TEXT PRIMARY KEY, value BLOB NOT NULL)`. Prefix
//! listing uses a half-open range scan against the key index rather than
//! `LIKE`, so keys containing `%` or `_` are not mis-escaped.
//!
//! Key namespacing and encryption happen above this layer (in the encrypted
//! overlay). This backend treats keys as opaque UTF-8 strings and values as
//! opaque bytes.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::{immediate_child_name, Store, StoreError};

/// A [`Store`] backed by SQLite, reached through `sqlx`.
///
/// Safe to share across async tasks: `sqlx::SqlitePool` pools its own
/// connections and every method borrows `&self`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (creating if absent) a SQLite database at `path`, setting the
    /// file mode to `0640` once created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database cannot be opened or
    /// the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let existed = path.exists();
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::Backend(format!("open {}: {e}", path.display())))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Backend(format!("create schema: {e}")))?;

        if !existed {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = std::fs::metadata(path) {
                    let mut perms = meta.permissions();
                    perms.set_mode(0o640);
                    let _ = std::fs::set_permissions(path, perms);
                }
            }
        }

        Ok(Self { pool })
    }

    /// Open an in-memory SQLite database (one connection, lives only for
    /// the pool's lifetime). Useful for tests that want the real SQL path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Backend(format!("open in-memory: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Backend(format!("create schema: {e}")))?;

        Ok(Self { pool })
    }
}

/// Compute the exclusive upper bound of a prefix range scan: the prefix with
/// its last byte incremented, so `key >= prefix AND key < upper` matches
/// exactly the keys starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(&last) = bytes.last() {
        if last < 0xff {
            let mut upper = bytes.clone();
            *upper.last_mut().expect("non-empty checked by while-let") += 1;
            return String::from_utf8(upper).ok();
        }
        bytes.pop();
    }
    None
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value FROM store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("get {key}: {e}")))?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn set(&self, key: &str, value: &[u8], replace: bool) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(format!("begin tx: {e}")))?;

        let exists = sqlx::query("SELECT 1 FROM store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(format!("check {key}: {e}")))?
            .is_some();

        if exists && !replace {
            return Err(StoreError::Exists);
        }

        sqlx::query(
            "INSERT INTO store (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(format!("set {key}: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(format!("commit tx: {e}")))?;
        Ok(())
    }

    async fn cut(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("cut {key}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, prefix: &str) -> Result<Option<Vec<String>>, StoreError> {
        let present = sqlx::query("SELECT 1 FROM store WHERE key = ?1")
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("check container {prefix}: {e}")))?
            .is_some();
        if !present {
            return Ok(None);
        }

        let rows = if let Some(upper) = prefix_upper_bound(prefix) {
            sqlx::query("SELECT key FROM store WHERE key > ?1 AND key < ?2 ORDER BY key")
                .bind(prefix)
                .bind(upper)
                .fetch_all(&self.pool)
                .await
        } else {
            sqlx::query("SELECT key FROM store WHERE key > ?1 ORDER BY key")
                .bind(prefix)
                .fetch_all(&self.pool)
                .await
        }
        .map_err(|e| StoreError::Backend(format!("list {prefix}: {e}")))?;

        let mut children: Vec<String> = rows
            .into_iter()
            .filter_map(|r| immediate_child_name(prefix, r.get::<String, _>("key").as_str()))
            .collect();
        children.sort();
        children.dedup();
        Ok(Some(children))
    }

    async fn span(&self, key: &str) -> Result<(), StoreError> {
        self.set(key, &[], false).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("keys/alice/k1", b"v1", false).await.unwrap();
        assert_eq!(store.get("keys/alice/k1").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn set_without_replace_rejects_duplicate() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("k", b"v1", false).await.unwrap();
        assert!(matches!(store.set("k", b"v2", false).await, Err(StoreError::Exists)));
    }

    #[tokio::test]
    async fn list_only_surfaces_immediate_children() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.span("keys/alice/").await.unwrap();
        store.set("keys/alice/k1", b"v", false).await.unwrap();
        store.span("keys/alice/sub/").await.unwrap();
        store.set("keys/alice/sub/k2", b"v", false).await.unwrap();

        let mut children = store.list("keys/alice/").await.unwrap().unwrap();
        children.sort();
        assert_eq!(children, vec!["k1".to_string(), "sub/".to_string()]);
    }

    #[tokio::test]
    async fn list_absent_prefix_is_none() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert_eq!(store.list("keys/ghost/").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cut_then_get_is_none() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("k", b"v", false).await.unwrap();
        assert!(store.cut("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
