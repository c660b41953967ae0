//! In-memory store — used for tests and for deployments that accept
//! losing all secrets on restart.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{immediate_child_name, Store, StoreError};

/// A [`Store`] backed by a `BTreeMap` guarded by a `RwLock`.
///
/// Sorted storage makes prefix listing a contiguous range scan, matching the
/// ordering guarantee the trait documents for [`Store::list`].
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(rows.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8], replace: bool) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        if !replace && rows.contains_key(key) {
            return Err(StoreError::Exists);
        }
        rows.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn cut(&self, key: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(rows.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Option<Vec<String>>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        if !rows.contains_key(prefix) {
            return Ok(None);
        }
        let mut children: Vec<String> = rows
            .range(prefix.to_string()..)
            .skip(1)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, _)| immediate_child_name(prefix, k))
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
        let store = MemoryStore::new();
        store.set("keys/alice/k1", b"v1", false).await.unwrap();
        assert_eq!(store.get("keys/alice/k1").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn set_without_replace_rejects_duplicate() {
        let store = MemoryStore::new();
        store.set("k", b"v1", false).await.unwrap();
        let err = store.set("k", b"v2", false).await.unwrap_err();
        assert!(matches!(err, StoreError::Exists));
    }

    #[tokio::test]
    async fn set_with_replace_overwrites() {
        let store = MemoryStore::new();
        store.set("k", b"v1", false).await.unwrap();
        store.set("k", b"v2", true).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn cut_absent_key_returns_false() {
        let store = MemoryStore::new();
        assert!(!store.cut("nope").await.unwrap());
    }

    #[tokio::test]
    async fn list_absent_prefix_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.list("keys/alice/").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_empty_container_is_empty_vec() {
        let store = MemoryStore::new();
        store.span("keys/alice/").await.unwrap();
        assert_eq!(store.list("keys/alice/").await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn list_returns_only_immediate_children() {
        let store = MemoryStore::new();
        store.span("keys/alice/").await.unwrap();
        store.set("keys/alice/k1", b"v", false).await.unwrap();
        store.span("keys/alice/sub/").await.unwrap();
        store.set("keys/alice/sub/k2", b"v", false).await.unwrap();

        let mut children = store.list("keys/alice/").await.unwrap().unwrap();
        children.sort();
        assert_eq!(children, vec!["k1".to_string(), "sub/".to_string()]);
    }

    #[tokio::test]
    async fn span_twice_is_exists_error() {
        let store = MemoryStore::new();
        store.span("keys/alice/").await.unwrap();
        assert!(matches!(store.span("keys/alice/").await, Err(StoreError::Exists)));
    }
}
