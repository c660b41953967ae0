//! Hierarchical key/value store abstraction for Custodia.
//!
//! This crate defines the [`Store`] trait — a pure key-value storage
//! interface that knows nothing about secrets, authentication, or message
//! envelopes. The encrypted overlay in `custodia-core` wraps a [`Store`] to
//! ensure values are authenticated-encrypted before they reach this layer.
//!
//! Two implementations are provided:
//!
//! - [`SqliteStore`] — reference backend, a single `key`/`value` table
//!   (feature `sqlite-backend`, default).
//! - [`MemoryStore`] — in-memory, for tests and ephemeral deployments.

mod error;
mod memory;
#[cfg(feature = "sqlite-backend")]
mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "sqlite-backend")]
pub use sqlite::SqliteStore;

/// A pluggable hierarchical key-value store.
///
/// Keys are UTF-8 strings using `/` as the path separator. A key ending in
/// `/` denotes a *container*: a zero-length row that must exist before any
/// key nested under it can be written. [`list`](Store::list) enumerates the
/// *immediate* children of a container only — a grandchild three levels
/// below the queried prefix is invisible at that prefix, even though its own
/// parent container surfaces independently when queried directly.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`)
/// and must treat every mutating method as atomic with respect to concurrent
/// callers.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    /// Retrieve a value by exact key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the underlying engine faults.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or update a key.
    ///
    /// When `replace` is `false` and the key is already present, returns
    /// [`StoreError::Exists`] without modifying storage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exists`] on a non-replacing write to an existing
    /// key, or [`StoreError::Backend`] on engine faults.
    async fn set(&self, key: &str, value: &[u8], replace: bool) -> Result<(), StoreError>;

    /// Delete a key, returning whether a row was actually removed.
    ///
    /// Deleting an absent key is not an error; it returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the underlying engine faults.
    async fn cut(&self, key: &str) -> Result<bool, StoreError>;

    /// Enumerate the immediate children of `prefix` (a container key, i.e.
    /// one ending in `/`).
    ///
    /// Returns `Ok(None)` if `prefix` itself is not a known container,
    /// `Ok(Some(vec![]))` if it is a container with no children, and
    /// otherwise a sorted list of child names relative to `prefix` — names
    /// that are themselves containers carry a trailing `/`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the underlying engine faults.
    async fn list(&self, prefix: &str) -> Result<Option<Vec<String>>, StoreError>;

    /// Create an empty container at `key` (which must end in `/`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exists`] if the container is already present,
    /// or [`StoreError::Backend`] on engine faults.
    async fn span(&self, key: &str) -> Result<(), StoreError>;
}

/// Split a child's absolute key into its name relative to `prefix`, keeping
/// only immediate children and preserving trailing `/` on sub-containers.
///
/// `prefix` must end in `/`. Returns `None` for any `key` that names a
/// descendant more than one path segment below `prefix`.
#[must_use]
pub fn immediate_child_name(prefix: &str, key: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() {
        return None;
    }
    match rest.find('/') {
        None => Some(rest.to_string()),
        Some(idx) if idx == rest.len() - 1 => Some(rest.to_string()),
        Some(_) => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn immediate_child_name_leaf() {
        assert_eq!(
            immediate_child_name("keys/alice/", "keys/alice/k1"),
            Some("k1".to_string())
        );
    }

    #[test]
    fn immediate_child_name_container() {
        assert_eq!(
            immediate_child_name("keys/alice/", "keys/alice/sub/"),
            Some("sub/".to_string())
        );
    }

    #[test]
    fn immediate_child_name_rejects_grandchild() {
        assert_eq!(immediate_child_name("keys/alice/", "keys/alice/sub/k2"), None);
    }

    #[test]
    fn immediate_child_name_rejects_non_descendant() {
        assert_eq!(immediate_child_name("keys/alice/", "keys/bob/k1"), None);
    }
}
