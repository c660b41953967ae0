//! Error taxonomy for the store layer.

/// Errors a [`crate::Store`] implementation can return.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `set` was called with `replace = false` against a key that is already
    /// present, or `span` was called against an existing container.
    #[error("key already exists")]
    Exists,

    /// The key contains the backend's reserved internal separator.
    #[error("key '{0}' contains a reserved separator")]
    InvalidKey(String),

    /// The backing storage engine failed in a way unrelated to the key
    /// namespace (I/O fault, corrupt row, connection loss, ...).
    #[error("store backend error: {0}")]
    Backend(String),
}
