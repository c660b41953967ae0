//! Consumer tree: maps mount points to handlers and walks an incoming
//! path down to the closest-registered mount, leaving the residual
//! components in [`Request::trail`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConsumerError;
use crate::request::{Request, Response};

/// A plugin that owns one mount point and implements the REST semantics
/// beneath it.
#[async_trait::async_trait]
pub trait Consumer: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Response, ConsumerError>;
}

/// A flat registry of mount points, matched by walking the request path
/// from most to least specific.
#[derive(Default)]
pub struct ConsumerTree {
    mounts: HashMap<String, Arc<dyn Consumer>>,
}

impl ConsumerTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` at `mount` (an absolute path with no trailing
    /// slash, e.g. `/secrets`).
    pub fn register(&mut self, mount: impl Into<String>, consumer: Arc<dyn Consumer>) {
        self.mounts.insert(mount.into(), consumer);
    }

    /// Find the mount that best matches `path`, splitting off everything
    /// past it into `trail`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::NotFound`] if no mount is an ancestor of
    /// `path`.
    pub fn dispatch_target(&self, path: &str) -> Result<(Arc<dyn Consumer>, Vec<String>), ConsumerError> {
        if !path.starts_with('/') {
            return Err(ConsumerError::BadRequest("path must be absolute".to_string()));
        }

        let mut trail: Vec<String> = Vec::new();
        let mut cursor = path.trim_end_matches('/').to_string();
        if cursor.is_empty() {
            cursor = "/".to_string();
        }

        loop {
            if let Some(consumer) = self.mounts.get(&cursor) {
                return Ok((Arc::clone(consumer), trail));
            }
            if cursor == "/" {
                break;
            }
            match cursor.rfind('/') {
                Some(0) => {
                    trail.insert(0, cursor[1..].to_string());
                    cursor = "/".to_string();
                }
                Some(idx) => {
                    trail.insert(0, cursor[idx + 1..].to_string());
                    cursor.truncate(idx);
                }
                None => break,
            }
        }

        Err(ConsumerError::NotFound(format!("no consumer mounted for '{path}'")))
    }

    /// Dispatch `request` to the matching consumer, populating its `trail`.
    ///
    /// # Errors
    ///
    /// Propagates [`ConsumerError::NotFound`] from [`Self::dispatch_target`]
    /// and whatever error the matched consumer returns.
    pub async fn dispatch(&self, mut request: Request) -> Result<Response, ConsumerError> {
        let (consumer, trail) = self.dispatch_target(&request.path)?;
        request.trail = trail;
        consumer.handle(request).await
    }
}
