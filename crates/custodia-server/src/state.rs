//! Shared application state for the Custodia server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the encrypted storage overlay, the
//! authentication/authorization pipeline, and the consumer dispatch tree.

use std::sync::Arc;

use custodia_core::auth::AuthChain;
use custodia_core::consumer::ConsumerTree;
use custodia_core::kem::KemKeyStore;
use custodia_core::plugin::AuditHook;
use custodia_store::Store;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// The encrypted overlay wrapping the configured backing store.
    pub store: Arc<dyn Store>,
    /// The ordered authentication/authorization pipeline.
    pub auth_chain: Arc<AuthChain>,
    /// Registered consumers, keyed by mount point.
    pub consumers: Arc<ConsumerTree>,
    /// KEM key registry, present when at least one path is KEM-protected.
    pub kem_keys: Option<Arc<KemKeyStore>>,
    /// Audit hook every plugin decision is recorded through.
    pub audit: Arc<dyn AuditHook>,
    /// This instance's forwarder id, used to detect request loops across
    /// chained Custodia deployments via the `X-LOOP-CUSTODIA` header.
    pub forwarder_id: String,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
