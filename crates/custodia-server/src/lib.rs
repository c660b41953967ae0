//! Custodia HTTP server.
//!
//! Wires together the core library, a storage backend, and the secrets
//! consumer into a running Axum server. Everything under the configured
//! mount point (`/secrets` by default) is routed through one handler that
//! runs the authentication/authorization pipeline and then dispatches into
//! `custodia-core`'s consumer tree.

pub mod config;
pub mod error;
pub mod hardening;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod uds;
