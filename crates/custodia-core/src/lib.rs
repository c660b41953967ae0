//! Core library for Custodia.
//!
//! Contains the request/response types, the plugin configuration surface,
//! the authentication/authorization pipeline, the encrypted storage overlay,
//! the KEM envelope handler, the message envelope validator, the audit hook,
//! the consumer dispatch tree, and the secrets consumer itself. This crate
//! depends on `custodia-store` for the storage backend trait and knows
//! nothing about transport (HTTP, Unix socket) or process bootstrap — that
//! lives in `custodia-server`.

pub mod audit;
pub mod auth;
pub mod consumer;
pub mod error;
pub mod kem;
pub mod message;
pub mod overlay;
pub mod plugin;
pub mod request;
pub mod secrets;
