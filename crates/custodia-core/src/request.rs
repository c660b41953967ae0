//! Request/response types carried through the pipeline.
//!
//! These mirror a dynamically-typed request dictionary the original
//! implementation threads through authenticators, authorizers, and
//! consumers — here made a concrete, typed struct so every plugin seam is
//! checked at compile time instead of by key lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::kem::KemKeyStore;

/// The HTTP method of an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

/// Credentials obtained from a Unix-domain peer via `SO_PEERCRED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCreds {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Subject information extracted from a verified TLS client certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCert {
    pub subject_cn: String,
    pub serial: String,
}

/// A request as it travels through the authentication/authorization
/// pipeline and into a consumer.
///
/// `extensions` carries plugin-attached state that has no fixed shape (today
/// this is only the KEM key-store handle, attached by the KEM authorizer);
/// modeled as a typed `Option` rather than an untyped map because exactly
/// one extension kind currently exists.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// Absolute path, e.g. `/secrets/alice/db-password`.
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub creds: Option<PeerCreds>,
    pub client_cert: Option<ClientCert>,
    /// Stable identifier for audit logging, independent of `remote_user`.
    pub client_id: String,
    /// Populated by a successful authenticator.
    pub remote_user: Option<String>,
    /// Populated by a namespace authorizer.
    pub default_namespace: Option<String>,
    /// Residual path components after consumer-tree dispatch.
    pub trail: Vec<String>,
    /// Present when a KEM authorizer has attached keystore access to this
    /// request (i.e. the path falls under a KEM-protected mount).
    pub kem_keys: Option<Arc<KemKeyStore>>,
}

impl Request {
    /// Construct a request with no credentials and an empty trail, for use
    /// by transports that fill in fields incrementally.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: None,
            creds: None,
            client_cert: None,
            client_id: client_id.into(),
            remote_user: None,
            default_namespace: None,
            trail: Vec::new(),
            kem_keys: None,
        }
    }

    /// Case-insensitive header lookup, matching HTTP semantics.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The body of a successful, or in-flight, response.
#[derive(Debug, Clone)]
pub enum Output {
    /// A value to be serialized as JSON.
    Json(serde_json::Value),
    /// Raw bytes written as-is with the given content type.
    Raw { content_type: String, bytes: Vec<u8> },
    /// No body (e.g. 204).
    Empty,
}

/// A response produced by a consumer handler.
#[derive(Debug, Clone)]
pub struct Response {
    pub code: u16,
    pub headers: HashMap<String, String>,
    pub output: Output,
}

impl Response {
    #[must_use]
    pub fn json(code: u16, value: serde_json::Value) -> Self {
        Self {
            code,
            headers: HashMap::new(),
            output: Output::Json(value),
        }
    }

    #[must_use]
    pub fn empty(code: u16) -> Self {
        Self {
            code,
            headers: HashMap::new(),
            output: Output::Empty,
        }
    }

    #[must_use]
    pub fn raw(code: u16, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            code,
            headers: HashMap::new(),
            output: Output::Raw {
                content_type: content_type.into(),
                bytes,
            },
        }
    }
}
