//! Authentication and authorization pipeline.
//!
//! Authenticators run in registration order; any explicit negative fails
//! the request immediately, and at least one positive is required.
//! Authorizers then run in order; the first to return non-[`AuthOutcome::NotApplicable`]
//! decides the request.

use std::collections::HashSet;
use std::sync::Arc;

use subtle::ConstantTimeEq;

use custodia_store::Store;

use crate::error::AuthError;
use crate::kem::KemKeyStore;
use crate::plugin::{AuditHook, SvcAccess};
use crate::request::Request;

/// The result of one plugin's evaluation of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Positive,
    Negative,
    NotApplicable,
}

/// A plugin that attempts to establish `remote_user` (or otherwise vouch
/// for the caller) from transport-level credentials or headers.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, request: &mut Request) -> AuthOutcome;
}

/// A plugin that decides whether an authenticated request may proceed to a
/// given path.
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, request: &mut Request) -> AuthOutcome;
}

/// Peer-credential authenticator: matches a Unix-socket peer's uid or gid
/// against configured values. `-1` on a side means "ignore"; `-1` on both
/// is always negative.
pub struct PeerCredAuth {
    pub uid: i64,
    pub gid: i64,
}

#[async_trait::async_trait]
impl Authenticator for PeerCredAuth {
    fn name(&self) -> &str {
        "PeerCredAuth"
    }

    async fn handle(&self, request: &mut Request) -> AuthOutcome {
        let Some(creds) = request.creds else {
            return AuthOutcome::NotApplicable;
        };
        if self.uid < 0 && self.gid < 0 {
            return AuthOutcome::Negative;
        }
        let uid_matches = self.uid >= 0 && i64::from(creds.uid) == self.uid;
        let gid_matches = self.gid >= 0 && i64::from(creds.gid) == self.gid;
        if uid_matches || gid_matches {
            AuthOutcome::Positive
        } else {
            AuthOutcome::Negative
        }
    }
}

/// Header authenticator: a named header must be present, and optionally
/// its value must belong to a configured allow-list. The header's value
/// becomes `remote_user` on success.
pub struct HeaderAuth {
    pub header_name: String,
    pub allowed_values: Option<HashSet<String>>,
}

#[async_trait::async_trait]
impl Authenticator for HeaderAuth {
    fn name(&self) -> &str {
        "HeaderAuth"
    }

    async fn handle(&self, request: &mut Request) -> AuthOutcome {
        let Some(value) = request.header(&self.header_name).map(str::to_string) else {
            return AuthOutcome::NotApplicable;
        };
        if let Some(allowed) = &self.allowed_values {
            if !allowed.contains(&value) {
                return AuthOutcome::Negative;
            }
        }
        request.remote_user = Some(value);
        AuthOutcome::Positive
    }
}

/// Stored-key authenticator: two headers carry an id and a shared key; the
/// id is looked up in a namespace of the store and compared in constant
/// time. The id becomes `remote_user` on success.
pub struct StoredKeyAuth {
    pub store: Arc<dyn Store>,
    pub namespace: String,
    pub id_header: String,
    pub key_header: String,
}

#[async_trait::async_trait]
impl Authenticator for StoredKeyAuth {
    fn name(&self) -> &str {
        "StoredKeyAuth"
    }

    async fn handle(&self, request: &mut Request) -> AuthOutcome {
        let (Some(id), Some(presented)) = (
            request.header(&self.id_header).map(str::to_string),
            request.header(&self.key_header).map(str::to_string),
        ) else {
            return AuthOutcome::NotApplicable;
        };

        let path = format!("{}/{id}", self.namespace.trim_end_matches('/'));
        let Ok(Some(stored)) = self.store.get(&path).await else {
            return AuthOutcome::NotApplicable;
        };

        if stored.ct_eq(presented.as_bytes()).into() {
            request.remote_user = Some(id);
            AuthOutcome::Positive
        } else {
            AuthOutcome::Negative
        }
    }
}

/// Client-certificate authenticator: requires a prior TLS handshake to have
/// populated `client_cert`, gated by a header the transport sets only when
/// client-cert verification actually succeeded.
pub struct ClientCertAuth {
    pub gate_header: String,
}

#[async_trait::async_trait]
impl Authenticator for ClientCertAuth {
    fn name(&self) -> &str {
        "ClientCertAuth"
    }

    async fn handle(&self, request: &mut Request) -> AuthOutcome {
        let gate_set = request
            .header(&self.gate_header)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
        if !gate_set {
            return AuthOutcome::NotApplicable;
        }
        let Some(cert) = request.client_cert.clone() else {
            return AuthOutcome::Negative;
        };
        request.remote_user = Some(cert.subject_cn);
        AuthOutcome::Positive
    }
}

/// Path authorizer: a configured set of path prefixes. A path matches if
/// any entry is an exact match, an ancestor directory, or (when suffixed
/// with `.`) an exact match without the trailing separator.
pub struct PathAuthz {
    pub paths: Vec<String>,
}

#[async_trait::async_trait]
impl Authorizer for PathAuthz {
    fn name(&self) -> &str {
        "PathAuthz"
    }

    async fn handle(&self, request: &mut Request) -> AuthOutcome {
        let reqpath = request.path.clone();

        for authz in &self.paths {
            if authz.ends_with('/') {
                continue;
            }
            let candidate = authz.strip_suffix('.').unwrap_or(authz);
            if candidate == reqpath {
                return AuthOutcome::Positive;
            }
        }

        let mut path = reqpath.as_str();
        loop {
            if self.paths.iter().any(|p| p == path) {
                return AuthOutcome::Positive;
            }
            if path.is_empty() {
                break;
            }
            path = match path.rfind('/') {
                Some(0) => "/",
                Some(idx) => &path[..idx],
                None => "",
            };
            if path == "/" && self.paths.iter().any(|p| p == "/") {
                return AuthOutcome::Positive;
            }
            if path.is_empty() || path == "/" {
                break;
            }
        }

        AuthOutcome::NotApplicable
    }
}

/// User-namespace authorizer: within a configured subtree, requires
/// `remote_user` and rewrites `default_namespace` to it once the path is
/// confirmed to live under `<subtree>/<user>/`.
pub struct UserNamespaceAuthz {
    pub subtree: String,
}

#[async_trait::async_trait]
impl Authorizer for UserNamespaceAuthz {
    fn name(&self) -> &str {
        "UserNamespaceAuthz"
    }

    async fn handle(&self, request: &mut Request) -> AuthOutcome {
        if !request.path.starts_with(&self.subtree) {
            return AuthOutcome::NotApplicable;
        }

        let Some(name) = request.remote_user.clone() else {
            return AuthOutcome::Negative;
        };

        let namespace = format!("{}/{name}/", self.subtree.trim_end_matches('/'));
        if !request.path.starts_with(&namespace) {
            return AuthOutcome::Negative;
        }

        request.default_namespace = Some(name);
        AuthOutcome::Positive
    }
}

/// KEM-keystore authorizer: attaches a key-store handle to requests under
/// its configured paths so the secrets consumer treats the body as a KEM
/// envelope; does not itself decide access — verification happens when the
/// consumer parses the envelope.
pub struct KemKeystoreAuthz {
    pub paths: Vec<String>,
    pub keys: Arc<KemKeyStore>,
}

#[async_trait::async_trait]
impl Authorizer for KemKeystoreAuthz {
    fn name(&self) -> &str {
        "KemKeystoreAuthz"
    }

    async fn handle(&self, request: &mut Request) -> AuthOutcome {
        if !self.paths.iter().any(|p| request.path.starts_with(p)) {
            return AuthOutcome::NotApplicable;
        }
        request.kem_keys = Some(Arc::clone(&self.keys));
        AuthOutcome::Positive
    }
}

/// The ordered pipeline: every authenticator, then every authorizer.
pub struct AuthChain {
    authenticators: Vec<Box<dyn Authenticator>>,
    authorizers: Vec<Box<dyn Authorizer>>,
    audit: Arc<dyn AuditHook>,
}

impl AuthChain {
    #[must_use]
    pub fn new(
        authenticators: Vec<Box<dyn Authenticator>>,
        authorizers: Vec<Box<dyn Authorizer>>,
        audit: Arc<dyn AuditHook>,
    ) -> Self {
        Self { authenticators, authorizers, audit }
    }

    /// Run every authenticator, then every authorizer, in order.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Denied`] if no authenticator returns positive (or
    /// one returns negative), and [`AuthError::Forbidden`] if an authorizer
    /// explicitly denies.
    pub async fn run(&self, request: &mut Request) -> Result<(), AuthError> {
        let mut any_positive = false;
        for authenticator in &self.authenticators {
            match authenticator.handle(request).await {
                AuthOutcome::Positive => any_positive = true,
                AuthOutcome::Negative => {
                    self.audit.audit_svc_access(
                        authenticator.name(),
                        SvcAccess::AuthFail,
                        &request.client_id,
                        &request.path,
                    );
                    return Err(AuthError::Denied);
                }
                AuthOutcome::NotApplicable => {}
            }
        }
        if !any_positive {
            return Err(AuthError::Denied);
        }

        for authorizer in &self.authorizers {
            match authorizer.handle(request).await {
                AuthOutcome::Positive => {
                    self.audit.audit_svc_access(
                        authorizer.name(),
                        SvcAccess::AuthzPass,
                        &request.client_id,
                        &request.path,
                    );
                    return Ok(());
                }
                AuthOutcome::Negative => {
                    self.audit.audit_svc_access(
                        authorizer.name(),
                        SvcAccess::AuthzFail,
                        &request.client_id,
                        &request.path,
                    );
                    return Err(AuthError::Forbidden(format!(
                        "{} denied {}",
                        authorizer.name(),
                        request.path
                    )));
                }
                AuthOutcome::NotApplicable => {}
            }
        }

        Err(AuthError::Forbidden("no authorizer matched this path".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plugin::TracingAuditHook;
    use crate::request::{Method, PeerCreds};
    use custodia_store::MemoryStore;

    fn req(path: &str) -> Request {
        Request::new(Method::Get, path, "test-client")
    }

    #[tokio::test]
    async fn peer_cred_matches_uid() {
        let auth = PeerCredAuth { uid: 1000, gid: -1 };
        let mut request = req("/secrets/alice/k1");
        request.creds = Some(PeerCreds { pid: 1, uid: 1000, gid: 999 });
        assert_eq!(auth.handle(&mut request).await, AuthOutcome::Positive);
    }

    #[tokio::test]
    async fn peer_cred_both_ignored_is_negative() {
        let auth = PeerCredAuth { uid: -1, gid: -1 };
        let mut request = req("/secrets/alice/k1");
        request.creds = Some(PeerCreds { pid: 1, uid: 1000, gid: 999 });
        assert_eq!(auth.handle(&mut request).await, AuthOutcome::Negative);
    }

    #[tokio::test]
    async fn peer_cred_mismatch_is_negative_not_pass_through() {
        let auth = PeerCredAuth { uid: 1000, gid: -1 };
        let mut request = req("/secrets/alice/k1");
        request.creds = Some(PeerCreds { pid: 1, uid: 1001, gid: 999 });
        assert_eq!(auth.handle(&mut request).await, AuthOutcome::Negative);
    }

    #[tokio::test]
    async fn path_authz_matches_ancestor() {
        let authz = PathAuthz { paths: vec!["/secrets".to_string()] };
        let mut request = req("/secrets/alice/k1");
        assert_eq!(authz.handle(&mut request).await, AuthOutcome::Positive);
    }

    #[tokio::test]
    async fn path_authz_rejects_unlisted() {
        let authz = PathAuthz { paths: vec!["/other".to_string()] };
        let mut request = req("/secrets/alice/k1");
        assert_eq!(authz.handle(&mut request).await, AuthOutcome::NotApplicable);
    }

    #[tokio::test]
    async fn user_namespace_requires_remote_user() {
        let authz = UserNamespaceAuthz { subtree: "/secrets".to_string() };
        let mut request = req("/secrets/alice/k1");
        assert_eq!(authz.handle(&mut request).await, AuthOutcome::Negative);
    }

    #[tokio::test]
    async fn user_namespace_passes_for_own_namespace() {
        let authz = UserNamespaceAuthz { subtree: "/secrets".to_string() };
        let mut request = req("/secrets/alice/k1");
        request.remote_user = Some("alice".to_string());
        assert_eq!(authz.handle(&mut request).await, AuthOutcome::Positive);
        assert_eq!(request.default_namespace.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn user_namespace_denies_cross_user_access() {
        let authz = UserNamespaceAuthz { subtree: "/secrets".to_string() };
        let mut request = req("/secrets/bob/k1");
        request.remote_user = Some("alice".to_string());
        assert_eq!(authz.handle(&mut request).await, AuthOutcome::Negative);
    }

    #[tokio::test]
    async fn stored_key_auth_accepts_matching_key() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.set("custodiaSAK/svc1", b"topsecretkey", false).await.unwrap();
        let auth = StoredKeyAuth {
            store,
            namespace: "custodiaSAK".to_string(),
            id_header: "CUSTODIA_AUTH_ID".to_string(),
            key_header: "CUSTODIA_AUTH_KEY".to_string(),
        };
        let mut request = req("/secrets/svc1/k1");
        request.headers.insert("CUSTODIA_AUTH_ID".to_string(), "svc1".to_string());
        request.headers.insert("CUSTODIA_AUTH_KEY".to_string(), "topsecretkey".to_string());
        assert_eq!(auth.handle(&mut request).await, AuthOutcome::Positive);
        assert_eq!(request.remote_user.as_deref(), Some("svc1"));
    }

    #[tokio::test]
    async fn chain_fails_closed_with_no_positive_authenticator() {
        let chain = AuthChain::new(vec![], vec![], Arc::new(TracingAuditHook));
        let mut request = req("/secrets/alice/k1");
        assert!(matches!(chain.run(&mut request).await, Err(AuthError::Denied)));
    }
}
