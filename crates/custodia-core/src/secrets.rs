//! Secrets consumer: container/key CRUD with per-namespace REST semantics.
//!
//! Trail forms (after the consumer-tree strips the mount point):
//!
//! | Method | Path form       | Semantics                 |
//! |--------|-----------------|----------------------------|
//! | GET    | ends in `/`     | list container             |
//! | GET    | leaf            | read secret                |
//! | POST   | ends in `/`     | create container            |
//! | PUT    | leaf            | write secret                |
//! | DELETE | ends in `/`     | delete empty container      |
//! | DELETE | leaf            | delete secret                |
//!
//! Any other combination is [`ConsumerError::MethodNotAllowed`].

use std::collections::HashSet;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use custodia_store::{Store, StoreError};

use crate::consumer::Consumer;
use crate::error::ConsumerError;
use crate::kem::KemHandler;
use crate::message::{self, MessageType, Validator};
use crate::plugin::{AuditHook, KeyAccess};
use crate::request::{Method, Request, Response};

/// Header carrying a compact KEM envelope on a GET against a KEM-protected
/// path (a GET has no body to carry one in).
const KEM_ENVELOPE_HEADER: &str = "CUSTODIA_KEM";

/// The secrets consumer: the `keys/` tree in the backing store, fronted by
/// per-user namespace rules and optional KEM request/response wrapping.
pub struct SecretsConsumer {
    store: Arc<dyn Store>,
    validator: Validator,
    /// Namespaces allowed in addition to `request.default_namespace`
    /// (e.g. an admin namespace that is not tied to a single user).
    extra_namespaces: HashSet<String>,
    /// This server's own KEM key id, used to sign/select reply keys.
    server_kid: String,
    audit: Arc<dyn AuditHook>,
}

impl SecretsConsumer {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        validator: Validator,
        server_kid: impl Into<String>,
        audit: Arc<dyn AuditHook>,
    ) -> Self {
        Self {
            store,
            validator,
            extra_namespaces: HashSet::new(),
            server_kid: server_kid.into(),
            audit,
        }
    }

    fn audit_key(&self, outcome: KeyAccess, request: &Request, key: &str, action: &str) {
        self.audit.audit_key_access("Secrets", outcome, &request.client_id, key, action);
    }

    #[must_use]
    pub fn with_extra_namespaces(mut self, namespaces: HashSet<String>) -> Self {
        self.extra_namespaces = namespaces;
        self
    }

    fn check_namespace(&self, request: &Request) -> Result<(), ConsumerError> {
        let first = request
            .trail
            .first()
            .ok_or_else(|| ConsumerError::BadRequest("empty path".to_string()))?;

        let permitted = request.default_namespace.as_deref() == Some(first.as_str())
            || self.extra_namespaces.contains(first);

        if permitted {
            Ok(())
        } else {
            Err(ConsumerError::Forbidden(format!("namespace '{first}' is not accessible")))
        }
    }

    async fn list_container(&self, request: &Request) -> Result<Response, ConsumerError> {
        let key = container_key(&request.trail);
        let result = match self.store.list(&key).await? {
            None => Err(ConsumerError::NotFound(format!("no such container '{key}'"))),
            Some(children) => Ok(Response::json(200, serde_json::json!(children))),
        };
        self.audit_key(
            if result.is_ok() { KeyAccess::Allowed } else { KeyAccess::Denied },
            request,
            &key,
            "list",
        );
        result
    }

    async fn create_container(&self, request: &Request) -> Result<Response, ConsumerError> {
        let key = container_key(&request.trail);
        let result = async {
            self.ensure_parent_exists(request).await?;
            self.store.span(&key).await?;
            Ok(Response::empty(201))
        }
        .await;
        self.audit_key(
            if result.is_ok() { KeyAccess::Allowed } else { KeyAccess::Denied },
            request,
            &key,
            "create",
        );
        result
    }

    async fn delete_container(&self, request: &Request) -> Result<Response, ConsumerError> {
        let key = container_key(&request.trail);
        let result = match self.store.list(&key).await? {
            None => Err(ConsumerError::NotFound(format!("no such container '{key}'"))),
            Some(children) if !children.is_empty() => {
                Err(ConsumerError::Conflict(format!("container '{key}' is not empty")))
            }
            Some(_) => {
                self.store.cut(&key).await?;
                Ok(Response::empty(204))
            }
        };
        self.audit_key(
            if result.is_ok() { KeyAccess::Allowed } else { KeyAccess::Denied },
            request,
            &key,
            "delete",
        );
        result
    }

    async fn read_key(&self, request: &Request) -> Result<Response, ConsumerError> {
        let key = leaf_key(&request.trail);
        let Some(raw) = self.store.get(&key).await? else {
            self.audit_key(KeyAccess::Denied, request, &key, "get");
            return Err(ConsumerError::NotFound(format!("no such key '{key}'")));
        };

        let result = async {
            let stored: serde_json::Value = serde_json::from_slice(&raw)
                .map_err(|e| ConsumerError::Store(format!("corrupt envelope at '{key}': {e}")))?;
            let value_str = message::parse_simple_value(
                stored.get("value").unwrap_or(&serde_json::Value::Null),
            )
            .map_err(|_| ConsumerError::Store(format!("corrupt envelope at '{key}'")))?;

            if let Some(keys) = &request.kem_keys {
                let envelope_str = request.header(KEM_ENVELOPE_HEADER).ok_or_else(|| {
                    ConsumerError::BadRequest("missing KEM envelope header".to_string())
                })?;
                let subject = request.trail.join("/");
                let handler = KemHandler::new(Arc::clone(keys));
                let claims = handler.parse_request(envelope_str, &subject).await?;
                let reply = handler
                    .build_reply(&self.server_kid, &claims.client_kid, &subject, &serde_json::json!(value_str))
                    .await?;
                return Ok(Response::raw(200, "application/jose", reply.into_bytes()));
            }

            if request
                .header("Accept")
                .is_some_and(|accept| accept.split(',').any(|t| t.trim() == "application/octet-stream"))
            {
                let bytes = BASE64
                    .decode(&value_str)
                    .map_err(|e| ConsumerError::Store(format!("corrupt base64 at '{key}': {e}")))?;
                return Ok(Response::raw(200, "application/octet-stream", bytes));
            }

            Ok(Response::json(200, message::simple_envelope(&value_str)))
        }
        .await;

        self.audit_key(
            if result.is_ok() { KeyAccess::Allowed } else { KeyAccess::Denied },
            request,
            &key,
            "get",
        );
        result
    }

    async fn write_key(&self, request: Request) -> Result<Response, ConsumerError> {
        let key = leaf_key(&request.trail);
        let result = async {
            self.ensure_parent_exists(&request).await?;

            let value_str = self.extract_write_value(&request).await?;
            let envelope = message::simple_envelope(&value_str);
            let bytes = serde_json::to_vec(&envelope)
                .map_err(|e| ConsumerError::Store(format!("serialize envelope: {e}")))?;

            self.store.set(&key, &bytes, false).await?;
            Ok(Response::empty(201))
        }
        .await;

        self.audit_key(
            if result.is_ok() { KeyAccess::Allowed } else { KeyAccess::Denied },
            &request,
            &key,
            "set",
        );
        result
    }

    async fn extract_write_value(&self, request: &Request) -> Result<String, ConsumerError> {
        let body = request
            .body
            .as_ref()
            .ok_or_else(|| ConsumerError::BadRequest("missing body".to_string()))?;

        match request.header("Content-Type") {
            Some(ct) if ct.starts_with("application/json") => {
                let parsed: serde_json::Value = serde_json::from_slice(body)
                    .map_err(|e| ConsumerError::BadRequest(format!("invalid JSON body: {e}")))?;
                let (msg_type, value) = self.validator.parse(&parsed)?;
                match msg_type {
                    MessageType::Simple => Ok(message::parse_simple_value(value)?),
                    MessageType::Kem => {
                        let envelope = value
                            .as_str()
                            .ok_or_else(|| ConsumerError::BadRequest("kem value must be a string".to_string()))?;
                        let keys = request.kem_keys.clone().ok_or_else(|| {
                            ConsumerError::Forbidden("path is not KEM-protected".to_string())
                        })?;
                        let subject = request.trail.join("/");
                        let handler = KemHandler::new(keys);
                        let claims = handler.parse_request(envelope, &subject).await?;
                        let value = claims
                            .value
                            .ok_or_else(|| ConsumerError::BadRequest("kem envelope carries no value".to_string()))?;
                        value
                            .as_str()
                            .map(str::to_string)
                            .ok_or_else(|| ConsumerError::BadRequest("kem value claim must be a string".to_string()))
                    }
                }
            }
            Some(ct) if ct.starts_with("application/octet-stream") => Ok(BASE64.encode(body)),
            Some(ct) => Err(ConsumerError::BadRequest(format!("unsupported content type '{ct}'"))),
            None => Err(ConsumerError::BadRequest("missing Content-Type".to_string())),
        }
    }

    async fn delete_key(&self, request: &Request) -> Result<Response, ConsumerError> {
        let key = leaf_key(&request.trail);
        let result = if self.store.cut(&key).await? {
            Ok(Response::empty(204))
        } else {
            Err(ConsumerError::NotFound(format!("no such key '{key}'")))
        };
        self.audit_key(
            if result.is_ok() { KeyAccess::Allowed } else { KeyAccess::Denied },
            request,
            &key,
            "del",
        );
        result
    }

    /// Lazily create the top-level namespace container when the caller is
    /// writing directly into their own, freshly-authorized namespace;
    /// otherwise require every ancestor container to already exist.
    async fn ensure_parent_exists(&self, request: &Request) -> Result<(), ConsumerError> {
        if request.trail.len() < 2 {
            return Ok(()); // writing the namespace container itself
        }
        let parent = container_key(&request.trail[..request.trail.len() - 1]);
        if self.store.list(&parent).await?.is_some() {
            return Ok(());
        }

        let is_own_namespace_root = request.trail.len() == 2
            && request.default_namespace.as_deref() == Some(request.trail[0].as_str());
        if is_own_namespace_root {
            match self.store.span(&container_key(&request.trail[..1])).await {
                Ok(()) | Err(StoreError::Exists) => Ok(()),
                Err(e) => Err(e.into()),
            }
        } else {
            Err(ConsumerError::NotFound(format!("parent container '{parent}' does not exist")))
        }
    }
}

#[async_trait::async_trait]
impl Consumer for SecretsConsumer {
    async fn handle(&self, request: Request) -> Result<crate::request::Response, ConsumerError> {
        self.check_namespace(&request)?;
        let is_container = request.path.ends_with('/');

        match (request.method, is_container) {
            (Method::Get, true) => self.list_container(&request).await,
            (Method::Get, false) => self.read_key(&request).await,
            (Method::Post, true) => self.create_container(&request).await,
            (Method::Put, false) => self.write_key(request).await,
            (Method::Delete, true) => self.delete_container(&request).await,
            (Method::Delete, false) => self.delete_key(&request).await,
            _ => Err(ConsumerError::MethodNotAllowed),
        }
    }
}

fn container_key(trail: &[String]) -> String {
    format!("keys/{}/", trail.join("/"))
}

fn leaf_key(trail: &[String]) -> String {
    format!("keys/{}", trail.join("/"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plugin::TracingAuditHook;
    use crate::request::{Method, Output};
    use custodia_store::MemoryStore;

    fn consumer() -> SecretsConsumer {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        SecretsConsumer::new(store, Validator::default(), "server", Arc::new(TracingAuditHook))
    }

    fn put_request(trail: &[&str], body: &str) -> Request {
        let mut request = Request::new(Method::Put, format!("/secrets/{}", trail.join("/")), "c1");
        request.trail = trail.iter().map(|s| (*s).to_string()).collect();
        request.default_namespace = Some(trail[0].to_string());
        request.headers.insert("Content-Type".to_string(), "application/json".to_string());
        request.body = Some(body.as_bytes().to_vec());
        request
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let consumer = consumer();
        let write = put_request(&["alice", "k1"], r#"{"type":"simple","value":"hunter2"}"#);
        let response = consumer.handle(write).await.unwrap();
        assert_eq!(response.code, 201);

        let mut read = Request::new(Method::Get, "/secrets/alice/k1", "c1");
        read.trail = vec!["alice".to_string(), "k1".to_string()];
        read.default_namespace = Some("alice".to_string());
        let response = consumer.handle(read).await.unwrap();
        assert_eq!(response.code, 200);
        let Output::Json(body) = response.output else { panic!("expected json") };
        assert_eq!(body["value"], "hunter2");
    }

    #[tokio::test]
    async fn write_to_existing_key_is_conflict() {
        let consumer = consumer();
        let first = put_request(&["alice", "k1"], r#"{"type":"simple","value":"v1"}"#);
        assert_eq!(consumer.handle(first).await.unwrap().code, 201);

        let second = put_request(&["alice", "k1"], r#"{"type":"simple","value":"v2"}"#);
        let err = consumer.handle(second).await.unwrap_err();
        assert!(matches!(err, ConsumerError::Conflict(_)));
    }

    #[tokio::test]
    async fn write_lazily_creates_own_namespace() {
        let consumer = consumer();
        let write = put_request(&["alice", "k1"], r#"{"type":"simple","value":"v"}"#);
        assert_eq!(consumer.handle(write).await.unwrap().code, 201);
    }

    #[tokio::test]
    async fn write_without_parent_container_for_nested_path_is_not_found() {
        let consumer = consumer();
        let write = put_request(&["alice", "sub", "k1"], r#"{"type":"simple","value":"v"}"#);
        let err = consumer.handle(write).await.unwrap_err();
        assert!(matches!(err, ConsumerError::NotFound(_)));
    }

    #[tokio::test]
    async fn cross_namespace_write_is_forbidden() {
        let consumer = consumer();
        let mut write = put_request(&["bob", "k1"], r#"{"type":"simple","value":"v"}"#);
        write.default_namespace = Some("alice".to_string());
        let err = consumer.handle(write).await.unwrap_err();
        assert!(matches!(err, ConsumerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn delete_nonempty_container_is_conflict() {
        let consumer = consumer();
        let write = put_request(&["alice", "k1"], r#"{"type":"simple","value":"v"}"#);
        consumer.handle(write).await.unwrap();

        let mut delete = Request::new(Method::Delete, "/secrets/alice/", "c1");
        delete.trail = vec!["alice".to_string()];
        delete.default_namespace = Some("alice".to_string());
        let err = consumer.handle(delete).await.unwrap_err();
        assert!(matches!(err, ConsumerError::Conflict(_)));
    }

    #[tokio::test]
    async fn octet_stream_round_trips_base64() {
        let consumer = consumer();
        let mut write = Request::new(Method::Put, "/secrets/alice/blob", "c1");
        write.trail = vec!["alice".to_string(), "blob".to_string()];
        write.default_namespace = Some("alice".to_string());
        write.headers.insert("Content-Type".to_string(), "application/octet-stream".to_string());
        write.body = Some(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(consumer.handle(write).await.unwrap().code, 201);

        let mut read = Request::new(Method::Get, "/secrets/alice/blob", "c1");
        read.trail = vec!["alice".to_string(), "blob".to_string()];
        read.default_namespace = Some("alice".to_string());
        read.headers.insert("Accept".to_string(), "application/octet-stream".to_string());
        let response = consumer.handle(read).await.unwrap();
        let Output::Raw { bytes, content_type } = response.output else { panic!("expected raw") };
        assert_eq!(content_type, "application/octet-stream");
        assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[tokio::test]
    async fn list_on_missing_container_is_not_found() {
        let consumer = consumer();
        let mut request = Request::new(Method::Get, "/secrets/ghost/", "c1");
        request.trail = vec!["ghost".to_string()];
        request.default_namespace = Some("ghost".to_string());
        let err = consumer.handle(request).await.unwrap_err();
        assert!(matches!(err, ConsumerError::NotFound(_)));
    }
}
