//! KEM (Key Encapsulation Message) envelope handler.
//!
//! Provides end-to-end signed, optionally encrypted, request/response
//! exchanges between a client and this server, independent of transport
//! security. Two key pairs are registered per principal — a signing pair
//! (`use: sig`) and an encryption pair (`use: enc`) — under
//! `kemkeys/{sig,enc}/<kid>`. The server publishes its own two public keys
//! under the same scheme and keeps the private halves in the store.
//!
//! Request envelope (client -> server): a compact JWS signed by the
//! client's sig key, optionally wrapped in a compact JWE encrypted to the
//! server's enc key. Response envelope (server -> client): a compact JWS
//! signed by the server's sig key, always encrypted as a JWE to the
//! client's enc key.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use josekit::jwe::{JweHeader, RSA1_5};
use josekit::jwk::Jwk;
use josekit::jws::{JwsHeader, ES256, RS256};
use josekit::jwt::{self, JwtPayload};

use custodia_store::Store;

use crate::error::KemError;

/// Maximum distance into the future an `exp` claim may sit.
const MAX_EXP_SKEW: Duration = Duration::from_secs(600);

/// Key use, matching the two sub-trees under `kemkeys/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyUse {
    Sig,
    Enc,
}

impl KeyUse {
    fn segment(self) -> &'static str {
        match self {
            KeyUse::Sig => "sig",
            KeyUse::Enc => "enc",
        }
    }
}

/// Store-backed registry of KEM signing/encryption key pairs.
pub struct KemKeyStore {
    store: Arc<dyn Store>,
    server_kid: String,
}

impl std::fmt::Debug for KemKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemKeyStore").field("server_kid", &self.server_kid).finish_non_exhaustive()
    }
}

impl KemKeyStore {
    /// Wrap `store` as a KEM key registry; `server_kid` names this server's
    /// own key pair entries.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, server_kid: impl Into<String>) -> Self {
        Self { store, server_kid: server_kid.into() }
    }

    async fn get_key(&self, kind: KeyUse, kid: &str) -> Result<Jwk, KemError> {
        let path = format!("kemkeys/{}/{kid}", kind.segment());
        let raw = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| KemError::KeyNotFound { kind: kind.segment(), name: kid.to_string() })?;
        Jwk::from_bytes(&raw)
            .map_err(|e| KemError::Malformed(format!("stored key '{path}' is not a valid JWK: {e}")))
    }

    async fn put_key(&self, kind: KeyUse, kid: &str, jwk: &Jwk) -> Result<(), KemError> {
        let path = format!("kemkeys/{}/{kid}", kind.segment());
        self.store.set(&path, jwk.to_string().as_bytes(), true).await?;
        Ok(())
    }

    /// Register a client's public signing and/or encryption keys.
    ///
    /// # Errors
    ///
    /// Returns [`KemError::Storage`] if the backing store faults.
    pub async fn register_client_keys(
        &self,
        kid: &str,
        sig_public: Option<&Jwk>,
        enc_public: Option<&Jwk>,
    ) -> Result<(), KemError> {
        if let Some(jwk) = sig_public {
            self.put_key(KeyUse::Sig, kid, jwk).await?;
        }
        if let Some(jwk) = enc_public {
            self.put_key(KeyUse::Enc, kid, jwk).await?;
        }
        Ok(())
    }

    /// Ensure this server has its own signing and encryption key pairs,
    /// generating RSA-2048 pairs on first run. Returns the public halves so
    /// they can be published to clients out of band.
    ///
    /// # Errors
    ///
    /// Returns [`KemError::Storage`] if the backing store faults, or
    /// [`KemError::Malformed`] if key generation fails.
    pub async fn ensure_server_keys(&self) -> Result<(Jwk, Jwk), KemError> {
        let sig = match self.get_key(KeyUse::Sig, &self.server_kid).await {
            Ok(jwk) => jwk,
            Err(KemError::KeyNotFound { .. }) => {
                let jwk = Jwk::generate_rsa_key(2048)
                    .map_err(|e| KemError::Malformed(format!("generate server sig key: {e}")))?;
                self.put_key(KeyUse::Sig, &self.server_kid, &jwk).await?;
                jwk
            }
            Err(e) => return Err(e),
        };
        let enc = match self.get_key(KeyUse::Enc, &self.server_kid).await {
            Ok(jwk) => jwk,
            Err(KemError::KeyNotFound { .. }) => {
                let jwk = Jwk::generate_rsa_key(2048)
                    .map_err(|e| KemError::Malformed(format!("generate server enc key: {e}")))?;
                self.put_key(KeyUse::Enc, &self.server_kid, &jwk).await?;
                jwk
            }
            Err(e) => return Err(e),
        };
        Ok((to_public(&sig), to_public(&enc)))
    }
}

fn to_public(jwk: &Jwk) -> Jwk {
    jwk.to_public_key().unwrap_or_else(|_| jwk.clone())
}

/// The verified content of a KEM request envelope.
#[derive(Debug, Clone)]
pub struct KemClaims {
    pub client_kid: String,
    pub subject: String,
    pub value: Option<serde_json::Value>,
}

/// Parses, verifies, and builds KEM envelopes.
pub struct KemHandler {
    keys: Arc<KemKeyStore>,
}

impl KemHandler {
    #[must_use]
    pub fn new(keys: Arc<KemKeyStore>) -> Self {
        Self { keys }
    }

    /// Parse and verify a client request envelope.
    ///
    /// `envelope` may be a bare compact JWS, or a compact JWE whose
    /// plaintext is such a JWS. `expected_subject` is the key name derived
    /// from the request URL; the envelope's `sub` claim must match it.
    ///
    /// # Errors
    ///
    /// Returns [`KemError`] if the envelope is malformed, fails signature
    /// verification, names an unregistered client key, or carries claims
    /// outside the allowed window or subject.
    pub async fn parse_request(
        &self,
        envelope: &str,
        expected_subject: &str,
    ) -> Result<KemClaims, KemError> {
        let inner = match envelope.matches('.').count() {
            4 => self.unwrap_jwe(envelope).await?,
            2 => envelope.to_string(),
            _ => return Err(KemError::Malformed("not a compact JWS or JWE".to_string())),
        };

        let kid = extract_kid(&inner)?;
        let sig_key = self.keys.get_key(KeyUse::Sig, &kid).await?;
        let verifier = select_jws_verifier(&sig_key)?;

        let (payload, _header) = jwt::decode_with_verifier(&inner, verifier.as_ref())
            .map_err(|e| KemError::VerificationFailed(e.to_string()))?;

        let subject = payload
            .subject()
            .ok_or_else(|| KemError::Malformed("missing 'sub' claim".to_string()))?
            .to_string();
        if subject != expected_subject {
            return Err(KemError::SubjectMismatch { claimed: subject, expected: expected_subject.to_string() });
        }

        let exp = payload
            .expires_at()
            .ok_or_else(|| KemError::Malformed("missing 'exp' claim".to_string()))?;
        let now = SystemTime::now();
        if exp < now || exp > now + MAX_EXP_SKEW {
            return Err(KemError::ExpiredOrTooFar);
        }

        let value = payload.claim("value").cloned();

        Ok(KemClaims { client_kid: kid, subject, value })
    }

    /// Build a server reply envelope: sign with this server's sig key, then
    /// encrypt to the client's enc key.
    ///
    /// # Errors
    ///
    /// Returns [`KemError`] if the client's enc key is unregistered or
    /// unsupported, or if signing/encryption fails.
    pub async fn build_reply(
        &self,
        server_kid: &str,
        client_kid: &str,
        subject: &str,
        value: &serde_json::Value,
    ) -> Result<String, KemError> {
        let sig_key = self.keys.get_key(KeyUse::Sig, server_kid).await?;
        let signer = select_jws_signer(&sig_key)?;

        let mut header = JwsHeader::new();
        header.set_token_type("JOSE");
        header.set_key_id(server_kid);

        let mut payload = JwtPayload::new();
        payload.set_subject(subject);
        payload.set_expires_at(&(SystemTime::now() + MAX_EXP_SKEW));
        payload
            .set_claim("value", Some(value.clone()))
            .map_err(|e| KemError::Malformed(e.to_string()))?;

        let signed = jwt::encode_with_signer(&payload, &header, signer.as_ref())
            .map_err(|e| KemError::VerificationFailed(e.to_string()))?;

        let enc_key = self.keys.get_key(KeyUse::Enc, client_kid).await?;
        if enc_key.key_type() != "RSA" {
            return Err(KemError::UnsupportedAlgorithm {
                kind: "enc",
                alg: enc_key.key_type().to_string(),
            });
        }

        let mut jwe_header = JweHeader::new();
        jwe_header.set_content_encryption("A256CBC-HS512");
        jwe_header.set_key_id(client_kid);
        let encrypter = RSA1_5
            .encrypter_from_jwk(&enc_key)
            .map_err(|e| KemError::VerificationFailed(e.to_string()))?;

        josekit::jwe::serialize_compact(signed.as_bytes(), &jwe_header, &encrypter)
            .map_err(|e| KemError::VerificationFailed(e.to_string()))
    }

    async fn unwrap_jwe(&self, envelope: &str) -> Result<String, KemError> {
        let kid = extract_kid(envelope)?;
        let enc_key = self.keys.get_key(KeyUse::Enc, &kid).await?;
        let decrypter = RSA1_5
            .decrypter_from_jwk(&enc_key)
            .map_err(|e| KemError::VerificationFailed(e.to_string()))?;
        let (plaintext, _header) = josekit::jwe::deserialize_compact(envelope, &decrypter)
            .map_err(|e| KemError::VerificationFailed(e.to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|e| KemError::Malformed(format!("decrypted payload is not UTF-8: {e}")))
    }
}

/// Pull the `kid` header field out of a compact JOSE string without
/// verifying the signature, so the right key can be looked up first.
fn extract_kid(compact: &str) -> Result<String, KemError> {
    let header_segment = compact
        .split('.')
        .next()
        .ok_or_else(|| KemError::Malformed("empty envelope".to_string()))?;
    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|e| KemError::Malformed(format!("invalid header encoding: {e}")))?;
    let header: serde_json::Value = serde_json::from_slice(&header_bytes)
        .map_err(|e| KemError::Malformed(format!("invalid header JSON: {e}")))?;
    header
        .get("kid")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| KemError::Malformed("missing 'kid' header".to_string()))
}

fn select_jws_verifier(jwk: &Jwk) -> Result<Box<dyn josekit::jws::JwsVerifier>, KemError> {
    match jwk.key_type() {
        "RSA" => RS256
            .verifier_from_jwk(jwk)
            .map(|v| Box::new(v) as Box<dyn josekit::jws::JwsVerifier>)
            .map_err(|e| KemError::VerificationFailed(e.to_string())),
        "EC" => ES256
            .verifier_from_jwk(jwk)
            .map(|v| Box::new(v) as Box<dyn josekit::jws::JwsVerifier>)
            .map_err(|e| KemError::VerificationFailed(e.to_string())),
        other => Err(KemError::UnsupportedAlgorithm { kind: "sig", alg: other.to_string() }),
    }
}

fn select_jws_signer(jwk: &Jwk) -> Result<Box<dyn josekit::jws::JwsSigner>, KemError> {
    match jwk.key_type() {
        "RSA" => RS256
            .signer_from_jwk(jwk)
            .map(|s| Box::new(s) as Box<dyn josekit::jws::JwsSigner>)
            .map_err(|e| KemError::VerificationFailed(e.to_string())),
        "EC" => ES256
            .signer_from_jwk(jwk)
            .map(|s| Box::new(s) as Box<dyn josekit::jws::JwsSigner>)
            .map_err(|e| KemError::VerificationFailed(e.to_string())),
        other => Err(KemError::UnsupportedAlgorithm { kind: "sig", alg: other.to_string() }),
    }
}
