//! Error types for `custodia-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material — only key
//! identifiers or operation descriptions.

use custodia_store::StoreError;

/// Errors from the encrypted overlay store.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// The backing store returned an error.
    #[error("overlay storage error: {0}")]
    Storage(#[from] StoreError),

    /// A stored value did not parse as a compact JWE, or failed to decrypt
    /// (wrong key, corrupted ciphertext, tampered tag).
    #[error("overlay decryption failed for '{key}': {reason}")]
    Decryption { key: String, reason: String },

    /// Encrypting a value for storage failed.
    #[error("overlay encryption failed for '{key}': {reason}")]
    Encryption { key: String, reason: String },

    /// The master key file was absent and autogeneration is disabled.
    #[error("overlay master key '{path}' not found and autogen is disabled")]
    MissingMasterKey { path: String },

    /// The master key file could not be read, written, or parsed.
    #[error("overlay master key error: {0}")]
    MasterKey(String),
}

/// Errors from plugin construction and typed option binding.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A required option was not present in the plugin's configuration.
    #[error("missing required option '{name}'")]
    MissingOption { name: String },

    /// An option's value could not be parsed as its declared type.
    #[error("option '{name}' = '{value}' is not a valid {expected}")]
    InvalidOption {
        name: String,
        value: String,
        expected: &'static str,
    },

    /// A section carried an option the plugin does not recognize.
    #[error("unknown option '{name}' in plugin configuration")]
    UnknownOption { name: String },

    /// A `store` reference named a store instance that does not exist.
    #[error("unknown store reference '{name}'")]
    UnknownStore { name: String },
}

/// Errors raised while validating a type-tagged message envelope.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The envelope was structurally malformed (missing `type`/`value`, or
    /// not an object at all).
    #[error("invalid message: {0}")]
    Invalid(String),

    /// The envelope named a `type` the validator has never heard of.
    #[error("message type '{0}' is unknown")]
    UnknownType(String),

    /// The envelope named a `type` the validator knows but this deployment
    /// does not allow.
    #[error("message type '{0}' is not allowed")]
    UnallowedType(String),
}

/// Errors from the KEM envelope handler.
#[derive(Debug, thiserror::Error)]
pub enum KemError {
    /// The presented envelope was not a well-formed JWS/JWE.
    #[error("malformed KEM envelope: {0}")]
    Malformed(String),

    /// Signature verification or decryption failed.
    #[error("KEM verification failed: {0}")]
    VerificationFailed(String),

    /// The envelope's `sub` claim did not match the requested key name.
    #[error("KEM claim 'sub' ({claimed}) does not match requested key '{expected}'")]
    SubjectMismatch { claimed: String, expected: String },

    /// The envelope's `exp` claim was in the past, or too far in the future.
    #[error("KEM claim 'exp' is not within the allowed window")]
    ExpiredOrTooFar,

    /// No public/private key pair of the requested kind was registered for
    /// the given principal.
    #[error("no {kind} key registered for '{name}'")]
    KeyNotFound { kind: &'static str, name: String },

    /// The registered key's algorithm is not supported for this operation.
    #[error("unsupported key algorithm for {kind}: {alg}")]
    UnsupportedAlgorithm { kind: &'static str, alg: String },

    /// The underlying store faulted while reading or writing key material.
    #[error("KEM key store error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from the authentication/authorization pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No authenticator produced a positive result, or one explicitly denied.
    #[error("authentication failed")]
    Denied,

    /// An authorizer explicitly denied the request.
    #[error("authorization denied: {0}")]
    Forbidden(String),

    /// A plugin faulted while evaluating the request.
    #[error("auth plugin error: {0}")]
    Plugin(String),

    /// The backing store faulted while looking up credentials or keys.
    #[error("auth store error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from the secrets consumer's REST semantics.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The method/path combination has no defined handler (maps to 405).
    #[error("unsupported method/path combination")]
    MethodNotAllowed,

    /// The request body was missing, malformed, or used an unsupported
    /// content type (maps to 400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request crossed into a namespace it is not authorized for, or no
    /// namespace is established (maps to 403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The target key, or a required ancestor container, does not exist
    /// (maps to 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// A create targeted an existing key, or a delete targeted a non-empty
    /// container (maps to 409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested message type is unknown or not allowed (maps to 406).
    #[error(transparent)]
    Message(#[from] MessageError),

    /// The KEM envelope failed to parse or verify (maps to 400).
    #[error(transparent)]
    Kem(#[from] KemError),

    /// The backing store (or overlay) faulted (maps to 500).
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for ConsumerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Exists => ConsumerError::Conflict("key already exists".to_string()),
            other => ConsumerError::Store(other.to_string()),
        }
    }
}

impl From<OverlayError> for ConsumerError {
    fn from(e: OverlayError) -> Self {
        match e {
            OverlayError::Storage(inner) => inner.into(),
            other => ConsumerError::Store(other.to_string()),
        }
    }
}
