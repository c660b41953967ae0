//! Encrypted overlay store.
//!
//! Wraps any [`Store`] so that every value written to it is sealed in a
//! compact JWE (`alg: dir`, symmetric content-encryption) before it reaches
//! the backing store, and transparently opened again on read. Keys (paths)
//! are never encrypted — only values — so prefix listing keeps working
//! without a separate index.
//!
//! When sealed (no master key loaded), every read/write is rejected; this
//! mirrors the barrier-style "sealed vault" invariant this crate's teacher
//! uses for its own at-rest encryption layer, generalized here to wrap an
//! arbitrary backing [`Store`] rather than every storage call a vault makes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use josekit::jwe::{JweHeader, Dir as DIRECT};
use josekit::jwk::Jwk;
use zeroize::Zeroize;

use custodia_store::{Store, StoreError};

use crate::error::OverlayError;

/// Content-encryption algorithm for the overlay's JWE envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncryption {
    A128CbcHs256,
    A256CbcHs512,
}

impl ContentEncryption {
    fn enc_name(self) -> &'static str {
        match self {
            ContentEncryption::A128CbcHs256 => "A128CBC-HS256",
            ContentEncryption::A256CbcHs512 => "A256CBC-HS512",
        }
    }

    fn key_bytes(self) -> u8 {
        match self {
            ContentEncryption::A128CbcHs256 => 32, // 16-byte MAC key + 16-byte enc key
            ContentEncryption::A256CbcHs512 => 64,
        }
    }
}

/// Configuration for [`EncryptedOverlayStore::open`].
pub struct OverlayConfig {
    pub master_key_path: PathBuf,
    pub autogen_master_key: bool,
    pub enc: ContentEncryption,
}

/// A [`Store`] decorator providing transparent authenticated encryption.
pub struct EncryptedOverlayStore<S: Store> {
    backing: Arc<S>,
    key: Jwk,
    enc: ContentEncryption,
}

impl<S: Store> std::fmt::Debug for EncryptedOverlayStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedOverlayStore").field("enc", &self.enc).finish_non_exhaustive()
    }
}

impl<S: Store> EncryptedOverlayStore<S> {
    /// Load (or, if configured, generate) the master key and wrap `backing`.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::MissingMasterKey`] if the key file is absent
    /// and autogeneration is disabled, or [`OverlayError::MasterKey`] if the
    /// file exists but cannot be read or parsed.
    pub fn open(backing: Arc<S>, cfg: OverlayConfig) -> Result<Self, OverlayError> {
        let key = load_or_generate_key(&cfg.master_key_path, cfg.autogen_master_key, cfg.enc)?;
        Ok(Self { backing, key, enc: cfg.enc })
    }

    fn encrypt(&self, key: &str, value: &[u8]) -> Result<Vec<u8>, OverlayError> {
        let mut header = JweHeader::new();
        header.set_content_encryption(self.enc.enc_name());
        let encrypter =
            DIRECT.encrypter_from_jwk(&self.key).map_err(|e| OverlayError::Encryption {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        let compact = josekit::jwe::serialize_compact(value, &header, &encrypter).map_err(|e| {
            OverlayError::Encryption { key: key.to_string(), reason: e.to_string() }
        })?;
        Ok(compact.into_bytes())
    }

    fn decrypt(&self, key: &str, ciphertext: &[u8]) -> Result<Vec<u8>, OverlayError> {
        let text = std::str::from_utf8(ciphertext).map_err(|e| OverlayError::Decryption {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let decrypter =
            DIRECT.decrypter_from_jwk(&self.key).map_err(|e| OverlayError::Decryption {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        let (plaintext, _header) =
            josekit::jwe::deserialize_compact(text, &decrypter).map_err(|e| {
                OverlayError::Decryption { key: key.to_string(), reason: e.to_string() }
            })?;
        Ok(plaintext)
    }
}

#[async_trait::async_trait]
impl<S: Store> Store for EncryptedOverlayStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.backing.get(key).await? {
            None => Ok(None),
            Some(ciphertext) => {
                let plaintext = self
                    .decrypt(key, &ciphertext)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Some(plaintext))
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], replace: bool) -> Result<(), StoreError> {
        let ciphertext =
            self.encrypt(key, value).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.backing.set(key, &ciphertext, replace).await
    }

    async fn cut(&self, key: &str) -> Result<bool, StoreError> {
        self.backing.cut(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Option<Vec<String>>, StoreError> {
        self.backing.list(prefix).await
    }

    async fn span(&self, key: &str) -> Result<(), StoreError> {
        self.backing.span(key).await
    }
}

fn load_or_generate_key(
    path: &Path,
    autogen: bool,
    enc: ContentEncryption,
) -> Result<Jwk, OverlayError> {
    if path.exists() {
        let mut raw = std::fs::read_to_string(path)
            .map_err(|e| OverlayError::MasterKey(format!("read {}: {e}", path.display())))?;
        let parsed = Jwk::from_bytes(raw.as_bytes())
            .map_err(|e| OverlayError::MasterKey(format!("parse {}: {e}", path.display())));
        raw.zeroize();
        return parsed;
    }

    if !autogen {
        return Err(OverlayError::MissingMasterKey { path: path.display().to_string() });
    }

    let key = Jwk::generate_oct_key(enc.key_bytes())
        .map_err(|e| OverlayError::MasterKey(format!("generate key: {e}")))?;
    let mut serialized = key.to_string();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OverlayError::MasterKey(format!("create {}: {e}", parent.display())))?;
    }
    let write_result = std::fs::write(path, &serialized);
    serialized.zeroize();
    write_result.map_err(|e| OverlayError::MasterKey(format!("write {}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            let mut perms = meta.permissions();
            perms.set_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }
    }

    Ok(key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use custodia_store::MemoryStore;

    fn overlay(dir: &Path) -> EncryptedOverlayStore<MemoryStore> {
        let backing = Arc::new(MemoryStore::new());
        EncryptedOverlayStore::open(
            backing,
            OverlayConfig {
                master_key_path: dir.join("master.jwk"),
                autogen_master_key: true,
                enc: ContentEncryption::A256CbcHs512,
            },
        )
        .unwrap()
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("custodia-overlay-test-{:?}", std::thread::current().id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn round_trips_through_encryption() {
        let dir = temp_dir();
        let store = overlay(&dir);
        store.set("keys/alice/k1", b"top secret", false).await.unwrap();
        let got = store.get("keys/alice/k1").await.unwrap();
        assert_eq!(got, Some(b"top secret".to_vec()));
    }

    #[tokio::test]
    async fn backing_store_never_sees_plaintext() {
        let dir = temp_dir();
        let backing = Arc::new(MemoryStore::new());
        let store = EncryptedOverlayStore::open(
            Arc::clone(&backing),
            OverlayConfig {
                master_key_path: dir.join("master2.jwk"),
                autogen_master_key: true,
                enc: ContentEncryption::A128CbcHs256,
            },
        )
        .unwrap();

        store.set("k", b"plaintext-value", false).await.unwrap();
        let raw = backing.get("k").await.unwrap().unwrap();
        assert_ne!(raw, b"plaintext-value".to_vec());
        assert!(std::str::from_utf8(&raw).unwrap().split('.').count() == 5);
    }

    #[tokio::test]
    async fn reload_with_persisted_key_can_decrypt() {
        let dir = temp_dir();
        let key_path = dir.join("persist.jwk");
        let backing = Arc::new(MemoryStore::new());

        let store1 = EncryptedOverlayStore::open(
            Arc::clone(&backing),
            OverlayConfig {
                master_key_path: key_path.clone(),
                autogen_master_key: true,
                enc: ContentEncryption::A256CbcHs512,
            },
        )
        .unwrap();
        store1.set("k", b"persisted", false).await.unwrap();

        let store2 = EncryptedOverlayStore::open(
            backing,
            OverlayConfig {
                master_key_path: key_path,
                autogen_master_key: false,
                enc: ContentEncryption::A256CbcHs512,
            },
        )
        .unwrap();
        assert_eq!(store2.get("k").await.unwrap(), Some(b"persisted".to_vec()));
    }

    #[test]
    fn missing_key_without_autogen_is_fatal() {
        let dir = temp_dir();
        let backing = Arc::new(MemoryStore::new());
        let err = EncryptedOverlayStore::open(
            backing,
            OverlayConfig {
                master_key_path: dir.join("absent.jwk"),
                autogen_master_key: false,
                enc: ContentEncryption::A256CbcHs512,
            },
        )
        .unwrap_err();
        assert!(matches!(err, OverlayError::MissingMasterKey { .. }));
    }
}
