//! Key hashing and payload encryption on top of any [`CacheStorage`].
//!
//! Keys are always replaced by their SHA-256 digest. With a secret
//! configured, values are sealed with AES-256-GCM; the stored record is
//! `nonce || ciphertext || tag` and the hashed key is bound as associated
//! data, so a record moved under another key no longer opens.
//!
//! Reads that fail authentication come back as `Ok(None)`: callers see a
//! miss, never unauthenticated bytes.
use std::fmt;
use std::num::NonZeroU32;

use async_trait::async_trait;
use ring::aead::{
    AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey,
};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{CacheStorage, StorageError};

const DEFAULT_SALT: &str = "hcache/secure-storage/v1";
const DEFAULT_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// Hex encoded SHA-256 of the key, 64 chars.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Secret material for payload encryption.
///
/// The salt must be identical for every process sharing a backend,
/// otherwise they derive different keys and see each other's records as
/// corrupted.
#[derive(Clone)]
pub struct SecretConfig {
    pub secret: String,
    pub salt: String,
    pub iterations: u32,
}

impl SecretConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            salt: DEFAULT_SALT.to_string(),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }
}

impl fmt::Debug for SecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretConfig")
            .field("secret", &"<redacted>")
            .field("salt", &self.salt)
            .field("iterations", &self.iterations)
            .finish()
    }
}

struct Sealer {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Sealer {
    fn derive(config: &SecretConfig) -> Result<Self, StorageError> {
        if config.secret.is_empty() {
            return Err(StorageError::Config(
                "encryption requested with an empty secret".to_string(),
            ));
        }
        let iterations = NonZeroU32::new(config.iterations).ok_or_else(|| {
            StorageError::Config("key derivation iterations must be > 0".into())
        })?;

        let mut key_bytes = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            config.salt.as_bytes(),
            config.secret.as_bytes(),
            &mut key_bytes,
        );
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| StorageError::Crypto("invalid key length".into()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    fn seal(&self, aad: &str, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| StorageError::Crypto("nonce generation failed".into()))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| StorageError::Crypto("seal failed".into()))?;

        let mut record = Vec::with_capacity(NONCE_LEN + in_out.len());
        record.extend_from_slice(&nonce_bytes);
        record.extend_from_slice(&in_out);
        Ok(record)
    }

    /// `None` when the record is truncated or fails authentication.
    fn open(&self, aad: &str, record: &[u8]) -> Option<Vec<u8>> {
        if record.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce_bytes, sealed) = record.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).ok()?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(aad.as_bytes()), &mut in_out)
            .ok()?;
        Some(plaintext.to_vec())
    }
}

/// Storage decorator that hides keys and, optionally, values.
pub struct SecureStorage<S> {
    inner: S,
    sealer: Option<Sealer>,
}

impl<S> SecureStorage<S>
where
    S: CacheStorage,
{
    /// Keys are hashed, values pass through untouched.
    pub fn hashing_only(inner: S) -> Self {
        Self {
            inner,
            sealer: None,
        }
    }

    /// Keys are hashed and values sealed with a key derived from `config`.
    /// Fails on an empty secret instead of silently storing plaintext.
    pub fn encrypted(inner: S, config: &SecretConfig) -> Result<Self, StorageError> {
        Ok(Self {
            inner,
            sealer: Some(Sealer::derive(config)?),
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.sealer.is_some()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S> CacheStorage for SecureStorage<S>
where
    S: CacheStorage,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let hashed = hash_key(key);
        let Some(record) = self.inner.get(&hashed).await? else {
            return Ok(None);
        };

        match &self.sealer {
            None => Ok(Some(record)),
            Some(sealer) => {
                let opened = sealer.open(&hashed, &record);
                if opened.is_none() {
                    warn!(key = %hashed, "Stored record failed authentication");
                }
                Ok(opened)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let hashed = hash_key(key);
        match &self.sealer {
            None => self.inner.set(&hashed, value).await,
            Some(sealer) => {
                let record = sealer.seal(&hashed, value)?;
                self.inner.set(&hashed, &record).await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(&hash_key(key)).await
    }
}

impl<S> fmt::Debug for SecureStorage<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureStorage")
            .field("inner", &self.inner)
            .field("encrypted", &self.sealer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStorage;
    use std::sync::Arc;

    fn fast_secret(secret: &str) -> SecretConfig {
        SecretConfig::new(secret).with_iterations(1_000)
    }

    #[test]
    fn test_hash_key_format() {
        let hash = hash_key("https://example.com/");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_key("https://example.com/"));
        assert_ne!(hash, hash_key("https://example.com/other"));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let sealer = Sealer::derive(&fast_secret("s3cret")).unwrap();
        let values: [&[u8]; 3] = [b"", b"x", b"longer payload \x00\xff"];
        for value in values {
            let record = sealer.seal("aad", value).unwrap();
            assert_eq!(record.len(), NONCE_LEN + value.len() + TAG_LEN);
            assert_eq!(sealer.open("aad", &record).unwrap(), value);
        }
    }

    #[test]
    fn test_nonce_unique_per_write() {
        let sealer = Sealer::derive(&fast_secret("s3cret")).unwrap();
        let first = sealer.seal("aad", b"same").unwrap();
        let second = sealer.seal("aad", b"same").unwrap();
        assert_ne!(first[..NONCE_LEN], second[..NONCE_LEN]);
        assert_ne!(first, second);
    }

    #[test]
    fn test_empty_secret_rejected() {
        let result =
            SecureStorage::encrypted(InMemoryStorage::new(), &SecretConfig::new(""));
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let config = SecretConfig::new("s3cret").with_iterations(0);
        let result = SecureStorage::encrypted(InMemoryStorage::new(), &config);
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", SecretConfig::new("hunter2"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_hashing_only_mode() {
        let backend = Arc::new(InMemoryStorage::new());
        let storage = SecureStorage::hashing_only(backend.clone());
        let key = "https://example.com/page";

        storage.set(key, b"plain body").await.unwrap();

        let stored_keys = backend.keys();
        assert_eq!(stored_keys, vec![hash_key(key)]);
        assert_ne!(stored_keys[0], key);
        assert_eq!(
            backend.get(&hash_key(key)).await.unwrap().unwrap(),
            b"plain body"
        );
        assert_eq!(storage.get(key).await.unwrap().unwrap(), b"plain body");
    }

    #[tokio::test]
    async fn test_encrypted_mode() {
        let backend = Arc::new(InMemoryStorage::new());
        let storage =
            SecureStorage::encrypted(backend.clone(), &fast_secret("s3cret"))
                .unwrap();
        let key = "https://example.com/page";

        storage.set(key, b"plain body").await.unwrap();

        let raw = backend.get(&hash_key(key)).await.unwrap().unwrap();
        assert_ne!(raw, b"plain body");
        assert_eq!(storage.get(key).await.unwrap().unwrap(), b"plain body");

        let wrong = SecureStorage::encrypted(backend.clone(), &fast_secret("other"))
            .unwrap();
        assert!(wrong.get(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tampered_record_reads_as_missing() {
        let backend = Arc::new(InMemoryStorage::new());
        let storage =
            SecureStorage::encrypted(backend.clone(), &fast_secret("s3cret"))
                .unwrap();
        let key = "https://example.com/page";
        storage.set(key, b"payload").await.unwrap();

        let raw = backend.get(&hash_key(key)).await.unwrap().unwrap();
        for index in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[index] ^= 0x01;
            backend.set(&hash_key(key), &tampered).await.unwrap();
            assert!(storage.get(key).await.unwrap().is_none(), "byte {index}");
        }

        backend.set(&hash_key(key), &raw[..NONCE_LEN]).await.unwrap();
        assert!(storage.get(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_bound_to_its_key() {
        let backend = Arc::new(InMemoryStorage::new());
        let storage =
            SecureStorage::encrypted(backend.clone(), &fast_secret("s3cret"))
                .unwrap();
        storage.set("a", b"for a").await.unwrap();

        let raw = backend.get(&hash_key("a")).await.unwrap().unwrap();
        backend.set(&hash_key("b"), &raw).await.unwrap();
        assert!(storage.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_uses_hashed_key() {
        let backend = Arc::new(InMemoryStorage::new());
        let storage = SecureStorage::hashing_only(backend.clone());
        storage.set("k", b"v").await.unwrap();
        storage.delete("k").await.unwrap();
        assert!(backend.is_empty());
    }
}
