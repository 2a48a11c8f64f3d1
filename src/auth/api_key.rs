// API key generation, hashing and format validation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// Fixed identifying prefix of every issued key
pub const KEY_PREFIX: &str = "sk_";

/// Random bytes behind each key
pub const SECRET_BYTES: usize = 32;

/// Length of the URL-safe base64 body (32 bytes, no padding)
pub const SECRET_BODY_LEN: usize = 43;

/// Total plaintext key length
pub const KEY_LEN: usize = KEY_PREFIX.len() + SECRET_BODY_LEN;

/// Length of the non-secret lookup prefix stored alongside the hash
pub const LOOKUP_PREFIX_LEN: usize = KEY_PREFIX.len() + 9;

/// API key hash - SHA-256 hash of API key (64-character hex string)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiKeyHash(String);

impl ApiKeyHash {
    /// Create an ApiKeyHash from a plaintext API key
    ///
    /// The hash is deterministic: same API key always produces same hash.
    pub fn from_api_key(api_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        let hash_bytes = hasher.finalize();
        Self(hex::encode(hash_bytes))
    }

    /// Get the hash as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a stored hex digest
    pub fn matches(&self, stored: &str) -> bool {
        self.0.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

/// API key wrapper with memory protection
///
/// Uses `secrecy::Secret` to prevent accidental logging of key material.
pub struct ApiKey(Secret<String>);

impl ApiKey {
    /// Wrap a presented key
    pub fn new(api_key: &str) -> Self {
        Self(Secret::new(api_key.to_string()))
    }

    /// Generate a fresh key: fixed prefix plus 32 bytes from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(Secret::new(format!("{}{}", KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))))
    }

    /// Cheap structural check performed before any hashing or lookup
    pub fn has_valid_format(&self) -> bool {
        has_valid_format(self.expose_secret())
    }

    /// Non-secret lookup prefix, available only for well-formed keys
    pub fn lookup_prefix(&self) -> Option<&str> {
        let key = self.expose_secret();
        if has_valid_format(key) {
            Some(&key[..LOOKUP_PREFIX_LEN])
        } else {
            None
        }
    }

    /// Hash the API key to produce an ApiKeyHash
    pub fn hash(&self) -> ApiKeyHash {
        ApiKeyHash::from_api_key(self.expose_secret())
    }

    /// Expose the secret API key (use with caution)
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Whether `candidate` has the shape of an issued key
pub fn has_valid_format(candidate: &str) -> bool {
    candidate.len() == KEY_LEN
        && candidate.starts_with(KEY_PREFIX)
        && candidate[KEY_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("key", &"<REDACTED>")
            .finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<REDACTED>")
    }
}
