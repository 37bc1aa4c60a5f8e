//! Shared-Key Frame Authentication
//!
//! When a server and its clients share a secret key, every frame carries a
//! tag computed over its payload:
//!
//! - HMAC-SHA256 keyed with the shared secret
//! - Base64 encoded (standard alphabet, padded) to exactly [`TAG_LEN`] bytes
//! - Appended to the frame after the payload
//!
//! Verification decodes the received text and compares MACs in constant
//! time. A tag that is not valid base64, has the wrong length, or carries the
//! wrong MAC all produce the same [`AuthError::TagMismatch`].
//!
//! # Key Files
//!
//! Keys are usually provisioned as files. The file holds the key text; leading
//! and trailing whitespace is ignored. [`AuthKey::write_to_file`] creates the
//! file with mode 0600.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Length of the text-encoded tag on the wire
pub const TAG_LEN: usize = 44;

/// Bytes of randomness in a generated key
const GENERATED_KEY_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Errors related to authentication keys and tags
#[derive(Debug, Error)]
pub enum AuthError {
    /// Key material was empty
    #[error("authentication key is empty")]
    EmptyKey,

    /// Key material was rejected by the MAC
    #[error("authentication key rejected: {0}")]
    InvalidKey(String),

    /// Key file could not be read or written
    #[error("key file {path}: {source}")]
    KeyFile {
        /// Path of the key file
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Tag did not verify
    #[error("authentication tag mismatch")]
    TagMismatch,
}

/// Shared secret used to tag frame payloads
#[derive(Clone)]
pub struct AuthKey {
    secret: Vec<u8>,
    mac: HmacSha256,
}

impl AuthKey {
    /// Create a key from raw secret bytes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EmptyKey`] if `secret` is empty.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AuthError::EmptyKey);
        }
        let mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        Ok(Self { secret, mac })
    }

    /// Generate a random key (32 random bytes, base64 text)
    ///
    /// # Errors
    ///
    /// Propagates [`AuthKey::new`] failures.
    pub fn generate() -> Result<Self, AuthError> {
        let mut bytes = [0u8; GENERATED_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(STANDARD.encode(bytes).into_bytes())
    }

    /// Read a key from a file, trimming surrounding whitespace
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or holds no key.
    pub fn read_from_file(path: &Path) -> Result<Self, AuthError> {
        let contents = fs::read(path).map_err(|source| AuthError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(contents.trim_ascii().to_vec())
    }

    /// Write the key to a file readable only by its owner
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_to_file(&self, path: &Path) -> Result<(), AuthError> {
        let key_file_err = |source| AuthError::KeyFile {
            path: path.display().to_string(),
            source,
        };

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(key_file_err)?;
        file.write_all(&self.secret).map_err(key_file_err)?;
        file.write_all(b"\n").map_err(key_file_err)?;

        tracing::debug!(path = %path.display(), "Authentication key written");
        Ok(())
    }

    /// Compute the text tag for a payload
    #[must_use]
    pub fn tag(&self, payload: &[u8]) -> [u8; TAG_LEN] {
        let mut mac = self.mac.clone();
        mac.update(payload);
        let digest = mac.finalize().into_bytes();

        let mut out = [0u8; TAG_LEN];
        // 32 digest bytes always encode to exactly 44 characters
        let written = STANDARD
            .encode_slice(digest, &mut out)
            .unwrap_or_default();
        debug_assert_eq!(written, TAG_LEN);
        out
    }

    /// Verify a received tag against a payload
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TagMismatch`] for any malformed or wrong tag.
    pub fn verify(&self, payload: &[u8], tag: &[u8]) -> Result<(), AuthError> {
        let received = STANDARD.decode(tag).unwrap_or_default();
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&received)
            .map_err(|_| AuthError::TagMismatch)
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthKey([REDACTED])")
    }
}
