//! Actor keys
//!
//! TigerStyle: Explicit validation on construction, immutable after creation.

use crate::constants::{ACTOR_KEY_LENGTH_BYTES, ACTOR_VECTOR_KEY_LENGTH_BYTES_MAX};
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Deterministic identity of a virtual actor
///
/// An `ActorKey` pairs the caller-supplied vector key (a certificate
/// thumbprint, a principal id, ...) with a fixed-width 128-bit key derived
/// from it. The derived key is the first 16 bytes of SHA-256 over the
/// lower-cased vector key, so vector keys differing only in case address
/// the same actor.
///
/// Equality, ordering and hashing use the derived key only.
#[derive(Debug, Clone)]
pub struct ActorKey {
    vector_key: String,
    key: u128,
}

impl ActorKey {
    /// Derive a key from a vector key
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the vector key is empty, whitespace-only,
    /// or longer than `ACTOR_VECTOR_KEY_LENGTH_BYTES_MAX`.
    pub fn new(vector_key: impl Into<String>) -> Result<Self> {
        let vector_key = vector_key.into();

        if vector_key.trim().is_empty() {
            return Err(Error::invalid_argument(
                "vector_key",
                "must not be empty or whitespace",
            ));
        }

        if vector_key.len() > ACTOR_VECTOR_KEY_LENGTH_BYTES_MAX {
            return Err(Error::invalid_argument(
                "vector_key",
                format!(
                    "length {} exceeds limit {}",
                    vector_key.len(),
                    ACTOR_VECTOR_KEY_LENGTH_BYTES_MAX
                ),
            ));
        }

        let key = derive_key(&vector_key);
        Ok(Self { vector_key, key })
    }

    /// The original vector key, as supplied
    pub fn vector_key(&self) -> &str {
        &self.vector_key
    }

    /// The derived 128-bit key
    pub fn key(&self) -> u128 {
        self.key
    }

    /// The derived key as 32 lowercase hex characters
    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.key)
    }
}

fn derive_key(vector_key: &str) -> u128 {
    let digest = Sha256::digest(vector_key.to_lowercase().as_bytes());

    let mut bytes = [0u8; ACTOR_KEY_LENGTH_BYTES];
    bytes.copy_from_slice(&digest[..ACTOR_KEY_LENGTH_BYTES]);
    u128::from_be_bytes(bytes)
}

impl PartialEq for ActorKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ActorKey {}

impl Hash for ActorKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for ActorKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActorKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.vector_key)
    }
}
