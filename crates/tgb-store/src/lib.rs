// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Durable keyed artifact store for prepared benchmark data.
//!
//! `tgb-store` provides an [`ArtifactStore`] trait for publishing and loading
//! opaque payloads under a logical key (for example `wiki_val_ns`). Two tiers
//! ship: [`MemoryStore`] for tests and in-process pipelines, and [`FsStore`]
//! which persists one file per key.
//!
//! # Envelope
//!
//! Every payload is sealed before it is stored:
//!
//! ``MAGIC(4) || VERSION(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * `LENGTH` is the big-endian payload length.
//! * `CHECKSUM` is BLAKE3 over the 10 header bytes followed by the payload.
//!
//! Loading verifies the envelope and returns only the payload. A truncated or
//! tampered artifact is reported as [`StoreError::Corrupt`] or
//! [`StoreError::ChecksumMismatch`], never returned to the caller.
//!
//! # Visibility
//!
//! A published key is either absent or complete. [`FsStore`] writes to a
//! hidden temporary file in the same directory and renames it into place, so
//! an interrupted publish leaves no readable artifact behind.
#![forbid(unsafe_code)]

mod fs;
mod memory;

pub use fs::{write_atomic, FsStore, EXTENSION};
pub use memory::MemoryStore;

use std::path::PathBuf;

/// Envelope magic "TGBA".
pub const MAGIC: [u8; 4] = *b"TGBA";
/// Envelope format version (big-endian on the wire).
pub const VERSION: u16 = 0x0001;
/// Bytes preceding the payload.
pub const HEADER_LEN: usize = 10;
/// Bytes following the payload.
pub const CHECKSUM_LEN: usize = 32;

/// A 32-byte BLAKE3 digest identifying a sealed artifact.
///
/// `Display` renders lowercase hex for logging and error messages.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ArtifactHash(pub [u8; 32]);

impl ArtifactHash {
    /// View the digest as a byte array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ArtifactHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors raised by artifact stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Key contains characters outside `[A-Za-z0-9_.-]` or is empty.
    #[error("[STORE_INVALID_KEY] {0:?}")]
    InvalidKey(String),
    /// Envelope framing is malformed (bad magic, version or length).
    #[error("[CORRUPT_ARTIFACT] {key}: {reason}")]
    Corrupt {
        /// Artifact key.
        key: String,
        /// What was wrong with the framing.
        reason: &'static str,
    },
    /// Envelope checksum does not match its contents.
    #[error("[CORRUPT_ARTIFACT] {key}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// Artifact key.
        key: String,
        /// Checksum recorded in the envelope.
        expected: ArtifactHash,
        /// Checksum computed from the stored bytes.
        computed: ArtifactHash,
    },
    /// Filesystem failure.
    #[error("[IO] {}: {source}", .path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A writer panicked while holding a store lock.
    #[error("[STORE_LOCK_POISONED] {0}")]
    Poisoned(&'static str),
}

/// Keyed store for sealed artifacts.
///
/// All methods take `&self`; implementations serialize writers per key and
/// allow concurrent readers.
///
/// # Absence Semantics
///
/// [`load`](ArtifactStore::load) returns `Ok(None)` for a missing key. Absence
/// is expected (not yet built, invalidated); error variants are reserved for
/// IO failures and integrity violations.
pub trait ArtifactStore: Send + Sync {
    /// Load and verify the payload stored under `key`.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Seal `payload` and make it visible under `key`, replacing any previous
    /// artifact. Returns the envelope checksum.
    fn publish(&self, key: &str, payload: &[u8]) -> Result<ArtifactHash, StoreError>;

    /// Returns `true` if an artifact is stored under `key`.
    fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Drop the artifact under `key`. Returns `false` if nothing was stored.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// All stored keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Reject keys that cannot be used verbatim as a file stem.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_owned()))
    }
}

fn checksum(header: &[u8], payload: &[u8]) -> ArtifactHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    ArtifactHash(*hasher.finalize().as_bytes())
}

/// Wrap `payload` in the artifact envelope.
///
/// Payloads larger than `u32::MAX` bytes are rejected as corrupt input.
pub fn seal(key: &str, payload: &[u8]) -> Result<(Vec<u8>, ArtifactHash), StoreError> {
    let len = u32::try_from(payload.len()).map_err(|_| StoreError::Corrupt {
        key: key.to_owned(),
        reason: "payload exceeds 4 GiB",
    })?;
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_be_bytes());
    header[6..10].copy_from_slice(&len.to_be_bytes());
    let sum = checksum(&header, payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    out.extend_from_slice(sum.as_bytes());
    Ok((out, sum))
}

/// Verify an envelope and return a view of its payload.
pub fn open<'a>(key: &str, bytes: &'a [u8]) -> Result<&'a [u8], StoreError> {
    let corrupt = |reason| StoreError::Corrupt {
        key: key.to_owned(),
        reason,
    };
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(corrupt("truncated envelope"));
    }
    if bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    if u16::from_be_bytes([bytes[4], bytes[5]]) != VERSION {
        return Err(corrupt("unsupported envelope version"));
    }
    let len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    if bytes.len() != HEADER_LEN + len + CHECKSUM_LEN {
        return Err(corrupt("length mismatch"));
    }
    let payload = &bytes[HEADER_LEN..HEADER_LEN + len];
    let mut recorded = [0u8; CHECKSUM_LEN];
    recorded.copy_from_slice(&bytes[HEADER_LEN + len..]);
    let expected = ArtifactHash(recorded);
    let computed = checksum(&bytes[..HEADER_LEN], payload);
    if expected != computed {
        return Err(StoreError::ChecksumMismatch {
            key: key.to_owned(),
            expected,
            computed,
        });
    }
    Ok(payload)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_preserves_payload() {
        let (sealed, _) = seal("k", b"payload bytes").unwrap();
        assert_eq!(open("k", &sealed).unwrap(), b"payload bytes");
    }

    #[test]
    fn open_rejects_flipped_payload_bit() {
        let (mut sealed, _) = seal("k", b"payload bytes").unwrap();
        sealed[HEADER_LEN] ^= 0x01;
        assert!(matches!(
            open("k", &sealed),
            Err(StoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn open_rejects_truncation() {
        let (sealed, _) = seal("k", b"payload bytes").unwrap();
        let err = open("k", &sealed[..sealed.len() - 1]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { reason: "length mismatch", .. }));
    }

    #[test]
    fn open_rejects_foreign_magic() {
        let (mut sealed, _) = seal("k", b"x").unwrap();
        sealed[0] = b'X';
        let err = open("k", &sealed).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { reason: "bad magic", .. }));
    }

    #[test]
    fn keys_are_validated() {
        assert!(validate_key("wiki_val_ns").is_ok());
        assert!(validate_key("thgl-myket.test").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/b").is_err());
    }

    #[test]
    fn hash_displays_as_hex() {
        let h = ArtifactHash([0xAB; 32]);
        assert_eq!(h.to_string(), "ab".repeat(32));
    }
}
