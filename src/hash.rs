//! SHA-256 digests for archive verification.
//!
//! Formula files declare digests as 64 lowercase hex characters. [`Sha256Digest`]
//! validates that shape at construction; [`file_digest`] streams a file through
//! the hasher without loading it into memory.

use crate::error::IntegrityError;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A validated SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Parse a digest, accepting an optional `sha256:` prefix and any hex case.
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let hex = s.trim().strip_prefix("sha256:").unwrap_or(s.trim());
        if hex.len() != 64 {
            return Err(format!("expected 64 hex characters, got {}", hex.len()));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("non-hex characters in '{hex}'"));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash an in-memory buffer
pub fn bytes_digest(bytes: &[u8]) -> Sha256Digest {
    Sha256Digest(format!("{:x}", Sha256::digest(bytes)))
}

/// Stream a file through SHA-256
pub fn file_digest(path: &Path) -> std::io::Result<Sha256Digest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(Sha256Digest(format!("{:x}", hasher.finalize())))
}

/// Check a declared digest string against a file on disk.
///
/// An empty declaration is never treated as "skip verification".
pub fn verify_file(name: &str, path: &Path, declared: &str) -> crate::error::Result<Sha256Digest> {
    if declared.trim().is_empty() {
        return Err(IntegrityError::MissingHash(name.to_string()).into());
    }
    let expected = Sha256Digest::parse(declared).map_err(|reason| IntegrityError::Malformed {
        name: name.to_string(),
        reason,
    })?;

    let actual = file_digest(path)?;
    if actual != expected {
        return Err(IntegrityError::Mismatch {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into());
    }

    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KegError;

    // sha256("hello\n")
    const HELLO: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn test_parse_normalizes_case_and_prefix() {
        let upper = HELLO.to_ascii_uppercase();
        let digest = Sha256Digest::parse(&format!("sha256:{upper}")).unwrap();
        assert_eq!(digest.as_str(), HELLO);
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        assert!(Sha256Digest::parse("abc").is_err());
        assert!(Sha256Digest::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let bad = "z".repeat(64);
        assert!(Sha256Digest::parse(&bad).is_err());
    }

    #[test]
    fn test_file_digest_matches_bytes_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello\n").unwrap();

        assert_eq!(file_digest(&path).unwrap().as_str(), HELLO);
        assert_eq!(bytes_digest(b"hello\n").as_str(), HELLO);
    }

    #[test]
    fn test_verify_file_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "tampered\n").unwrap();

        let err = verify_file("hello", &path, HELLO).unwrap_err();
        assert!(matches!(
            err,
            KegError::Integrity(IntegrityError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_verify_file_empty_hash_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello\n").unwrap();

        let err = verify_file("hello", &path, "   ").unwrap_err();
        assert!(matches!(
            err,
            KegError::Integrity(IntegrityError::MissingHash(_))
        ));
    }
}
