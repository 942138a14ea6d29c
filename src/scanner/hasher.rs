//! Streaming file hasher.
//!
//! # Overview
//!
//! This module provides the [`Hasher`] struct for computing content
//! fingerprints with a fixed-size read buffer, so memory use does not grow
//! with file size. The algorithm is chosen once through [`HashAlgorithm`];
//! everything downstream only sees an opaque [`Digest`].
//!
//! # Example
//!
//! ```no_run
//! use fileregistry::scanner::{HashAlgorithm, Hasher};
//! use std::path::Path;
//!
//! let hasher = Hasher::new().with_algorithm(HashAlgorithm::Blake3);
//! match hasher.hash(Path::new("Cargo.toml")) {
//!     Ok(digest) => println!("{}", digest),
//!     Err(e) => eprintln!("skipping: {}", e),
//! }
//! ```

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as RustCryptoDigest;

use super::HashError;

/// Read buffer size used for every file.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Supported fingerprint algorithms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5 (128-bit). Matches registries and tags written by older tooling.
    #[default]
    Md5,
    /// SHA-256 (256-bit).
    Sha256,
    /// BLAKE3 (256-bit), the fastest option.
    Blake3,
}

impl HashAlgorithm {
    /// Lowercase algorithm name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Digest width in bytes.
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha256 | Self::Blake3 => 32,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "unknown hash algorithm '{}' (expected md5, sha256 or blake3)",
                other
            )),
        }
    }
}

/// A content fingerprint.
///
/// Opaque bytes whose canonical text form is lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(Vec<u8>);

/// Error returned when parsing a hex digest.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestParseError {
    /// The string is empty or has an odd number of characters.
    #[error("invalid digest length {0}")]
    Length(usize),
    /// The string contains a non-hex character.
    #[error("invalid hex character '{0}' in digest")]
    Character(char),
}

impl Digest {
    /// Wrap raw digest bytes.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a hex string (either case).
    ///
    /// # Errors
    ///
    /// Returns [`DigestParseError`] for empty, odd-length or non-hex input.
    pub fn from_hex(hex: &str) -> Result<Self, DigestParseError> {
        let hex = hex.trim();
        if hex.is_empty() || hex.len() % 2 != 0 {
            return Err(DigestParseError::Length(hex.len()));
        }

        let mut bytes = Vec::with_capacity(hex.len() / 2);
        let chars: Vec<char> = hex.chars().collect();
        for pair in chars.chunks(2) {
            let hi = pair[0]
                .to_digit(16)
                .ok_or(DigestParseError::Character(pair[0]))?;
            let lo = pair[1]
                .to_digit(16)
                .ok_or(DigestParseError::Character(pair[1]))?;
            bytes.push((hi * 16 + lo) as u8);
        }
        Ok(Self(bytes))
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex rendering, used for storage and display.
    #[must_use]
    pub fn to_hex(&self) -> String {
        use fmt::Write;

        let mut out = String::with_capacity(self.0.len() * 2);
        for byte in &self.0 {
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Incremental state for one file.
enum StreamState {
    Md5(md5::Md5),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl StreamState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(md5::Md5::new()),
            HashAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Md5(h) => h.update(chunk),
            Self::Sha256(h) => h.update(chunk),
            Self::Blake3(h) => {
                h.update(chunk);
            }
        }
    }

    fn finalize(self) -> Digest {
        match self {
            Self::Md5(h) => Digest::from_bytes(h.finalize().to_vec()),
            Self::Sha256(h) => Digest::from_bytes(h.finalize().to_vec()),
            Self::Blake3(h) => Digest::from_bytes(h.finalize().as_bytes().to_vec()),
        }
    }
}

/// Streaming content hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hasher {
    algorithm: HashAlgorithm,
}

impl Hasher {
    /// Create a hasher using the default algorithm.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the digest algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// The configured algorithm.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash the full content of a file.
    ///
    /// # Errors
    ///
    /// Returns a [`HashError`] for any open or read failure. Nothing is
    /// retried; the caller decides whether to log and continue.
    pub fn hash(&self, path: &Path) -> Result<Digest, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        self.hash_reader(file, path)
    }

    /// Hash everything readable from `reader`, attributing errors to `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`HashError`] if a read fails.
    pub fn hash_reader<R: Read>(&self, mut reader: R, path: &Path) -> Result<Digest, HashError> {
        let mut state = StreamState::new(self.algorithm);
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => state.update(&buffer[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(HashError::from_io(path, e)),
            }
        }

        Ok(state.finalize())
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn hash_bytes(&self, data: &[u8]) -> Digest {
        let mut state = StreamState::new(self.algorithm);
        state.update(data);
        state.finalize()
    }
}
