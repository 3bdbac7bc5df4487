//! BLAKE2b-256 digests for repodata content and JLAP chain checksums
//!
//! Two flavours of the same 32-byte digest are used: the plain hash of a
//! document's bytes, and the keyed hash that links each JLAP line to the
//! checksum of the line before it.

use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::{Blake2b, Blake2bMac, Digest};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::constants::DIGEST_SIZE;
use crate::errors::{CodecError, CodecResult};

type Blake2b256 = Blake2b<U32>;
type Blake2bMac256 = Blake2bMac<U32>;

/// 32-byte BLAKE2b digest
///
/// Stored as raw bytes and rendered as lower-case hex. Parsing accepts either
/// case so an IV read back from disk or a server always round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Blake2Hash([u8; DIGEST_SIZE]);

impl Blake2Hash {
    /// Parse a 64-character hex string
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidHex` when the string has the wrong length or
    /// contains non-hex characters.
    pub fn from_hex(hex: &str) -> CodecResult<Self> {
        let invalid = || CodecError::InvalidHex {
            value: hex.chars().take(2 * DIGEST_SIZE + 8).collect(),
        };
        if hex.len() != 2 * DIGEST_SIZE || !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut bytes = [0u8; DIGEST_SIZE];
        for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(pair).map_err(|_| invalid())?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }

    /// Lower-case 64-character hex representation
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;
        self.0
            .iter()
            .fold(String::with_capacity(2 * DIGEST_SIZE), |mut acc, b| {
                let _ = write!(acc, "{:02x}", b);
                acc
            })
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Plain digest of `data`
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Keyed digest of `data`, the JLAP chain step
    pub fn keyed(data: &[u8], key: &Blake2Hash) -> Self {
        let mut mac = Blake2bMac256::new_with_salt_and_personal(key.as_bytes(), &[], &[])
            .expect("32-byte key is a valid BLAKE2b key");
        mac.update(data);
        Self(mac.finalize().into_bytes().into())
    }
}

impl fmt::Display for Blake2Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Blake2Hash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Blake2Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Blake2Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Incremental plain BLAKE2b-256 over a document's bytes
#[derive(Clone, Default)]
pub struct ContentHasher(Blake2b256);

impl ContentHasher {
    pub fn new() -> Self {
        Self(Blake2b256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    pub fn finalize(self) -> Blake2Hash {
        Blake2Hash(self.0.finalize().into())
    }
}

/// Async writer that hashes every byte it forwards
///
/// Lets a download or a re-serialised document be written and hashed in a
/// single pass.
pub struct HashWriter<W> {
    inner: W,
    hasher: ContentHasher,
    written: u64,
}

impl<W: AsyncWrite + Unpin> HashWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
            written: 0,
        }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(data).await?;
        self.hasher.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush the inner writer and return it with the digest of everything written
    pub async fn finish(mut self) -> std::io::Result<(W, Blake2Hash, u64)> {
        self.inner.flush().await?;
        Ok((self.inner, self.hasher.finalize(), self.written))
    }
}
