//! Cryptographic hash types and hex framing.

use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 content hash represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute SHA-256 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha256::new())
    }

    /// Parse from a strict 64-character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::OperationError::Internal(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let bytes = parse_hex_lenient(s)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}

/// Decode a hex digest into raw bytes, two characters per byte.
///
/// A trailing lone nibble is decoded as a one-character byte rather than
/// rejected. Digests with that shape exist in deployed storage rows, so the
/// decoder must keep accepting them.
pub fn parse_hex_lenient(s: &str) -> crate::Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut res = Vec::with_capacity(bytes.len().div_ceil(2));
    let mut n = 0;
    while n < bytes.len() {
        let end = (n + 2).min(bytes.len());
        let pair = std::str::from_utf8(&bytes[n..end])
            .map_err(|e| crate::OperationError::Internal(format!("invalid hash: {e}")))?;
        let v = u8::from_str_radix(pair, 16)
            .map_err(|e| crate::OperationError::Internal(format!("invalid hash `{pair}`: {e}")))?;
        res.push(v);
        n += 2;
    }
    Ok(res)
}

/// Compute the baseline digest of a hash list: SHA-256 over the
/// concatenation of the raw digests, hex-encoded.
///
/// This is the fingerprint written to the checkout marker; an empty list
/// digests to the hash of empty input.
pub fn baseline_digest(hashes: &[String]) -> crate::Result<String> {
    let mut hasher = ContentHash::hasher();
    for h in hashes {
        let raw = parse_hex_lenient(h)?;
        hasher.update(&raw);
    }
    Ok(hasher.finalize().to_hex())
}
