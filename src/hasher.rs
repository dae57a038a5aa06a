//! Content fingerprints for image payloads

use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a decoded image payload.
///
/// Used as the result-cache key and as the correlation id of audit entries.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// 64 lowercase hex characters
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Key under which the cached outcome for this payload lives.
    pub fn cache_key(&self) -> String {
        format!("alt_text:{}", self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Fingerprint a payload. Pure and deterministic.
pub fn hash(payload: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(payload);
    Fingerprint(digest.into())
}
