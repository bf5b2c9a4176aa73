use core::{fmt::Display, str::FromStr};

use blake3::Hasher;
use hex::encode;
use serde::{Deserialize, Serialize};

use crate::{AvatarError, Result};

/// Digest of raw image bytes, used as the cache key and as the change
/// token of the hash-driven channels.
///
/// Locally computed hashes use BLAKE3. Hashes announced by remote
/// sources are opaque: any non-empty hex string is accepted and only
/// compared for equality, never recomputed.
#[derive(
    Debug, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct ContentHash(String);

impl ContentHash {
    /// Computes the hash of the given bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        log::trace!("Computing BLAKE3 hash for {} bytes", bytes.len());

        let mut hasher = Hasher::new();
        hasher.update(bytes);
        let hash = hasher.finalize();
        ContentHash(encode(hash.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContentHash {
    type Err = AvatarError;

    /// Accepts announced digests. The value doubles as a file name in the
    /// cache root, so only hex digits are allowed.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AvatarError::Parse);
        }
        Ok(ContentHash(s.to_ascii_lowercase()))
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
