//! Request fingerprints.
//!
//! A fingerprint is a deterministic digest over every input that can affect
//! derivative pixels: the identifier, the normalized operation list, and the
//! pixel-affecting configuration subset. Equal fingerprints imply the cached
//! bytes may be served for either request.

use sha2::{Digest, Sha256};

use crate::config::Config;

use super::OperationList;

/// A stable request digest, rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    hex: String,
    identifier: String,
}

impl Fingerprint {
    /// Digest an identifier + normalized operation list + config subset.
    pub fn compute(identifier: &str, ops: &OperationList, config: &Config) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        hasher.update([0u8]);
        hasher.update(ops.canonical().as_bytes());
        hasher.update([0u8]);
        // Only the keys that change pixels participate.
        hasher.update([
            config.limit_to_8_bits as u8,
            config.normalize as u8,
            config.preserve_metadata as u8,
        ]);

        Fingerprint {
            hex: hex::encode(hasher.finalize()),
            identifier: identifier.to_string(),
        }
    }

    /// The hex digest; used as the cache payload filename.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// The identifier this fingerprint was computed for (for prefix purges).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hex)
    }
}

// =============================================================================
// Tests
// =============================================================================
