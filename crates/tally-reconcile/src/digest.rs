//! Content digests over derivation inputs and staged outputs.
//!
//! Correction runs are keyed by these digests: the same operation over the
//! same inputs and settled state hashes identically, so it can be skipped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, ReconcileResult};

/// Hex-encoded BLAKE3 digest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and tables.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental digest over a sequence of serializable items.
///
/// Each item is length-prefixed, so item boundaries are part of the hash.
pub struct DigestBuilder {
    hasher: blake3::Hasher,
    items: u64,
}

impl DigestBuilder {
    pub fn new(domain: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"tally-v1:");
        hasher.update(domain.as_bytes());
        hasher.update(b":");
        Self { hasher, items: 0 }
    }

    pub fn item<T: Serialize + ?Sized>(&mut self, value: &T) -> ReconcileResult<&mut Self> {
        let encoded =
            serde_json::to_vec(value).map_err(|e| ReconcileError::Digest(e.to_string()))?;
        self.hasher.update(&(encoded.len() as u64).to_le_bytes());
        self.hasher.update(&encoded);
        self.items += 1;
        Ok(self)
    }

    pub fn items(&self) -> u64 {
        self.items
    }

    pub fn finish(&self) -> Digest {
        let mut hasher = self.hasher.clone();
        hasher.update(&self.items.to_le_bytes());
        Digest(hex::encode(hasher.finalize().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn digest(domain: &str, items: &[serde_json::Value]) -> Digest {
        let mut builder = DigestBuilder::new(domain);
        for item in items {
            builder.item(item).unwrap();
        }
        builder.finish()
    }

    #[test]
    fn same_items_same_digest() {
        let a = digest("ledger", &[json!({"id": "1"}), json!({"id": "2"})]);
        let b = digest("ledger", &[json!({"id": "1"}), json!({"id": "2"})]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn order_domain_and_boundaries_matter() {
        let base = digest("ledger", &[json!("ab"), json!("c")]);
        assert_ne!(base, digest("ledger", &[json!("c"), json!("ab")]));
        assert_ne!(base, digest("containers", &[json!("ab"), json!("c")]));
        assert_ne!(base, digest("ledger", &[json!("a"), json!("bc")]));
        assert_ne!(digest("ledger", &[]), digest("ledger", &[json!(null)]));
    }
}
