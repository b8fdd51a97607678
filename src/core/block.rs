use crate::core::transaction::Transaction;
use crate::crypto::{block_hash, canonical_bytes, meets_target, sha256, verify_digest};
use serde::{Deserialize, Serialize};

/// A proposer-signed, content-addressed record of an ordered batch of
/// transactions. Field order matches the canonical-JSON encoding used for
/// hashing and signing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub prev_hash: String,
    pub nonce: u64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub signature: String,
    pub proposer: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub hash: String,
    pub diff: String,
}

impl Block {
    /// Canonical bytes with `hash` and `signature` blanked, the basis for
    /// both the proof-of-work hash and the proposer's signature.
    fn bytes_with_blanks(&self) -> Vec<u8> {
        let mut blanked = self.clone();
        blanked.hash = String::new();
        blanked.signature = String::new();
        canonical_bytes(&blanked)
    }

    /// Recompute the argon2 proof-of-work hash over the blanked canonical
    /// encoding. Returned as lowercase hex, matching the `hash` field.
    pub fn recompute_hash(&self) -> String {
        hex::encode(block_hash(&self.bytes_with_blanks()))
    }

    /// SHA-256 digest of the blanked canonical encoding — what the proposer
    /// signs and what the validator re-derives to check `signature`.
    pub fn signing_digest(&self) -> [u8; 32] {
        sha256(&self.bytes_with_blanks())
    }

    /// Verify the proposer's signature over this block.
    pub fn verify_proposer_signature(&self) -> bool {
        verify_digest(&self.proposer, &self.signing_digest(), &self.signature)
    }

    /// True iff `hash`, interpreted as a big-endian unsigned integer, is
    /// within the target encoded by `diff`.
    pub fn meets_declared_target(&self) -> bool {
        let Ok(hash_bytes) = hex::decode(&self.hash) else {
            return false;
        };
        let Ok(target_bytes) = hex::decode(&self.diff) else {
            return false;
        };
        let Ok(hash): Result<[u8; 32], _> = hash_bytes.try_into() else {
            return false;
        };
        let Ok(target): Result<[u8; 32], _> = target_bytes.try_into() else {
            return false;
        };
        meets_target(&hash, &target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned_block() -> Block {
        Block {
            timestamp: 1_700_000_000_000,
            transactions: vec![],
            prev_hash: "0".repeat(64),
            nonce: 0,
            signature: String::new(),
            proposer: "proposer-pubkey".to_string(),
            hash: String::new(),
            diff: "f".repeat(64),
        }
    }

    #[test]
    fn recompute_hash_is_deterministic() {
        let block = unsigned_block();
        assert_eq!(block.recompute_hash(), block.recompute_hash());
    }

    #[test]
    fn hash_changes_with_nonce() {
        let mut block = unsigned_block();
        let first = block.recompute_hash();
        block.nonce = 1;
        assert_ne!(first, block.recompute_hash());
    }

    #[test]
    fn meets_declared_target_rejects_bad_hex() {
        let mut block = unsigned_block();
        block.hash = "not-hex".to_string();
        assert!(!block.meets_declared_target());
    }
}
