//! Transaction type, canonical signing, and the mint-spec sub-object.

use crate::crypto::{canonical_bytes, sha256, verify_digest};
use serde::{Deserialize, Serialize};

/// Who a transaction originates from.
///
/// The reference protocol shares one string field between hex public keys
/// and the sentinel values `"network"` / `"mint"`; here the two are split
/// into a discriminated type so a caller can't accidentally treat a
/// reserved sender as a spendable address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Sender {
    Address(String),
    Network,
    Mint,
}

impl Sender {
    pub fn as_str(&self) -> &str {
        match self {
            Sender::Address(addr) => addr.as_str(),
            Sender::Network => "network",
            Sender::Mint => "mint",
        }
    }

    pub fn is_reserved(&self) -> bool {
        !matches!(self, Sender::Address(_))
    }
}

impl Serialize for Sender {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Sender {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "network" => Sender::Network,
            "mint" => Sender::Mint,
            _ => Sender::Address(raw),
        })
    }
}

/// A `mint` object attached to a transaction, describing a new token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintSpec {
    pub token: String,
    pub airdrop: u64,
    #[serde(rename = "miningReward", skip_serializing_if = "Option::is_none")]
    pub mining_reward: Option<u64>,
}

/// A transaction as carried in the mempool, a block, and the gossip wire
/// format. Field order matches the canonical-JSON encoding used for hashing
/// and signing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub sender: Sender,
    pub receiver: String,
    pub amount: u64,
    pub signature: String,
    pub nonce: u64,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint: Option<MintSpec>,
}

impl Transaction {
    /// Canonical bytes used for both the signing digest and the mempool/
    /// block identity comparison, with `signature` blanked.
    fn bytes_with_blank_signature(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        canonical_bytes(&unsigned)
    }

    /// SHA-256 digest of the canonical encoding with `signature` blanked —
    /// what a non-reserved sender signs and what the validator re-derives.
    pub fn signing_digest(&self) -> [u8; 32] {
        sha256(&self.bytes_with_blank_signature())
    }

    /// Stable identity hash used for mempool and spent-signature bookkeeping,
    /// distinct from the signing digest only in that it's hex-encoded for
    /// use as a map key / cache entry.
    pub fn identity_hash(&self) -> String {
        hex::encode(sha256(&canonical_bytes(self)))
    }

    /// Verify the transaction's signature against its declared sender.
    /// Reserved senders (`network`, `mint`) are not signature-checked here —
    /// their admission rules live in the validator, which knows the block
    /// and mempool context required to authorize them.
    pub fn verify_signature(&self) -> bool {
        match &self.sender {
            Sender::Address(pubkey_hex) => {
                verify_digest(pubkey_hex, &self.signing_digest(), &self.signature)
            }
            Sender::Network | Sender::Mint => true,
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.sender.is_reserved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    fn signed_transfer(secret: &SecretKey, public_hex: &str, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            sender: Sender::Address(public_hex.to_string()),
            receiver: "bob".to_string(),
            amount: 100,
            signature: String::new(),
            nonce,
            timestamp: 1_700_000_000_000,
            token: None,
            unlock: None,
            mint: None,
        };
        let digest = tx.signing_digest();
        tx.signature = crate::crypto::sign_digest(&hex::encode(secret.secret_bytes()), &digest).unwrap();
        tx
    }

    #[test]
    fn signed_transaction_verifies() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret);
        let public_hex = hex::encode(public.serialize());

        let tx = signed_transfer(&secret, &public_hex, 1);
        assert!(tx.verify_signature());
    }

    #[test]
    fn tampered_amount_fails_verification() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x43; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret);
        let public_hex = hex::encode(public.serialize());

        let mut tx = signed_transfer(&secret, &public_hex, 1);
        tx.amount = 999;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn reserved_senders_are_not_address_variants() {
        assert!(Sender::Network.is_reserved());
        assert!(Sender::Mint.is_reserved());
        assert!(!Sender::Address("abc".into()).is_reserved());
    }

    #[test]
    fn sender_round_trips_through_json() {
        let tx = Transaction {
            sender: Sender::Mint,
            receiver: "alice".to_string(),
            amount: 1000,
            signature: "mint".to_string(),
            nonce: 0,
            timestamp: 1,
            token: Some("FOO".to_string()),
            unlock: None,
            mint: None,
        };
        let bytes = canonical_bytes(&tx);
        let decoded: Transaction = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.sender, Sender::Mint);
    }
}
