//! secp256k1 signatures over SHA-256 digests.
//!
//! The secp256k1 primitive itself is treated as externally supplied (per
//! the system's scope): this module is a thin, idiomatic wrapper, not a
//! reimplementation of the curve.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

/// SHA-256 digest of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Sign a digest with a secp256k1 secret key, returning a lowercase DER hex
/// signature.
pub fn sign_digest(secret_key_hex: &str, digest: &[u8; 32]) -> Result<String, SignatureError> {
    let secp = Secp256k1::signing_only();
    let secret_bytes = hex::decode(secret_key_hex).map_err(|_| SignatureError::BadKeyEncoding)?;
    let secret = SecretKey::from_slice(&secret_bytes).map_err(|_| SignatureError::BadKeyEncoding)?;
    let message = Message::from_digest(*digest);
    let sig = secp.sign_ecdsa(&message, &secret);
    Ok(hex::encode(sig.serialize_der()))
}

/// Verify a DER-encoded hex signature over a digest, under a hex-encoded
/// compressed or uncompressed public key.
pub fn verify_digest(public_key_hex: &str, digest: &[u8; 32], signature_hex: &str) -> bool {
    let secp = Secp256k1::verification_only();
    let Ok(pubkey_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(public_key) = PublicKey::from_slice(&pubkey_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(&sig_bytes) else {
        return false;
    };
    let message = Message::from_digest(*digest);
    secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed key encoding")]
    BadKeyEncoding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrips() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret);
        let secret_hex = hex::encode(secret.secret_bytes());
        let public_hex = hex::encode(public.serialize());

        let digest = sha256(b"hello world");
        let sig = sign_digest(&secret_hex, &digest).unwrap();
        assert!(verify_digest(&public_hex, &digest, &sig));
    }

    #[test]
    fn verify_rejects_tampered_digest() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret);
        let secret_hex = hex::encode(secret.secret_bytes());
        let public_hex = hex::encode(public.serialize());

        let digest = sha256(b"hello world");
        let sig = sign_digest(&secret_hex, &digest).unwrap();
        let other_digest = sha256(b"goodbye world");
        assert!(!verify_digest(&public_hex, &other_digest, &sig));
    }
}

