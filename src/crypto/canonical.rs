//! Canonical JSON encoding used for all hashing and signing.
//!
//! `serde_json`'s `Map` preserves insertion order when the `preserve_order`
//! feature is enabled, and `#[derive(Serialize)]` serializes struct fields in
//! source-declaration order. Compact `to_vec` never inserts whitespace. So a
//! plain `serde_json::to_vec` over a struct already gives us the "keys in
//! source-declaration order, no extraneous whitespace, fields equal to
//! `None` omitted" encoding the protocol requires, provided every struct in
//! the hashing/signing path consistently uses `skip_serializing_if`.

use serde::Serialize;

/// Serialize `value` into the canonical byte encoding used for hashing and
/// signing. Panics only if `T`'s `Serialize` impl itself fails, which none
/// of the protocol's data types do.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("protocol types always serialize")
}
