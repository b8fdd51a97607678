//! Block proof-of-work: argon2 hashing and big-endian target comparison.
//!
//! argon2 is treated as an externally supplied pure function: fixed
//! parameters, fixed salt, raw 32-byte output. There is no per-block salt —
//! the block's own canonical bytes are the only varying input, exactly as a
//! miner and a validating node must agree on without coordination.

use argon2::Argon2;

const POW_SALT: &[u8] = b"quanta-proof-of-work-salt-v1";

/// Hash canonical block bytes into the 32-byte value used as both the
/// block's `hash` field and the quantity compared against the difficulty
/// target.
pub fn block_hash(canonical_bytes: &[u8]) -> [u8; 32] {
    let argon2 = Argon2::default();
    let mut out = [0u8; 32];
    argon2
        .hash_password_into(canonical_bytes, POW_SALT, &mut out)
        .expect("fixed-size argon2 output never fails");
    out
}

/// True iff `hash`, read as a big-endian unsigned integer, is <= `target`.
/// Equal-length byte arrays compare lexicographically exactly the way they'd
/// compare numerically, so no bignum type is needed.
pub fn meets_target(hash: &[u8; 32], target: &[u8; 32]) -> bool {
    hash.as_slice() <= target.as_slice()
}

/// Derive the next difficulty target from the tail's timestamps, clamped to
/// at most a 4x shift per retarget in either direction.
///
/// `tail` holds `(timestamp_millis)` for the last `TAIL` blocks, oldest
/// first. `starting_target` is used verbatim while the tail is too short to
/// retarget from (genesis and its first few descendants).
pub fn next_target(tail: &[i64], block_time_millis: i64, starting_target: &[u8; 32]) -> [u8; 32] {
    if tail.len() < 2 {
        return *starting_target;
    }
    let observed_span = tail[tail.len() - 1] - tail[0];
    let expected_span = block_time_millis * (tail.len() as i64 - 1);
    if observed_span <= 0 || expected_span <= 0 {
        return *starting_target;
    }

    let ratio = observed_span as f64 / expected_span as f64;
    let clamped = ratio.clamp(0.25, 4.0);

    scale_target(starting_target, clamped)
}

/// Multiply a 256-bit big-endian target by `factor`, saturating at
/// `u256::MAX` on overflow. `factor` is rationalized to `numerator/4096` and
/// applied as a multi-word long multiplication followed by long division
/// over the eight 32-bit words, since the codebase otherwise avoids pulling
/// in a bignum crate for this.
fn scale_target(target: &[u8; 32], factor: f64) -> [u8; 32] {
    const DENOM: u128 = 4096;
    let numerator = (factor * DENOM as f64).round().max(0.0) as u128;

    let mut words = [0u32; 8];
    for (i, chunk) in target.chunks(4).enumerate() {
        words[i] = u32::from_be_bytes(chunk.try_into().unwrap());
    }

    let mut carry = 0u128;
    for word in words.iter_mut().rev() {
        let product = *word as u128 * numerator + carry;
        *word = product as u32;
        carry = product >> 32;
    }
    if carry != 0 {
        return [0xffu8; 32];
    }

    let mut remainder = 0u128;
    for word in words.iter_mut() {
        let cur = (remainder << 32) | *word as u128;
        *word = (cur / DENOM) as u32;
        remainder = cur % DENOM;
    }

    let mut out = [0u8; 32];
    for (i, word) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    out
}
