pub mod canonical;
pub mod pow;
pub mod signatures;

pub use canonical::canonical_bytes;
pub use pow::{block_hash, meets_target, next_target};
pub use signatures::{sha256, sign_digest, verify_digest, SignatureError};
