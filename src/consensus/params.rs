//! Constants and pure schedule functions treated as externally supplied:
//! nominal block time, reorg/tail window, the dev wallet and its cut, the
//! genesis difficulty, and the reward/fee schedule. Concrete values below
//! are this deployment's choice, recorded in the grounding ledger.

/// Nominal inter-block interval, in milliseconds.
pub const BLOCK_TIME_MILLIS: i64 = 10_000;

/// Window, in blocks, used for difficulty retargeting.
pub const TAIL: usize = 20;

/// Maximum length of a push-reorg sub-chain, and thus the deepest a fork
/// scan ever needs to walk back. Smaller than `TAIL` by design.
pub const MAX_PUSH_LEN: usize = 15;

/// Fixed recipient of the dev fee and of mint fees.
pub const DEV_WALLET: &str = "dev-wallet";

/// Fraction of the block reward paid to `DEV_WALLET`.
pub const DEV_FEE: f64 = 0.05;

/// Genesis difficulty target: the largest 32-byte value whose top byte is
/// zero, a deliberately easy starting point that the schedule tightens from
/// the tail onward.
pub const STARTING_TARGET: [u8; 32] = {
    let mut t = [0xffu8; 32];
    t[0] = 0x00;
    t
};

/// Base native-coin reward at height 0, in points. Halves every
/// `HALVING_INTERVAL` blocks, floored at 1 point.
const BASE_REWARD: u64 = 50_000_000;
const HALVING_INTERVAL: u64 = 210_000;

/// Total block reward (points) at `height`, before the dev-fee split.
pub fn reward(height: u64) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        1
    } else {
        (BASE_REWARD >> halvings).max(1)
    }
}

/// Fee (points) required to mint a new token, rising slightly with both
/// height and how many tokens already exist, so minting doesn't stay free
/// as the registry grows.
pub fn mint_fee(height: u64, minted_count: u64) -> u64 {
    let base = 1_000_000u64;
    base + minted_count.saturating_mul(10_000) + (height / HALVING_INTERVAL) * 100_000
}

/// The single reserved token name that can never be minted, regardless of
/// case.
pub fn is_reserved_token_name(token: &str) -> bool {
    token.eq_ignore_ascii_case("flss")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_halves_on_schedule() {
        assert_eq!(reward(0), BASE_REWARD);
        assert_eq!(reward(HALVING_INTERVAL), BASE_REWARD / 2);
        assert_eq!(reward(HALVING_INTERVAL * 2), BASE_REWARD / 4);
    }

    #[test]
    fn reward_never_reaches_zero() {
        assert!(reward(HALVING_INTERVAL * 100) >= 1);
    }

    #[test]
    fn reserved_token_name_is_case_insensitive() {
        assert!(is_reserved_token_name("FLSS"));
        assert!(is_reserved_token_name("flss"));
        assert!(!is_reserved_token_name("FOO"));
    }
}
