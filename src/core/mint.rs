use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-token mint entry: `{miningReward, airdrop}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintEntry {
    pub mining_reward: u64,
    pub airdrop: u64,
}

impl MintEntry {
    /// A token is minable iff its mining reward is nonzero.
    pub fn is_minable(&self) -> bool {
        self.mining_reward > 0
    }
}

/// Registry of every token ever minted, keyed by uppercase token name.
/// `BTreeMap` gives `/token/:i` a stable iteration order without a separate
/// insertion-order index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MintRegistry {
    tokens: BTreeMap<String, MintEntry>,
}

impl MintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<&MintEntry> {
        self.tokens.get(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    pub fn insert(&mut self, token: String, entry: MintEntry) {
        self.tokens.insert(token, entry);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn nth(&self, index: usize) -> Option<(&String, &MintEntry)> {
        self.tokens.iter().nth(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MintEntry)> {
        self.tokens.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_minable_only_with_positive_reward() {
        let minable = MintEntry { mining_reward: 50, airdrop: 0 };
        let not_minable = MintEntry { mining_reward: 0, airdrop: 1000 };
        assert!(minable.is_minable());
        assert!(!not_minable.is_minable());
    }

    #[test]
    fn nth_matches_insertion_order_by_key() {
        let mut registry = MintRegistry::new();
        registry.insert("FOO".to_string(), MintEntry { mining_reward: 1, airdrop: 0 });
        registry.insert("BAR".to_string(), MintEntry { mining_reward: 0, airdrop: 5 });
        // BTreeMap orders by key, so "BAR" precedes "FOO".
        assert_eq!(registry.nth(0).unwrap().0, "BAR");
        assert_eq!(registry.nth(1).unwrap().0, "FOO");
    }
}
