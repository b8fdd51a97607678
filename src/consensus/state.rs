//! The in-memory state index: balances, locked balances, nonce
//! high-water-marks, the spent-signature cache, and the mint registry.
//! Pure data plus pure mutators; every field here must be exactly
//! reconstructible by replaying accepted transactions from empty (I1).

use crate::core::{MintEntry, MintRegistry, Sender, Transaction};
use std::collections::{HashMap, HashSet, VecDeque};

const SIGNATURE_CACHE_CAPACITY: usize = 10_000;

/// A balance key: address plus optional token (`None` means the native
/// coin).
pub type BalanceKey = (String, Option<String>);

#[derive(Clone, Debug)]
struct LockedEntry {
    address: String,
    token: Option<String>,
    amount: u64,
    unlock_at: i64,
}

/// The full state index. `Clone` is used directly as the snapshot/restore
/// mechanism for push-reorg.
#[derive(Clone, Debug, Default)]
pub struct StateIndex {
    balances: HashMap<BalanceKey, u64>,
    locked: Vec<LockedEntry>,
    last_nonce: HashMap<String, u64>,
    spent_signatures: VecDeque<String>,
    spent_lookup: HashSet<String>,
    pub mint_registry: MintRegistry,
}

impl StateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &str, token: Option<&str>) -> u64 {
        let key = (address.to_string(), token.map(str::to_string));
        *self.balances.get(&key).unwrap_or(&0)
    }

    pub fn locked_balance(&self, address: &str, token: Option<&str>) -> u64 {
        self.locked
            .iter()
            .filter(|l| l.address == address && l.token.as_deref() == token)
            .map(|l| l.amount)
            .sum()
    }

    pub fn last_nonce(&self, address: &str) -> u64 {
        *self.last_nonce.get(address).unwrap_or(&0)
    }

    /// Every token (native coin excluded) `address` currently holds a
    /// spendable or locked balance in, for the `/tokens/:addr` endpoint.
    pub fn tokens_held(&self, address: &str) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .balances
            .iter()
            .filter(|((addr, token), amount)| addr == address && token.is_some() && **amount > 0)
            .filter_map(|((_, token), _)| token.clone())
            .chain(
                self.locked
                    .iter()
                    .filter(|l| l.address == address && l.token.is_some())
                    .filter_map(|l| l.token.clone()),
            )
            .collect();
        tokens.sort();
        tokens.dedup();
        tokens
    }

    pub fn is_spent(&self, signature: &str) -> bool {
        self.spent_lookup.contains(signature)
    }

    fn credit(&mut self, address: &str, token: Option<&str>, amount: u64) {
        let key = (address.to_string(), token.map(str::to_string));
        *self.balances.entry(key).or_insert(0) += amount;
    }

    fn debit(&mut self, address: &str, token: Option<&str>, amount: u64) {
        let key = (address.to_string(), token.map(str::to_string));
        let entry = self.balances.entry(key).or_insert(0);
        *entry = entry.saturating_sub(amount);
    }

    fn record_signature(&mut self, signature: &str) {
        if signature.is_empty() || signature == "network" || signature == "mint" {
            return;
        }
        if self.spent_lookup.insert(signature.to_string()) {
            self.spent_signatures.push_back(signature.to_string());
            if self.spent_signatures.len() > SIGNATURE_CACHE_CAPACITY {
                if let Some(oldest) = self.spent_signatures.pop_front() {
                    self.spent_lookup.remove(&oldest);
                }
            }
        }
    }

    /// Move every lock whose `unlock_at` has matured as of `block_timestamp`
    /// into spendable balance.
    pub fn release(&mut self, block_timestamp: i64) {
        let mut remaining = Vec::with_capacity(self.locked.len());
        for entry in self.locked.drain(..) {
            if entry.unlock_at <= block_timestamp {
                self.credit(&entry.address, entry.token.as_deref(), entry.amount);
            } else {
                remaining.push(entry);
            }
        }
        self.locked = remaining;
    }

    /// Apply one accepted transaction: debit the sender (unless reserved),
    /// credit the receiver (or lock it), bump the nonce high-water-mark,
    /// record the spent signature, and register a mint if present.
    pub fn apply(&mut self, tx: &Transaction, block_timestamp: i64) {
        if let Sender::Address(sender) = &tx.sender {
            self.debit(sender, tx.token.as_deref(), tx.amount);
            let next = self.last_nonce(sender).max(tx.nonce);
            self.last_nonce.insert(sender.clone(), next);
        }

        match tx.unlock {
            Some(unlock_at) if unlock_at > block_timestamp => {
                self.locked.push(LockedEntry {
                    address: tx.receiver.clone(),
                    token: tx.token.clone(),
                    amount: tx.amount,
                    unlock_at,
                });
            }
            _ => self.credit(&tx.receiver, tx.token.as_deref(), tx.amount),
        }

        self.record_signature(&tx.signature);

        if let Some(mint) = &tx.mint {
            self.mint_registry.insert(
                mint.token.clone(),
                MintEntry {
                    mining_reward: mint.mining_reward.unwrap_or(0),
                    airdrop: mint.airdrop,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(sender: &str, receiver: &str, amount: u64, nonce: u64) -> Transaction {
        Transaction {
            sender: Sender::Address(sender.to_string()),
            receiver: receiver.to_string(),
            amount,
            signature: format!("sig-{sender}-{nonce}"),
            nonce,
            timestamp: 1_700_000_000_000,
            token: None,
            unlock: None,
            mint: None,
        }
    }

    #[test]
    fn apply_debits_sender_and_credits_receiver() {
        let mut state = StateIndex::new();
        state.credit("alice", None, 1000);
        state.apply(&transfer("alice", "bob", 100, 1), 0);
        assert_eq!(state.balance("alice", None), 900);
        assert_eq!(state.balance("bob", None), 100);
        assert_eq!(state.last_nonce("alice"), 1);
    }

    #[test]
    fn reserved_senders_are_never_debited() {
        let mut state = StateIndex::new();
        let tx = Transaction {
            sender: Sender::Network,
            receiver: "bob".to_string(),
            amount: 500,
            signature: "network".to_string(),
            nonce: 0,
            timestamp: 0,
            token: None,
            unlock: None,
            mint: None,
        };
        state.apply(&tx, 0);
        assert_eq!(state.balance("bob", None), 500);
        assert_eq!(state.last_nonce("network"), 0);
    }

    #[test]
    fn locked_balance_matures_on_release() {
        let mut state = StateIndex::new();
        let mut tx = transfer("alice", "bob", 100, 1);
        tx.unlock = Some(5000);
        state.apply(&tx, 1000);
        assert_eq!(state.balance("bob", None), 0);
        assert_eq!(state.locked_balance("bob", None), 100);

        state.release(4000);
        assert_eq!(state.locked_balance("bob", None), 100);

        state.release(6000);
        assert_eq!(state.locked_balance("bob", None), 0);
        assert_eq!(state.balance("bob", None), 100);
    }

    #[test]
    fn spent_signature_cache_tracks_membership() {
        let mut state = StateIndex::new();
        assert!(!state.is_spent("sig-alice-1"));
        state.apply(&transfer("alice", "bob", 10, 1), 0);
        assert!(state.is_spent("sig-alice-1"));
    }

    #[test]
    fn mint_transaction_registers_token() {
        let mut state = StateIndex::new();
        let mut tx = transfer("alice", "dev-wallet", 1_000_000, 1);
        tx.mint = Some(crate::core::MintSpec {
            token: "FOO".to_string(),
            airdrop: 1000,
            mining_reward: Some(50),
        });
        state.apply(&tx, 0);
        assert!(state.mint_registry.contains("FOO"));
        assert_eq!(state.mint_registry.get("FOO").unwrap().airdrop, 1000);
    }

    #[test]
    fn tokens_held_reports_positive_balances_only() {
        let mut state = StateIndex::new();
        let mut tx = transfer("alice", "bob", 100, 1);
        tx.token = Some("FOO".to_string());
        state.apply(&tx, 0);
        assert_eq!(state.tokens_held("bob"), vec!["FOO".to_string()]);
        assert!(state.tokens_held("alice").is_empty());
    }
}
