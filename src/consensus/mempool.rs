//! The mempool: an ordered sequence of pending transactions with a
//! per-sender uniqueness guard. There is no fee market here: miners are
//! paid by the block reward/dev-fee split, not by transaction fees, so
//! admission order is plain FIFO.

use crate::core::{Sender, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    #[error("sender already has a pending transaction")]
    SenderAlreadyPending,
    #[error("reserved senders may only be injected by the chain manager")]
    ReservedSenderRejected,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
    #[serde(skip)]
    pending_senders: HashSet<String>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the sender-uniqueness index after deserializing a mempool
    /// snapshot (e.g. received from a sync peer), since `pending_senders`
    /// itself isn't part of the wire format.
    pub fn rebuild_index(&mut self) {
        self.pending_senders = self
            .transactions
            .iter()
            .filter_map(|tx| match &tx.sender {
                Sender::Address(addr) => Some(addr.clone()),
                _ => None,
            })
            .collect();
    }

    /// Admit an externally-submitted transaction. Reserved senders
    /// (`network`, `mint`) must go through [`Mempool::inject_reserved`]
    /// instead — this is the guard against an external caller forging a
    /// reward or airdrop transaction.
    pub fn push(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        match &tx.sender {
            Sender::Address(addr) => {
                if self.pending_senders.contains(addr) {
                    return Err(MempoolError::SenderAlreadyPending);
                }
                self.pending_senders.insert(addr.clone());
                self.transactions.push(tx);
                Ok(())
            }
            Sender::Network | Sender::Mint => Err(MempoolError::ReservedSenderRejected),
        }
    }

    /// Append a reserved-sender transaction (mint airdrop synthesis). Only
    /// the chain manager calls this.
    pub fn inject_reserved(&mut self, tx: Transaction) {
        debug_assert!(tx.is_reserved());
        self.transactions.push(tx);
    }

    pub fn has_pending_sender(&self, address: &str) -> bool {
        self.pending_senders.contains(address)
    }

    /// Remove every transaction matching `block_txs` by identity tuple
    /// (`signature`, `amount`, `nonce`, `sender`, `receiver`, `token`), as
    /// required by `addBlock` step 4.
    pub fn remove_committed(&mut self, block_txs: &[Transaction]) {
        for tx in block_txs {
            self.transactions.retain(|pending| !identity_matches(pending, tx));
            if let Sender::Address(addr) = &tx.sender {
                self.pending_senders.remove(addr);
            }
        }
    }

    pub fn contains_token_mint(&self, token: &str) -> bool {
        self.transactions
            .iter()
            .any(|tx| tx.mint.as_ref().is_some_and(|m| m.token == token))
    }

    pub fn pending_mint_airdrop(&self, token: &str) -> Option<u64> {
        self.transactions
            .iter()
            .find(|tx| tx.mint.as_ref().is_some_and(|m| m.token == token))
            .map(|tx| tx.mint.as_ref().unwrap().airdrop)
    }

    pub fn transactions_up_to(&self, timestamp: i64) -> Vec<&Transaction> {
        self.transactions.iter().filter(|tx| tx.timestamp <= timestamp).collect()
    }

    pub fn all(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
        self.pending_senders.clear();
    }

    /// Replace the whole mempool contents, as required after a pull-sync
    /// completes and the remote's mempool is adopted wholesale.
    pub fn replace(&mut self, transactions: Vec<Transaction>) {
        self.transactions = transactions;
        self.rebuild_index();
    }
}

fn identity_matches(a: &Transaction, b: &Transaction) -> bool {
    a.signature == b.signature
        && a.amount == b.amount
        && a.nonce == b.nonce
        && a.sender == b.sender
        && a.receiver == b.receiver
        && a.token == b.token
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: &str, nonce: u64) -> Transaction {
        Transaction {
            sender: Sender::Address(sender.to_string()),
            receiver: "bob".to_string(),
            amount: 10,
            signature: format!("sig-{sender}-{nonce}"),
            nonce,
            timestamp: 1,
            token: None,
            unlock: None,
            mint: None,
        }
    }

    #[test]
    fn rejects_second_pending_tx_from_same_sender() {
        let mut mempool = Mempool::new();
        assert!(mempool.push(tx("alice", 1)).is_ok());
        assert!(matches!(
            mempool.push(tx("alice", 2)),
            Err(MempoolError::SenderAlreadyPending)
        ));
    }

    #[test]
    fn rejects_external_reserved_sender_injection() {
        let mut mempool = Mempool::new();
        let reserved = Transaction {
            sender: Sender::Network,
            receiver: "dev-wallet".to_string(),
            amount: 1,
            signature: "network".to_string(),
            nonce: 0,
            timestamp: 0,
            token: None,
            unlock: None,
            mint: None,
        };
        assert!(matches!(
            mempool.push(reserved),
            Err(MempoolError::ReservedSenderRejected)
        ));
    }

    #[test]
    fn remove_committed_frees_the_sender_slot() {
        let mut mempool = Mempool::new();
        let t = tx("alice", 1);
        mempool.push(t.clone()).unwrap();
        mempool.remove_committed(&[t]);
        assert!(!mempool.has_pending_sender("alice"));
        assert!(mempool.is_empty());
    }
}
