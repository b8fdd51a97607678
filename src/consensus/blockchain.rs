//! The chain manager. Owns the block store, state index and mempool;
//! the only component allowed to mutate any of them. Every mutation is
//! taken under `ChainManager`'s locks, which is the "single logical actor"
//! the concurrency model calls for — callers may run on separate tasks,
//! but every state change is serialized here.

use crate::consensus::events::{ChainEvent, EventBus};
use crate::consensus::mempool::Mempool;
use crate::consensus::metrics::MetricsCollector;
use crate::consensus::params::{self, MAX_PUSH_LEN, STARTING_TARGET, TAIL};
use crate::consensus::state::StateIndex;
use crate::consensus::validator::{self, BlockCheckContext, ValidationError};
use crate::core::{Block, Sender, Transaction};
use crate::crypto::next_target;
use crate::storage::{BlockStore, StorageError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("validation rejected: {0}")]
    Validation(#[from] ValidationError),
    #[error("persisted chain failed replay at height {height}: {source}")]
    Tampering { height: u64, source: ValidationError },
    #[error("sub-chain push exceeds the maximum reorg depth of {max}")]
    PushTooDeep { max: usize },
    #[error("no common ancestor found within the reorg window")]
    NoCommonAncestor,
    #[error("a sync or push operation is already in progress")]
    AlreadySyncing,
    #[error("remote sync failed: {0}")]
    Sync(String),
    #[error("mempool rejected transaction: {0}")]
    Mempool(#[from] crate::consensus::mempool::MempoolError),
}

/// `height`/`last_block_hash` plus the state index and mempool form a
/// single atomic unit: a push-reorg snapshots exactly this struct before
/// applying a sub-chain, and restores it verbatim if any block in the
/// sub-chain fails to apply.
#[derive(Clone)]
struct ChainSnapshot {
    height: u64,
    last_block_hash: String,
    state: StateIndex,
}

pub struct ChainManager {
    store: BlockStore,
    state: RwLock<StateIndex>,
    mempool: RwLock<Mempool>,
    height: RwLock<u64>,
    last_block_hash: RwLock<String>,
    last_seen_push: RwLock<Option<String>>,
    events: EventBus,
    pub metrics: Arc<MetricsCollector>,
    is_syncing: AtomicBool,
}

impl ChainManager {
    /// Load from the store, creating a genesis block if the store is
    /// empty. Every block past genesis is re-applied through `add_block`
    /// with replay flags; a failed replay halts initialization, since a
    /// persisted chain that doesn't re-validate indicates tampering.
    pub fn init(store: BlockStore) -> Result<Self, ChainError> {
        let metrics = MetricsCollector::new();
        let manager = Self {
            store,
            state: RwLock::new(StateIndex::new()),
            mempool: RwLock::new(Mempool::new()),
            height: RwLock::new(0),
            last_block_hash: RwLock::new(String::new()),
            last_seen_push: RwLock::new(None),
            events: EventBus::new(),
            metrics,
            is_syncing: AtomicBool::new(false),
        };

        let highest = manager.store.highest()?;
        let Some(highest) = highest else {
            manager.apply_genesis(genesis_block())?;
            return Ok(manager);
        };

        let genesis = manager.store.get(0)?;
        manager.apply_genesis(genesis)?;

        for height in 1..=highest {
            let block = manager.store.get(height)?;
            manager
                .add_block(block, ReplayMode::TrustedReplay)
                .map_err(|e| match e {
                    ChainError::Validation(source) => ChainError::Tampering { height, source },
                    other => other,
                })?;
        }

        Ok(manager)
    }

    fn apply_genesis(&self, genesis: Block) -> Result<(), ChainError> {
        let mut state = self.state.write();
        for tx in &genesis.transactions {
            state.apply(tx, genesis.timestamp);
        }
        drop(state);
        if !self.store.contains(0)? {
            self.store.put(0, &genesis)?;
        }
        *self.height.write() = 1;
        *self.last_block_hash.write() = genesis.hash.clone();
        self.metrics.set_chain_height(1);
        Ok(())
    }

    pub fn height(&self) -> u64 {
        *self.height.read()
    }

    pub fn last_block_hash(&self) -> String {
        self.last_block_hash.read().clone()
    }

    pub fn get_block(&self, height: u64) -> Result<Block, ChainError> {
        Ok(self.store.get(height)?)
    }

    pub fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<Block>, ChainError> {
        let mut out = Vec::new();
        for h in start..end {
            out.push(self.store.get(h)?);
        }
        Ok(out)
    }

    pub fn mempool_snapshot(&self) -> Vec<Transaction> {
        self.mempool.read().all().to_vec()
    }

    pub fn balance(&self, address: &str, token: Option<&str>) -> u64 {
        self.state.read().balance(address, token)
    }

    pub fn locked_balance(&self, address: &str, token: Option<&str>) -> u64 {
        self.state.read().locked_balance(address, token)
    }

    pub fn balance_including_mempool(&self, address: &str, token: Option<&str>) -> u64 {
        let state = self.state.read();
        let mempool = self.mempool.read();
        let spendable = state.balance(address, token);
        let pending_debit: u64 = mempool
            .all()
            .iter()
            .filter(|tx| matches!(&tx.sender, Sender::Address(a) if a == address) && tx.token.as_deref() == token)
            .map(|tx| tx.amount)
            .sum();
        spendable.saturating_sub(pending_debit)
    }

    pub fn mint_fee(&self) -> u64 {
        params::mint_fee(self.height(), self.state.read().mint_registry.len() as u64)
    }

    pub fn reward(&self) -> u64 {
        params::reward(self.height())
    }

    pub fn tokens_held(&self, address: &str) -> Vec<String> {
        self.state.read().tokens_held(address)
    }

    pub fn mint_entry(&self, token: &str) -> Option<crate::core::MintEntry> {
        self.state.read().mint_registry.get(token).cloned()
    }

    pub fn mint_count(&self) -> usize {
        self.state.read().mint_registry.len()
    }

    pub fn mint_nth(&self, index: usize) -> Option<(String, crate::core::MintEntry)> {
        self.state
            .read()
            .mint_registry
            .nth(index)
            .map(|(token, entry)| (token.clone(), entry.clone()))
    }

    /// Every transaction touching `address`, oldest first. Rebuilt by a
    /// linear scan of the store rather than a maintained index, since the
    /// state index only keeps current balances.
    pub fn history(&self, address: &str) -> Result<Vec<(u64, Transaction)>, ChainError> {
        let mut entries = Vec::new();
        for height in 0..self.height() {
            let block = self.store.get(height)?;
            for tx in block.transactions {
                let touches = matches!(&tx.sender, Sender::Address(a) if a == address) || tx.receiver == address;
                if touches {
                    entries.push((height, tx));
                }
            }
        }
        Ok(entries)
    }

    /// Linear scan for the block whose hash matches `query`, for
    /// `/search-blocks/:hash`.
    pub fn find_block_by_hash(&self, query: &str) -> Result<Option<(u64, Block)>, ChainError> {
        for height in 0..self.height() {
            let block = self.store.get(height)?;
            if block.hash == query {
                return Ok(Some((height, block)));
            }
        }
        Ok(None)
    }

    /// Linear scan for a committed transaction by signature, for
    /// `/search-tx/:query`.
    pub fn find_transaction(&self, query: &str) -> Result<Option<(u64, Transaction)>, ChainError> {
        for height in 0..self.height() {
            let block = self.store.get(height)?;
            if let Some(tx) = block.transactions.into_iter().find(|tx| tx.signature == query) {
                return Ok(Some((height, tx)));
            }
        }
        Ok(None)
    }

    /// The target the *next* block must meet, derived from the tail.
    pub fn current_target(&self) -> [u8; 32] {
        let height = self.height();
        let tail_blocks = self.store.slice_tail(height, TAIL as u64).unwrap_or_default();
        let timestamps: Vec<i64> = tail_blocks.iter().map(|b| b.timestamp).collect();
        next_target(&timestamps, params::BLOCK_TIME_MILLIS, &STARTING_TARGET)
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Admit an externally-submitted transaction into the mempool,
    /// including mint-airdrop synthesis.
    pub fn submit_transaction(&self, tx: Transaction, now_millis: i64) -> Result<(), ChainError> {
        let state = self.state.read();
        let mempool = self.mempool.read();
        let flags = crate::consensus::validator::TxCheckFlags {
            include_mempool_balance: true,
            is_block_context: false,
            height: self.height(),
        };
        validator::check_tx(&tx, &state, &mempool, flags)?;
        drop(state);
        drop(mempool);

        let airdrop = tx.mint.as_ref().filter(|m| m.airdrop > 0).map(|m| (tx.receiver.clone(), m.token.clone(), m.airdrop));

        let mut mempool = self.mempool.write();
        mempool.push(tx)?;
        if let Some((minter, token, airdrop_amount)) = airdrop {
            mempool.inject_reserved(Transaction {
                sender: Sender::Mint,
                receiver: minter,
                amount: airdrop_amount,
                signature: "mint".to_string(),
                nonce: 0,
                timestamp: now_millis,
                token: Some(token),
                unlock: None,
                mint: None,
            });
        }
        self.metrics.set_mempool_size(mempool.len());
        self.metrics.record_transaction_accepted();
        Ok(())
    }

    /// Validate and apply a block at the current tip. `replay` controls
    /// which timestamp and hash-recomputation checks are waived.
    pub fn add_block(&self, block: Block, replay: ReplayMode) -> Result<(), ChainError> {
        let target = self.current_target();
        let height = self.height();

        let state = self.state.read();
        let mempool = self.mempool.read();
        let last_block_hash = self.last_block_hash.read().clone();
        let ctx = BlockCheckContext {
            state: &state,
            mempool: &mempool,
            last_block_hash: &last_block_hash,
            height,
            target: &target,
            now_millis: replay.now_millis(),
            skip_timestamp_window: replay.skips_timestamp_window(),
            skip_hash_recomputation: replay.skips_hash_recomputation(),
        };
        validator::check_block(&block, &ctx)?;
        drop(state);
        drop(mempool);

        let mut state = self.state.write();
        state.release(block.timestamp);
        for tx in &block.transactions {
            state.apply(tx, block.timestamp);
        }
        drop(state);

        self.store.put(height, &block)?;
        *self.height.write() = height + 1;
        *self.last_block_hash.write() = block.hash.clone();

        let mut mempool = self.mempool.write();
        mempool.remove_committed(&block.transactions);
        self.metrics.set_mempool_size(mempool.len());
        drop(mempool);

        self.metrics.record_block_accepted();
        self.metrics.set_chain_height(height + 1);

        for tx in &block.transactions {
            if let Some(mint) = &tx.mint {
                self.events.publish(ChainEvent::MintCreated {
                    token: mint.token.clone(),
                    entry: crate::core::MintEntry {
                        mining_reward: mint.mining_reward.unwrap_or(0),
                        airdrop: mint.airdrop,
                    },
                });
            }
        }
        self.events.publish(ChainEvent::BlockCommitted(block));

        Ok(())
    }

    /// Reorg via "push": a peer-broadcast sub-chain of at most
    /// `MAX_PUSH_LEN` blocks rooted at a shared ancestor. The scan for the
    /// common ancestor below never walks back further than the sub-chain
    /// itself is long, which bounds the rewind depth too.
    pub fn push_reorg(&self, sub_chain: Vec<Block>) -> Result<(), ChainError> {
        if sub_chain.is_empty() {
            return Ok(());
        }
        if sub_chain.len() > MAX_PUSH_LEN {
            return Err(ChainError::PushTooDeep { max: MAX_PUSH_LEN });
        }

        let push_identity = hex::encode(crate::crypto::sha256(&crate::crypto::canonical_bytes(&sub_chain)));
        {
            let mut last_seen = self.last_seen_push.write();
            if last_seen.as_deref() == Some(push_identity.as_str()) {
                return Ok(());
            }
            *last_seen = Some(push_identity);
        }

        let current_height = self.height();
        let scan_depth = (sub_chain.len() + 1).min(current_height as usize);
        let first_prev_hash = &sub_chain[0].prev_hash;

        let mut fork_height = None;
        for i in (current_height.saturating_sub(scan_depth as u64)..current_height).rev() {
            if &self.store.get(i)?.hash == first_prev_hash {
                fork_height = Some(i);
                break;
            }
        }
        let Some(fork_height) = fork_height else {
            return Err(ChainError::NoCommonAncestor);
        };

        let snapshot = ChainSnapshot {
            height: current_height,
            last_block_hash: self.last_block_hash(),
            state: self.state.read().clone(),
        };

        // The orphaned local blocks from fork_height+1..current_height were
        // never un-applied, so state must be rebuilt from the common
        // ancestor rather than replayed on top as-is: otherwise the pushed
        // sub-chain's transactions would land on stale balances/nonces.
        let (rebuilt_state, rebuilt_hash) = match self.replay_state_through(fork_height + 1) {
            Ok(pair) => pair,
            Err(e) => {
                self.restore_snapshot(snapshot);
                return Err(e);
            }
        };
        *self.state.write() = rebuilt_state;
        *self.height.write() = fork_height + 1;
        *self.last_block_hash.write() = rebuilt_hash;

        for block in sub_chain {
            if let Err(e) = self.add_block(block, ReplayMode::TrustedReplay) {
                self.restore_snapshot(snapshot);
                return Err(e);
            }
        }

        Ok(())
    }

    fn restore_snapshot(&self, snapshot: ChainSnapshot) {
        *self.height.write() = snapshot.height;
        *self.last_block_hash.write() = snapshot.last_block_hash;
        *self.state.write() = snapshot.state;
    }

    pub fn try_begin_sync(&self) -> bool {
        self.is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_sync(&self) {
        self.is_syncing.store(false, Ordering::SeqCst);
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    /// Find the highest local height whose hash matches `remote_hash_at`,
    /// walking back from `self.height() - 1`. Used by the pull-sync
    /// watchdog to locate the divergence point.
    pub fn find_fork_point<F>(&self, remote_hash_at: F) -> Result<u64, ChainError>
    where
        F: Fn(u64) -> Option<String>,
    {
        let mut i = self.height().saturating_sub(1);
        loop {
            let local_hash = self.store.get(i)?.hash;
            if remote_hash_at(i).as_deref() == Some(local_hash.as_str()) {
                return Ok(i + 1);
            }
            if i == 0 {
                return Ok(0);
            }
            i -= 1;
        }
    }

    /// Rebuild what the state index and tip hash would be after replaying
    /// genesis through block `height - 1`, from scratch. Shared by
    /// `rewind_to` and `push_reorg`, which both need to discard the
    /// in-memory effects of blocks being orphaned rather than trying to
    /// subtract them back out.
    fn replay_state_through(&self, height: u64) -> Result<(StateIndex, String), ChainError> {
        let mut state = StateIndex::new();
        let genesis = self.store.get(0)?;
        for tx in &genesis.transactions {
            state.apply(tx, genesis.timestamp);
        }
        for h in 1..height {
            let block = self.store.get(h)?;
            state.release(block.timestamp);
            for tx in &block.transactions {
                state.apply(tx, block.timestamp);
            }
        }
        let last_hash = if height == 0 { String::new() } else { self.store.get(height - 1)?.hash };
        Ok((state, last_hash))
    }

    /// Truncate local chain state back to `fork_height` by discarding
    /// in-memory height/tip and replaying from the common ancestor.
    pub fn rewind_to(&self, fork_height: u64) -> Result<(), ChainError> {
        let (state, last_hash) = self.replay_state_through(fork_height)?;
        *self.state.write() = state;
        *self.height.write() = fork_height;
        *self.last_block_hash.write() = last_hash;
        self.mempool.write().clear();
        Ok(())
    }

    pub fn replace_mempool(&self, transactions: Vec<Transaction>) {
        self.mempool.write().replace(transactions);
    }
}

/// Which timestamp and hash-recomputation checks to waive for a given
/// `add_block` call.
#[derive(Clone, Copy, Debug)]
pub enum ReplayMode {
    /// Live ingest: full timestamp window and hash recomputation.
    Live { now_millis: i64 },
    /// Loading a persisted or peer-sourced chain we already trust the hash
    /// of: skip the timestamp window and (optionally) hash recomputation.
    TrustedReplay,
}

impl ReplayMode {
    fn now_millis(&self) -> i64 {
        match self {
            ReplayMode::Live { now_millis } => *now_millis,
            ReplayMode::TrustedReplay => 0,
        }
    }

    fn skips_timestamp_window(&self) -> bool {
        matches!(self, ReplayMode::TrustedReplay)
    }

    fn skips_hash_recomputation(&self) -> bool {
        matches!(self, ReplayMode::TrustedReplay)
    }
}

fn genesis_block() -> Block {
    let mut block = Block {
        timestamp: 1_700_000_000_000,
        transactions: Vec::new(),
        prev_hash: "0".repeat(64),
        nonce: 0,
        signature: "genesis".to_string(),
        proposer: "genesis".to_string(),
        hash: String::new(),
        diff: hex::encode(STARTING_TARGET),
    };
    block.hash = block.recompute_hash();
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_genesis_when_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let manager = ChainManager::init(store).unwrap();
        assert_eq!(manager.height(), 1);
        assert!(!manager.last_block_hash().is_empty());
    }

    #[test]
    fn reinitializing_from_the_same_store_replays_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let first = ChainManager::init(store).unwrap();
        let height = first.height();
        let hash = first.last_block_hash();
        drop(first);

        let store = BlockStore::open(dir.path()).unwrap();
        let second = ChainManager::init(store).unwrap();
        assert_eq!(second.height(), height);
        assert_eq!(second.last_block_hash(), hash);
    }

    #[test]
    fn sync_latch_prevents_reentry() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let manager = ChainManager::init(store).unwrap();
        assert!(manager.try_begin_sync());
        assert!(!manager.try_begin_sync());
        manager.end_sync();
        assert!(manager.try_begin_sync());
    }

    /// `hash` only needs its top byte zero to meet `STARTING_TARGET` (whose
    /// top byte is the only zero one): a stand-in for a ground proof of
    /// work, distinct per block so two blocks never collide on hash.
    fn placeholder_hash(tag: u8) -> String {
        let mut bytes = [0x11u8; 32];
        bytes[0] = 0;
        bytes[31] = tag;
        hex::encode(bytes)
    }

    fn reward_txs(dev_amount: u64, miner_amount: u64, miner: &str) -> Vec<Transaction> {
        let network_tx = |receiver: &str, amount: u64| Transaction {
            sender: Sender::Network,
            receiver: receiver.to_string(),
            amount,
            signature: "network".to_string(),
            nonce: 0,
            timestamp: 0,
            token: None,
            unlock: None,
            mint: None,
        };
        vec![network_tx(params::DEV_WALLET, dev_amount), network_tx(miner, miner_amount)]
    }

    #[test]
    fn push_reorg_rebuilds_state_from_the_common_ancestor_instead_of_double_applying() {
        use secp256k1::{PublicKey, Secp256k1, SecretKey};

        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let manager = ChainManager::init(store).unwrap();

        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret);
        let secret_hex = hex::encode(secret.secret_bytes());
        let proposer = hex::encode(public.serialize());

        let total_reward = params::reward(0);
        let dev_amount = (total_reward as f64 * params::DEV_FEE).round() as u64;
        let miner_amount = total_reward - dev_amount;

        let seal = |mut block: Block, tag: u8| -> Block {
            block.hash = placeholder_hash(tag);
            let digest = block.signing_digest();
            block.signature = crate::crypto::sign_digest(&secret_hex, &digest).unwrap();
            block
        };

        let genesis_hash = manager.last_block_hash();
        let base_ts = 1_700_000_000_000i64 + params::BLOCK_TIME_MILLIS;
        let diff = hex::encode(STARTING_TARGET);

        // Local chain: two blocks crediting "local-miner".
        let local_1 = seal(
            Block {
                timestamp: base_ts,
                transactions: reward_txs(dev_amount, miner_amount, "local-miner"),
                prev_hash: genesis_hash.clone(),
                nonce: 0,
                signature: String::new(),
                proposer: proposer.clone(),
                hash: String::new(),
                diff: diff.clone(),
            },
            1,
        );
        manager.add_block(local_1.clone(), ReplayMode::TrustedReplay).unwrap();

        let local_2 = seal(
            Block {
                timestamp: base_ts + params::BLOCK_TIME_MILLIS,
                transactions: reward_txs(dev_amount, miner_amount, "local-miner"),
                prev_hash: local_1.hash.clone(),
                nonce: 0,
                signature: String::new(),
                proposer: proposer.clone(),
                hash: String::new(),
                diff: diff.clone(),
            },
            2,
        );
        manager.add_block(local_2, ReplayMode::TrustedReplay).unwrap();

        assert_eq!(manager.height(), 3);
        assert_eq!(manager.balance("local-miner", None), miner_amount * 2);

        // Competing two-block sub-chain rooted at genesis, crediting "push-miner".
        let push_1 = seal(
            Block {
                timestamp: base_ts,
                transactions: reward_txs(dev_amount, miner_amount, "push-miner"),
                prev_hash: genesis_hash,
                nonce: 0,
                signature: String::new(),
                proposer: proposer.clone(),
                hash: String::new(),
                diff: diff.clone(),
            },
            3,
        );
        let push_2 = seal(
            Block {
                timestamp: base_ts + params::BLOCK_TIME_MILLIS,
                transactions: reward_txs(dev_amount, miner_amount, "push-miner"),
                prev_hash: push_1.hash.clone(),
                nonce: 0,
                signature: String::new(),
                proposer,
                hash: String::new(),
                diff,
            },
            4,
        );
        let push_tip_hash = push_2.hash.clone();

        manager.push_reorg(vec![push_1, push_2]).unwrap();

        assert_eq!(manager.height(), 3);
        assert_eq!(manager.last_block_hash(), push_tip_hash);
        assert_eq!(
            manager.balance("local-miner", None),
            0,
            "orphaned local chain's reward must not survive the reorg"
        );
        assert_eq!(
            manager.balance("push-miner", None),
            miner_amount * 2,
            "push-miner should be credited from only the two adopted blocks, not stacked on the orphaned chain"
        );
        assert_eq!(
            manager.balance(params::DEV_WALLET, None),
            dev_amount * 2,
            "dev fee must accumulate from the adopted chain's two blocks, not four"
        );
    }
}
