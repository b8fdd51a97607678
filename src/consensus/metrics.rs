//! Ambient observability bookkeeping — peer count, mempool size, chain
//! height, blocks accepted. Not the excluded webhook fan-out subsystem,
//! just the numbers a node operator would want to see.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct NodeMetrics {
    pub connected_peers: usize,
    pub blocks_accepted: u64,
    pub blocks_rejected: u64,
    pub transactions_accepted: u64,
    pub transactions_rejected: u64,
    pub mempool_size: usize,
    pub chain_height: u64,
    pub node_uptime_secs: u64,
}

/// Thread-safe counters, cheap to update from any gossip or sync task
/// without taking the chain-manager lock.
pub struct MetricsCollector {
    connected_peers: AtomicUsize,
    blocks_accepted: AtomicU64,
    blocks_rejected: AtomicU64,
    transactions_accepted: AtomicU64,
    transactions_rejected: AtomicU64,
    mempool_size: AtomicUsize,
    chain_height: AtomicU64,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected_peers: AtomicUsize::new(0),
            blocks_accepted: AtomicU64::new(0),
            blocks_rejected: AtomicU64::new(0),
            transactions_accepted: AtomicU64::new(0),
            transactions_rejected: AtomicU64::new(0),
            mempool_size: AtomicUsize::new(0),
            chain_height: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    pub fn set_connected_peers(&self, count: usize) {
        self.connected_peers.store(count, Ordering::Relaxed);
    }

    pub fn record_block_accepted(&self) {
        self.blocks_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_rejected(&self) {
        self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_accepted(&self) {
        self.transactions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_rejected(&self) {
        self.transactions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_mempool_size(&self, size: usize) {
        self.mempool_size.store(size, Ordering::Relaxed);
    }

    pub fn set_chain_height(&self, height: u64) {
        self.chain_height.store(height, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NodeMetrics {
        NodeMetrics {
            connected_peers: self.connected_peers.load(Ordering::Relaxed),
            blocks_accepted: self.blocks_accepted.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
            transactions_accepted: self.transactions_accepted.load(Ordering::Relaxed),
            transactions_rejected: self.transactions_rejected.load(Ordering::Relaxed),
            mempool_size: self.mempool_size.load(Ordering::Relaxed),
            chain_height: self.chain_height.load(Ordering::Relaxed),
            node_uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = MetricsCollector::new();
        metrics.record_block_accepted();
        metrics.record_block_accepted();
        metrics.record_transaction_rejected();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.blocks_accepted, 2);
        assert_eq!(snapshot.transactions_rejected, 1);
    }
}
