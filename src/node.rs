//! The node controller. Sequences startup (load store → init chain →
//! optional bulk pull from a seed HTTP peer → pull its mempool → start
//! gossip and the read API) and runs the pull-sync watchdog for the
//! lifetime of the process.

use crate::config::NodeConfig;
use crate::consensus::{ChainError, ChainManager, ReplayMode};
use crate::network::{gossip, run_outbound_peer, GossipEnvelope, GossipHub, PeerHandle};
use crate::core::{Block, Transaction};
use crate::storage::BlockStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

const BULK_PULL_BATCH: u64 = 500;
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("seed peer request failed: {0}")]
    SeedPeer(#[from] reqwest::Error),
    #[error("failed to bind read API: {0}")]
    Bind(std::io::Error),
}

async fn fetch_remote_height(client: &reqwest::Client, peer_http: &str) -> Result<u64, NodeError> {
    let value: serde_json::Value = client.get(format!("{peer_http}/height")).send().await?.json().await?;
    Ok(value.get("height").and_then(|v| v.as_u64()).unwrap_or(0))
}

async fn fetch_remote_block(client: &reqwest::Client, peer_http: &str, height: u64) -> Result<Block, NodeError> {
    Ok(client.get(format!("{peer_http}/block/{height}")).send().await?.json().await?)
}

/// Bulk-pull blocks from `peer_http` starting at the chain's current
/// height, in batches of up to `BULK_PULL_BATCH`, applying each as a
/// trusted replay and aborting on the first invalid block.
async fn bulk_pull_forward(client: &reqwest::Client, chain: &ChainManager, peer_http: &str) -> Result<(), NodeError> {
    loop {
        let start = chain.height();
        let remote_height = fetch_remote_height(client, peer_http).await?;
        if remote_height <= start {
            return Ok(());
        }
        let end = (start + BULK_PULL_BATCH).min(remote_height);
        info!(start, end, "bulk-pulling blocks from seed peer");

        let blocks: Vec<Block> =
            client.get(format!("{peer_http}/blocks?start={start}&end={end}")).send().await?.json().await?;

        for block in blocks {
            chain.add_block(block, ReplayMode::TrustedReplay)?;
        }
    }
}

/// Startup bulk pull: trust the seed wholesale, pull forward from
/// wherever local height already is, then adopt its mempool.
async fn initial_bulk_pull(chain: &ChainManager, peer_http: &str) -> Result<(), NodeError> {
    let client = reqwest::Client::new();
    bulk_pull_forward(&client, chain, peer_http).await?;
    let mempool: Vec<Transaction> = client.get(format!("{peer_http}/mempool")).send().await?.json().await?;
    info!(count = mempool.len(), "pulled seed peer mempool");
    chain.replace_mempool(mempool);
    Ok(())
}

/// Walk back from `chain.height() - 1` comparing the remote block's hash to
/// ours at the same height, to find the divergence point. Returns the
/// height just past the last shared block.
async fn find_remote_fork_point(client: &reqwest::Client, chain: &ChainManager, peer_http: &str) -> Result<u64, NodeError> {
    let mut i = chain.height().saturating_sub(1);
    loop {
        let local_hash = chain.get_block(i)?.hash;
        let remote_hash = fetch_remote_block(client, peer_http, i).await?.hash;
        if remote_hash == local_hash {
            return Ok(i + 1);
        }
        if i == 0 {
            return Ok(0);
        }
        i -= 1;
    }
}

/// Full pull-sync: locate the divergence point against the remote, rewind
/// local state to it if the remote has actually forked away from us, then
/// bulk-pull forward and adopt the remote's mempool.
async fn pull_sync(chain: &ChainManager, peer_http: &str) -> Result<(), NodeError> {
    let client = reqwest::Client::new();
    let fork = find_remote_fork_point(&client, chain, peer_http).await?;
    if fork < chain.height() {
        info!(fork, local_height = chain.height(), "rewinding to divergence point before pull-sync");
        chain.rewind_to(fork)?;
    }
    bulk_pull_forward(&client, chain, peer_http).await?;
    let mempool: Vec<Transaction> = client.get(format!("{peer_http}/mempool")).send().await?.json().await?;
    info!(count = mempool.len(), "pulled seed peer mempool");
    chain.replace_mempool(mempool);
    Ok(())
}

/// Every `WATCHDOG_INTERVAL`, compare the seed peer's height to ours; if
/// it's ahead, pull-sync (rewinding on fork first); if we're ahead, push
/// our tail to every peer. The `isSyncing` latch also covers incoming
/// pushes (see `GossipHub::handle_incoming`), so only one reorg operation
/// is ever in flight.
async fn pull_sync_watchdog(chain: Arc<ChainManager>, hub: Arc<GossipHub>, peer_http: String) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
    loop {
        ticker.tick().await;
        if !chain.try_begin_sync() {
            continue;
        }

        let outcome = async {
            let remote_height = fetch_remote_height(&client, &peer_http).await?;
            let local_height = chain.height();
            if remote_height > local_height {
                hub.stop_incoming();
                let result = pull_sync(&chain, &peer_http).await;
                hub.resume_incoming();
                result
            } else if local_height > remote_height {
                let depth = local_height.min(crate::consensus::params::MAX_PUSH_LEN as u64);
                let tail = chain.get_blocks(local_height - depth, local_height)?;
                hub.broadcast(GossipEnvelope::Push(tail));
                Ok(())
            } else {
                Ok(())
            }
        }
        .await;

        if let Err(e) = outcome {
            warn!(error = %e, "pull-sync watchdog tick failed");
        }
        chain.end_sync();
    }
}

/// Run the full node: bulk sync, then gossip plus the read API, until
/// `shutdown` fires.
pub async fn run(config: NodeConfig, shutdown: watch::Receiver<bool>) -> Result<(), NodeError> {
    let store = BlockStore::open(&config.db_path)?;
    let chain = Arc::new(ChainManager::init(store)?);
    info!(height = chain.height(), "chain initialized");

    if let Some(peer_http) = &config.peer_http {
        if let Err(e) = initial_bulk_pull(&chain, peer_http).await {
            warn!(error = %e, "initial bulk pull from seed peer failed, continuing from local state");
        }
    }

    let hub = GossipHub::new(Arc::clone(&chain));

    let (incoming_tx, mut incoming_rx) = mpsc::unbounded_channel::<GossipEnvelope>();
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            while let Some(envelope) = incoming_rx.recv().await {
                hub.handle_incoming(envelope).await;
            }
        });
    }

    for peer_url in &config.peers {
        let handle = PeerHandle::new(peer_url.clone());
        let outgoing = hub.subscribe();
        let incoming_tx = incoming_tx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(run_outbound_peer(handle, outgoing, incoming_tx, shutdown));
    }

    if let Some(peer_http) = config.peer_http.clone() {
        let chain = Arc::clone(&chain);
        let hub = Arc::clone(&hub);
        tokio::spawn(pull_sync_watchdog(chain, hub, peer_http));
    }

    let gossip_addr = format!("0.0.0.0:{}", config.port);
    let gossip_app = gossip::router(Arc::clone(&hub), incoming_tx.clone());
    let gossip_listener = tokio::net::TcpListener::bind(&gossip_addr).await.map_err(NodeError::Bind)?;
    info!(addr = %gossip_addr, "gossip server listening");
    let mut gossip_shutdown = shutdown.clone();
    let gossip_task = tokio::spawn(async move {
        axum::serve(gossip_listener, gossip_app)
            .with_graceful_shutdown(async move {
                let _ = gossip_shutdown.changed().await;
            })
            .await
    });

    let api_addr = format!("0.0.0.0:{}", config.http_port);
    let api_app = crate::api::create_router(Arc::clone(&chain));
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await.map_err(NodeError::Bind)?;
    info!(addr = %api_addr, "read API listening");
    let mut api_shutdown = shutdown.clone();
    let api_task = tokio::spawn(async move {
        axum::serve(api_listener, api_app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await
    });

    let _ = tokio::join!(gossip_task, api_task);
    Ok(())
}
